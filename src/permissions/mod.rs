//! Capability gating.
//!
//! The client needs the platform's blessing before touching the camera,
//! microphone, or photo library. [`CapabilityGate`] is the one seam for all
//! of them; the host wires in whatever platform binding it has, and
//! [`PolicyGate`] is an in-memory implementation for servers and tests.

use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Camera,
    Microphone,
    Photos,
    Notifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// Denied and the platform will not prompt again; the host has to send
    /// the user to system settings.
    PermanentlyDenied,
    Restricted,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }
}

/// Platform permission checks behind one interface.
#[async_trait::async_trait]
pub trait CapabilityGate: Send + Sync {
    /// The current status without prompting.
    async fn status(&self, capability: Capability) -> PermissionStatus;

    /// Prompts if the platform allows it and returns the resulting status.
    async fn request(&self, capability: Capability) -> PermissionStatus;
}

/// A fixed policy table. Unlisted capabilities are denied.
pub struct PolicyGate {
    policy: Mutex<HashMap<Capability, PermissionStatus>>,
}

impl PolicyGate {
    pub fn allow_all() -> Self {
        let policy = [
            Capability::Camera,
            Capability::Microphone,
            Capability::Photos,
            Capability::Notifications,
        ]
        .into_iter()
        .map(|c| (c, PermissionStatus::Granted))
        .collect();
        Self {
            policy: Mutex::new(policy),
        }
    }

    pub fn deny_all() -> Self {
        Self {
            policy: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, capability: Capability, status: PermissionStatus) {
        self.policy.lock().insert(capability, status);
    }
}

#[async_trait::async_trait]
impl CapabilityGate for PolicyGate {
    async fn status(&self, capability: Capability) -> PermissionStatus {
        self.policy
            .lock()
            .get(&capability)
            .copied()
            .unwrap_or(PermissionStatus::Denied)
    }

    async fn request(&self, capability: Capability) -> PermissionStatus {
        self.status(capability).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn policy_gate_defaults_to_denied() {
        let gate = PolicyGate::deny_all();
        assert_eq!(
            gate.status(Capability::Camera).await,
            PermissionStatus::Denied
        );

        gate.set(Capability::Camera, PermissionStatus::Granted);
        assert!(gate.request(Capability::Camera).await.is_granted());
        assert!(!gate.status(Capability::Photos).await.is_granted());
    }

    #[tokio::test]
    async fn permanently_denied_stays_after_request() {
        let gate = PolicyGate::allow_all();
        gate.set(Capability::Microphone, PermissionStatus::PermanentlyDenied);
        assert_eq!(
            gate.request(Capability::Microphone).await,
            PermissionStatus::PermanentlyDenied
        );
    }
}
