use super::models::{
    CollectionSelector, CompositeFilter, CompositeOperator, Direction, FieldFilter, FieldOperator,
    FieldReference, Order, QueryFilter, StructuredQuery,
};
use super::value::serde_value_to_value;
use super::FirestoreError;
use serde::Serialize;

/// A Firestore query definition: target collection, filters, ordering, limit.
///
/// Built independently of a client so the background sweeps can describe
/// their "due and pending" scans once and run them each tick.
#[derive(Clone, Debug)]
pub struct Query {
    pub(crate) query: StructuredQuery,
}

impl Query {
    /// Creates a new query over the named collection.
    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self {
            query: StructuredQuery {
                from: Some(vec![CollectionSelector {
                    collection_id: collection_id.into(),
                    all_descendants: None,
                }]),
                where_clause: None,
                order_by: None,
                limit: None,
            },
        }
    }

    /// Adds a field filter; multiple filters are AND-composed.
    pub fn filter<T: Serialize>(
        mut self,
        field: &str,
        op: FieldOperator,
        value: T,
    ) -> Result<Self, FirestoreError> {
        let serde_value = serde_json::to_value(value)?;
        let firestore_value = serde_value_to_value(serde_value)?;

        let filter = QueryFilter::FieldFilter(FieldFilter {
            field: FieldReference {
                field_path: field.to_string(),
            },
            op,
            value: firestore_value,
        });

        self.query.where_clause = Some(match self.query.where_clause.take() {
            None => filter,
            Some(QueryFilter::CompositeFilter(mut cf)) => {
                cf.filters.push(filter);
                QueryFilter::CompositeFilter(cf)
            }
            Some(existing) => QueryFilter::CompositeFilter(CompositeFilter {
                op: CompositeOperator::And,
                filters: vec![existing, filter],
            }),
        });

        Ok(self)
    }

    /// Sorts the results by the given field.
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        let order = Order {
            field: FieldReference {
                field_path: field.to_string(),
            },
            direction,
        };

        match &mut self.query.order_by {
            Some(order_by) => order_by.push(order),
            None => self.query.order_by = Some(vec![order]),
        }

        self
    }

    /// Caps the number of documents returned.
    pub fn limit(mut self, limit: i32) -> Self {
        self.query.limit = Some(limit);
        self
    }
}
