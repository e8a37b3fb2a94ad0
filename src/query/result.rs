//! Query results.

use crate::model::Value;

/// One page of a listing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    /// Items in result order.
    pub items: Vec<Value>,
    /// Offset of the first item, when the query skipped.
    pub skip: Option<u64>,
    /// Number of matches before paging, when requested.
    pub total_count: Option<u64>,
    /// Request URI that produced the page.
    pub url: Option<String>,
}

impl QueryResult {
    /// Listing without paging metadata.
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    /// Number of items on this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the page is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl IntoIterator for QueryResult {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Outcome of executing a query: a listing or a single projected value.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOutput {
    /// Listing.
    Items(QueryResult),
    /// Scalar or single-item projection; `Null` for an empty `firstordefault`.
    Value(Value),
}

impl QueryOutput {
    /// The listing, if this is one.
    pub fn items(&self) -> Option<&QueryResult> {
        match self {
            QueryOutput::Items(result) => Some(result),
            QueryOutput::Value(_) => None,
        }
    }

    /// The projected value, if this is one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            QueryOutput::Value(value) => Some(value),
            QueryOutput::Items(_) => None,
        }
    }
}
