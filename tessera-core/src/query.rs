//! Query specifications and query results.

use serde::{Deserialize, Serialize};

use crate::entity::{DatastoreKey, EntityKind};
use crate::filter::{FilterExpr, FilterOperator, OrderClause};
use crate::record::Keyed;

/// Structured description of a filtered listing against one or more kinds.
///
/// The cache layer never mutates a specification; its canonical identity is
/// the string produced by [`crate::stringify_query`], not structural
/// equality.
///
/// ```ignore
/// let query = QuerySpec::new("User")
///     .filter(FilterExpr::eq("age", 30))
///     .order(OrderClause::desc("created"))
///     .limit(20);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub kinds: Vec<EntityKind>,
    #[serde(default)]
    pub filters: Vec<FilterExpr>,
    #[serde(default)]
    pub orders: Vec<OrderClause>,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_cursor: Option<String>,
}

impl QuerySpec {
    /// Create a query against a single kind.
    pub fn new(kind: impl Into<EntityKind>) -> Self {
        Self {
            kinds: vec![kind.into()],
            ..Self::default()
        }
    }

    /// Create a query spanning several kinds.
    pub fn for_kinds<I, K>(kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<EntityKind>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Entity kinds this query depends on.
    pub fn kinds(&self) -> &[EntityKind] {
        &self.kinds
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn filter(mut self, filter: FilterExpr) -> Self {
        self.filters.push(filter);
        self
    }

    /// Restrict results to descendants of `ancestor`.
    pub fn has_ancestor(self, ancestor: &DatastoreKey) -> Self {
        let value = serde_json::to_value(ancestor).unwrap_or(serde_json::Value::Null);
        self.filter(FilterExpr::new("__key__", FilterOperator::HasAncestor, value))
    }

    pub fn order(mut self, order: OrderClause) -> Self {
        self.orders.push(order);
        self
    }

    pub fn select(mut self, field: impl Into<String>) -> Self {
        self.select.push(field.into());
        self
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn start(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = Some(cursor.into());
        self
    }

    pub fn end(mut self, cursor: impl Into<String>) -> Self {
        self.end_cursor = Some(cursor.into());
        self
    }
}

/// Whether more results exist past the returned page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoreResults {
    MoreResultsAfterLimit,
    MoreResultsAfterCursor,
    #[default]
    NoMoreResults,
    NotFinished,
}

/// Pagination metadata returned next to query entities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_cursor: Option<String>,
    #[serde(default)]
    pub more_results: MoreResults,
}

/// Result of running a query: entities plus pagination metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub entities: Vec<Keyed<T>>,
    pub info: QueryInfo,
}

impl<T> QueryResult<T> {
    pub fn new(entities: Vec<Keyed<T>>, info: QueryInfo) -> Self {
        Self { entities, info }
    }

    /// Empty page with no further results.
    pub fn empty() -> Self {
        Self {
            entities: Vec::new(),
            info: QueryInfo::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
