//! Cache key derivation.
//!
//! A query's cache identity is its rendered string, never structural
//! equality. Rendering is a pure function of the specification:
//!
//! ```text
//! namespace | kinds | filters | orders | select | group_by | limit | offset | start | end
//! ```
//!
//! Every user-supplied string is written as a JSON string literal, so a `|`
//! or `,` inside a field name or value cannot forge a neighbouring segment.
//! Filters are conjunctive and are sorted after rendering; orders keep the
//! caller's sequence.

use serde_json::Value;

use crate::entity::{DatastoreKey, EntityKind, KeyId};
use crate::error::{TesseraResult, ValidationError};
use crate::filter::{FilterExpr, OrderClause, SortDirection};
use crate::query::QuerySpec;

const SEGMENT_SEPARATOR: &str = "|";

/// Render a query specification into its canonical string.
pub fn stringify_query(query: &QuerySpec) -> TesseraResult<String> {
    if query.kinds.is_empty() {
        return Err(ValidationError::EmptyKinds.into());
    }

    let mut kinds = Vec::with_capacity(query.kinds.len());
    for kind in &query.kinds {
        kinds.push(quoted_kind(kind)?);
    }

    let mut filters = Vec::with_capacity(query.filters.len());
    for filter in &query.filters {
        filters.push(render_filter(filter)?);
    }
    filters.sort();

    let mut orders = Vec::with_capacity(query.orders.len());
    for order in &query.orders {
        orders.push(render_order(order)?);
    }

    let segments = [
        optional_string(query.namespace.as_deref()),
        kinds.join(":"),
        filters.join(","),
        orders.join(","),
        render_fields(&query.select, "select")?,
        render_fields(&query.group_by, "group_by")?,
        optional_number(query.limit),
        optional_number(query.offset),
        optional_string(query.start_cursor.as_deref()),
        optional_string(query.end_cursor.as_deref()),
    ];

    Ok(segments.join(SEGMENT_SEPARATOR))
}

/// Render a complete datastore key.
///
/// Ids are written bare and names as JSON strings, so `User:5` and
/// `User:"5"` stay distinct.
pub fn stringify_key(key: &DatastoreKey) -> TesseraResult<String> {
    if key.path.is_empty() {
        return Err(ValidationError::IncompleteKey {
            kind: String::new(),
        }
        .into());
    }

    let mut elements = Vec::with_capacity(key.path.len());
    for element in &key.path {
        let kind = quoted_kind(&element.kind)?;
        let id = match &element.id {
            Some(KeyId::Id(id)) => id.to_string(),
            Some(KeyId::Name(name)) => quote(name),
            None => {
                return Err(ValidationError::IncompleteKey {
                    kind: element.kind.to_string(),
                }
                .into())
            }
        };
        elements.push(format!("{}:{}", kind, id));
    }

    Ok(format!(
        "{}{}{}",
        optional_string(key.namespace.as_deref()),
        SEGMENT_SEPARATOR,
        elements.join("/")
    ))
}

/// Namespaced cache key for a query.
pub fn query_cache_key(prefix: &str, query: &QuerySpec) -> TesseraResult<String> {
    Ok(format!("{}{}", prefix, stringify_query(query)?))
}

/// Namespaced cache key for a point lookup.
pub fn key_cache_key(prefix: &str, key: &DatastoreKey) -> TesseraResult<String> {
    Ok(format!("{}{}", prefix, stringify_key(key)?))
}

/// Key of the set that indexes every query registered under `kind`.
pub fn kind_set_key(prefix: &str, kind: &EntityKind) -> String {
    format!("{}{}", prefix, kind.as_str())
}

/// Serialize a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, inner)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&quote(key));
                out.push(':');
                write_canonical(inner, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, inner) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(inner, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn render_filter(filter: &FilterExpr) -> TesseraResult<String> {
    let field = quoted_field(&filter.field, "filter")?;
    Ok(format!(
        "{}{}{}",
        field,
        filter.operator.symbol(),
        canonical_json(&filter.value)
    ))
}

fn render_order(order: &OrderClause) -> TesseraResult<String> {
    let field = quoted_field(&order.field, "order")?;
    let direction = match order.direction {
        SortDirection::Ascending => '+',
        SortDirection::Descending => '-',
    };
    Ok(format!("{}{}", field, direction))
}

fn render_fields(fields: &[String], clause: &str) -> TesseraResult<String> {
    let mut rendered = Vec::with_capacity(fields.len());
    for field in fields {
        rendered.push(quoted_field(field, clause)?);
    }
    Ok(rendered.join(","))
}

fn quoted_kind(kind: &EntityKind) -> TesseraResult<String> {
    if kind.as_str().is_empty() {
        return Err(ValidationError::EmptyKindName.into());
    }
    Ok(quote(kind.as_str()))
}

fn quoted_field(field: &str, clause: &str) -> TesseraResult<String> {
    if field.is_empty() {
        return Err(ValidationError::EmptyField {
            clause: clause.to_string(),
        }
        .into());
    }
    Ok(quote(field))
}

fn quote(s: &str) -> String {
    Value::from(s).to_string()
}

fn optional_string(value: Option<&str>) -> String {
    value.map(quote).unwrap_or_default()
}

fn optional_number(value: Option<u32>) -> String {
    value.map(|n| n.to_string()).unwrap_or_default()
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::filter::FilterOperator;
    use proptest::prelude::*;

    fn arb_operator() -> impl Strategy<Value = FilterOperator> {
        prop_oneof![
            Just(FilterOperator::Eq),
            Just(FilterOperator::Ne),
            Just(FilterOperator::Gt),
            Just(FilterOperator::Lt),
            Just(FilterOperator::Gte),
            Just(FilterOperator::Lte),
            Just(FilterOperator::In),
            Just(FilterOperator::NotIn),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[a-z|,:]{0,8}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            Just(Value::Null),
        ]
    }

    fn arb_filter() -> impl Strategy<Value = FilterExpr> {
        ("[a-z]{1,6}", arb_operator(), arb_value())
            .prop_map(|(field, op, value)| FilterExpr::new(field, op, value))
    }

    fn arb_query() -> impl Strategy<Value = QuerySpec> {
        (
            prop::collection::vec("[A-Z][a-z]{0,5}", 1..3),
            prop::collection::vec(arb_filter(), 0..4),
            prop::collection::vec(("[a-z]{1,6}", any::<bool>()), 0..3),
            prop::option::of(1u32..500),
            prop::option::of("[a-zA-Z0-9]{1,12}"),
        )
            .prop_map(|(kinds, filters, orders, limit, cursor)| {
                let mut query = QuerySpec::for_kinds(kinds);
                query.filters = filters;
                query.orders = orders
                    .into_iter()
                    .map(|(field, asc)| {
                        if asc {
                            OrderClause::asc(field)
                        } else {
                            OrderClause::desc(field)
                        }
                    })
                    .collect();
                query.limit = limit;
                query.start_cursor = cursor;
                query
            })
    }

    fn normalized(query: &QuerySpec) -> QuerySpec {
        let mut query = query.clone();
        query.filters.sort_by_key(render_filter_or_empty);
        query
    }

    fn render_filter_or_empty(filter: &FilterExpr) -> String {
        render_filter(filter).unwrap_or_default()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_equal_queries_stringify_equal(query in arb_query()) {
            let copy = query.clone();
            prop_assert_eq!(
                stringify_query(&query).expect("stringify should succeed"),
                stringify_query(&copy).expect("stringify should succeed")
            );
        }

        #[test]
        fn prop_filter_permutation_is_invisible(query in arb_query()) {
            let mut reversed = query.clone();
            reversed.filters.reverse();
            prop_assert_eq!(
                stringify_query(&query).expect("stringify should succeed"),
                stringify_query(&reversed).expect("stringify should succeed")
            );
        }

        #[test]
        fn prop_different_queries_stringify_differently(a in arb_query(), b in arb_query()) {
            let key_a = stringify_query(&a).expect("stringify should succeed");
            let key_b = stringify_query(&b).expect("stringify should succeed");
            if normalized(&a) != normalized(&b) {
                prop_assert_ne!(key_a, key_b);
            } else {
                prop_assert_eq!(key_a, key_b);
            }
        }

        #[test]
        fn prop_query_and_key_namespaces_disjoint(query in arb_query(), id in any::<i64>()) {
            let q = query_cache_key("queries:", &query).expect("stringify should succeed");
            let k = key_cache_key("keys:", &DatastoreKey::new("User", id))
                .expect("stringify should succeed");
            prop_assert_ne!(q, k);
        }
    }
}
