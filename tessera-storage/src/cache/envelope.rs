//! Marshalling between typed records and stored payloads.
//!
//! Callers see `Keyed<T>`, where the originating key rides next to the
//! value. Stores only hold plain JSON, so on the way in the key is written
//! as a sidecar field and on the way out it is re-attached.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tessera_core::{DatastoreKey, Keyed, QueryInfo, QueryResult, StoreError, TesseraResult};

/// A record as written to a cache store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub value: Value,
    pub key: DatastoreKey,
}

/// A query result as written to a cache store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQueryResult {
    pub entities: Vec<StoredRecord>,
    #[serde(default)]
    pub info: QueryInfo,
}

/// Encode a record and its key.
pub fn marshal_record<T: Serialize>(value: &T, key: &DatastoreKey) -> TesseraResult<Value> {
    let stored = StoredRecord {
        value: to_value(value)?,
        key: key.clone(),
    };
    to_value(&stored)
}

/// Decode a stored record, re-attaching its key.
pub fn unmarshal_record<T: DeserializeOwned>(payload: Value) -> TesseraResult<Keyed<T>> {
    let stored: StoredRecord = from_value(payload)?;
    Ok(Keyed::new(from_value(stored.value)?, stored.key))
}

pub fn marshal_query_result<T: Serialize>(result: &QueryResult<T>) -> TesseraResult<Value> {
    let mut entities = Vec::with_capacity(result.entities.len());
    for record in &result.entities {
        entities.push(StoredRecord {
            value: to_value(record.value())?,
            key: record.key().clone(),
        });
    }
    to_value(&StoredQueryResult {
        entities,
        info: result.info.clone(),
    })
}

pub fn unmarshal_query_result<T: DeserializeOwned>(payload: Value) -> TesseraResult<QueryResult<T>> {
    let stored: StoredQueryResult = from_value(payload)?;
    let mut entities = Vec::with_capacity(stored.entities.len());
    for record in stored.entities {
        entities.push(Keyed::new(from_value(record.value)?, record.key));
    }
    Ok(QueryResult::new(entities, stored.info))
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> TesseraResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        StoreError::Serialization {
            reason: e.to_string(),
        }
        .into()
    })
}

fn from_value<T: DeserializeOwned>(value: Value) -> TesseraResult<T> {
    serde_json::from_value(value).map_err(|e| {
        StoreError::Deserialization {
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::{MoreResults, TesseraError};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
        age: u32,
    }

    fn alice() -> User {
        User {
            name: "alice".to_string(),
            age: 30,
        }
    }

    #[test]
    fn test_record_carries_key_as_sidecar() {
        let key = DatastoreKey::new("User", 1);
        let payload = marshal_record(&alice(), &key).expect("marshal should succeed");

        assert_eq!(payload["value"], json!({"name": "alice", "age": 30}));
        assert!(payload.get("key").is_some());

        let record: Keyed<User> = unmarshal_record(payload).expect("unmarshal should succeed");
        assert_eq!(record.value(), &alice());
        assert_eq!(record.key(), &key);
    }

    #[test]
    fn test_query_result_round_trip_keeps_info() {
        let result = QueryResult::new(
            vec![Keyed::new(alice(), DatastoreKey::new("User", "alice"))],
            QueryInfo {
                end_cursor: Some("next".to_string()),
                more_results: MoreResults::MoreResultsAfterLimit,
            },
        );

        let payload = marshal_query_result(&result).expect("marshal should succeed");
        let back: QueryResult<User> =
            unmarshal_query_result(payload).expect("unmarshal should succeed");

        assert_eq!(back, result);
        assert_eq!(back.entities[0].key(), result.entities[0].key());
        assert_eq!(back.info.end_cursor.as_deref(), Some("next"));
    }

    #[test]
    fn test_unmarshal_rejects_foreign_payload() {
        let err = unmarshal_record::<User>(json!("not a record"))
            .expect_err("foreign payload should fail");
        assert!(matches!(
            err,
            TesseraError::Store(StoreError::Deserialization { .. })
        ));
    }
}
