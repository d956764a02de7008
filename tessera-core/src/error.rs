//! Error types for Tessera cache operations

use thiserror::Error;

/// Cache store errors.
///
/// Anything a cache manager, a single cache store, or the distributed store
/// client reports while reading, writing or executing a transaction. These
/// are never retried by the policy layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store transport failure on {store}: {reason}")]
    Transport { store: String, reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization failed: {reason}")]
    Deserialization { reason: String },
}

/// Errors raised by (or on behalf of) a fetch handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Entity not found: {key}")]
    NotFound { key: String },

    #[error("Fetch failed: {reason}")]
    Failed { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No distributed store configured")]
    NoDistributedStore,

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Cache context has been disposed")]
    Disposed,
}

/// Invalid input handed to the key stringifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Query must target at least one entity kind")]
    EmptyKinds,

    #[error("Entity kind name must not be empty")]
    EmptyKindName,

    #[error("Empty field name in {clause} clause")]
    EmptyField { clause: String },

    #[error("Key is incomplete: {kind} has no id or name")]
    IncompleteKey { kind: String },
}

/// Master error type for all Tessera errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TesseraError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Result type alias for Tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_transport() {
        let err = StoreError::Transport {
            store: "redis".to_string(),
            reason: "connection reset".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("redis"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_fetch_error_display_not_found() {
        let err = FetchError::NotFound {
            key: "User:42".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("User:42"));
    }

    #[test]
    fn test_config_error_display_no_distributed_store() {
        let msg = format!("{}", ConfigError::NoDistributedStore);
        assert!(msg.contains("No distributed store"));
    }

    #[test]
    fn test_validation_error_display_empty_field() {
        let err = ValidationError::EmptyField {
            clause: "filter".to_string(),
        };
        assert!(format!("{}", err).contains("filter"));
    }

    #[test]
    fn test_tessera_error_from_variants() {
        let store = TesseraError::from(StoreError::Transaction {
            reason: "aborted".to_string(),
        });
        assert!(matches!(store, TesseraError::Store(_)));

        let fetch = TesseraError::from(FetchError::Failed {
            reason: "deadline exceeded".to_string(),
        });
        assert!(matches!(fetch, TesseraError::Fetch(_)));

        let config = TesseraError::from(ConfigError::NoDistributedStore);
        assert!(matches!(config, TesseraError::Config(_)));

        let validation = TesseraError::from(ValidationError::EmptyKinds);
        assert!(matches!(validation, TesseraError::Validation(_)));
    }
}
