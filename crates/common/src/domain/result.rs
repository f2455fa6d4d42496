use crate::domain::AggregateSpace;
use thiserror::Error;

pub type FetchResult<T> = Result<T, FetchError>;
pub type NormalizeResult<T> = Result<T, NormalizeError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reaching or decoding the sales feed.
///
/// Recoverable: the poll loop treats it as an empty batch for the cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("feed request timed out")]
    Timeout,

    #[error("feed transport error: {0}")]
    Transport(String),

    #[error("feed returned non-success status {status}")]
    Status { status: u16 },

    #[error("malformed feed body: {0}")]
    MalformedBody(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            FetchError::MalformedBody(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// A single raw item could not be shaped into a Purchase. Only that item is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("url does not match the seller subdomain pattern: {url}")]
    MalformedUrl { url: String },

    #[error("unknown item type code: {code}")]
    UnknownItemType { code: String },

    #[error("invalid utc timestamp: {value}")]
    InvalidTimestamp { value: f64 },

    #[error("invalid amount in {field}: {value}")]
    InvalidAmount { field: &'static str, value: f64 },

    #[error("item could not be decoded: {reason}")]
    Undecodable { reason: String },
}

/// Failure reported by the document store for one operation or one batch item.
///
/// Cloneable so that a failed batch request can be attributed to each of its items.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("version conflict on key {key}")]
    VersionConflict { key: String },

    #[error("store rejected the request with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("store request timed out")]
    Timeout,

    #[error("store transport error: {0}")]
    Transport(String),

    #[error("malformed store response: {0}")]
    MalformedResponse(String),

    #[error("document serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_decode() {
            StoreError::MalformedResponse(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// A conditional aggregate update failed for one key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{space} aggregate update failed for key {key}: {source}")]
pub struct AggregateError {
    pub space: AggregateSpace,
    pub key: String,
    #[source]
    pub source: StoreError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_error_message_names_space_and_key() {
        let err = AggregateError {
            space: AggregateSpace::Seller,
            key: "foo".to_string(),
            source: StoreError::VersionConflict {
                key: "foo".to_string(),
            },
        };

        let message = err.to_string();
        assert!(message.starts_with("seller aggregate update failed for key foo"));
        assert!(message.contains("version conflict"));
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(StoreError::from(err), StoreError::Serialization(_)));
    }
}
