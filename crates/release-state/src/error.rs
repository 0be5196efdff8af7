//! Error types for release-state

use thiserror::Error;

/// Errors that can occur while reading or writing release bindings
#[derive(Error, Debug)]
pub enum StoreError {
    /// More than one successful release carries the same identity tags
    #[error("ambiguous release match for {key}: {count} successful releases share the same tags")]
    Ambiguous { key: String, count: usize },

    /// The backing service failed (query, network, permission)
    #[error("release store backend failed: {0}")]
    Backend(String),

    /// The persisted payload could not be (de)serialized
    #[error("release store payload is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_error_names_key_and_count() {
        let err = StoreError::Ambiguous {
            key: "org/fleet@abc123#pr7".to_string(),
            count: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("org/fleet@abc123#pr7"));
        assert!(msg.contains("2 successful releases"));
    }
}
