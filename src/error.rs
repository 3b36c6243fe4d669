// ============================================================================
// spark-keyval - Errors
// ============================================================================

use thiserror::Error;

/// Model definition failed. No partial model is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("key field \"{key}\" should be in state")]
    MissingKeyField { key: String },

    #[error("key field \"{key}\" should be writable store")]
    KeyFieldNotWritable { key: String },

    #[error("key field \"{key}\" cannot be optional")]
    OptionalKeyField { key: String },

    #[error("onMount should be callable event")]
    OnMountNotCallable,

    #[error("create should return only fields state, api, optional and onMount: unexpected field \"{field}\"")]
    UnexpectedField { field: String },
}

/// A lens step could not be resolved against the collection shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LensError {
    #[error("field \"{field}\" is not part of the item shape")]
    UnknownField { field: String },

    #[error("field \"{field}\" is not a nested collection")]
    NotACollection { field: String },

    #[error("field \"{field}\" is a trigger and cannot be read")]
    NotReadable { field: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_field() {
        let err = ModelError::MissingKeyField { key: "id".into() };
        assert_eq!(err.to_string(), "key field \"id\" should be in state");

        let err = LensError::NotACollection { field: "tags".into() };
        assert!(err.to_string().contains("tags"));
    }
}
