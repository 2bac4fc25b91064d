// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for speakerfix domain operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// A reconcile key could not be parsed
    #[error("Invalid pod key: '{key}'")]
    #[diagnostic(
        code(speakerfix::invalid_pod_key),
        help("Pod keys have the form '<namespace>/<name>' or '<name>' for cluster-scoped objects")
    )]
    InvalidPodKey {
        #[allow(unused)]
        key: String,
    },

    /// An object is missing metadata needed to identify it
    #[error("Object is missing required field: {field}")]
    #[diagnostic(
        code(speakerfix::missing_metadata),
        help("Objects delivered by the API server always carry {field}; this usually means a hand-built object in a test")
    )]
    MissingMetadata {
        #[allow(unused)]
        field: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(speakerfix::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an InvalidPodKey error
    pub fn invalid_pod_key(key: impl Into<String>) -> Self {
        Self::InvalidPodKey { key: key.into() }
    }

    /// Create a MissingMetadata error
    pub fn missing_metadata(field: impl Into<String>) -> Self {
        Self::MissingMetadata {
            field: field.into(),
        }
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}
