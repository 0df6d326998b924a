// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Devbox model operations
#[derive(Error, Debug, Diagnostic)]
pub enum DevboxError {
    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(code(devbox::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// A required field was absent
    #[error("Missing required field: {field}")]
    #[diagnostic(
        code(devbox::missing_field),
        help("Set `{field}` on the object before handing it to the controller")
    )]
    MissingField {
        #[allow(unused)]
        field: String,
    },

    /// A quantity string could not be parsed
    #[error("Invalid quantity '{value}' for {resource}")]
    #[diagnostic(
        code(devbox::invalid_quantity),
        help("Use Kubernetes quantity notation, e.g. '500m' or '2' for cpu, '512Mi' or '4Gi' for memory")
    )]
    InvalidQuantity {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        value: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(devbox::serialization_error),
        help("Ensure the resource format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Reading a manifest from disk failed
    #[error("Failed to read manifest '{path}'")]
    #[diagnostic(
        code(devbox::manifest_read_failed),
        help("Check that the file exists and is readable")
    )]
    ManifestRead {
        #[allow(unused)]
        path: String,
        #[source]
        #[allow(unused)]
        source: std::io::Error,
    },
}

/// Result type alias for Devbox model operations
pub type Result<T> = std::result::Result<T, DevboxError>;

impl DevboxError {
    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a MissingField error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an InvalidQuantity error
    pub fn invalid_quantity(resource: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            resource: resource.into(),
            value: value.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}
