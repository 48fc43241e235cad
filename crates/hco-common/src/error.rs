//! Error types for the HyperConverged operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the context a reader needs to find the offending
//! object: operand names, template names, field paths.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error (store communication failure)
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for a desired object or parent spec
    #[error("validation error for {object}: {message}")]
    Validation {
        /// Name of the object that failed validation
        object: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.dataImportCronTemplates")
        field: Option<String>,
    },

    /// Waiting for an object to go away did not finish in time
    #[error("timed out waiting for {kind} {name} to be deleted: {message}")]
    Timeout {
        /// Kind of the object being waited on
        kind: String,
        /// Name of the object being waited on
        name: String,
        /// Why the wait ended
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Process configuration error (environment, CLI flags, run mode)
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is missing or wrong
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "owner-lookup")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            object: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with object context and field path
    pub fn validation_for_field(
        object: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a timeout error for an object that was not removed in time
    pub fn timeout(kind: impl Into<String>, name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Timeout {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True when the store reported that the object (or its kind) does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Check if this error is retryable
    ///
    /// Validation, serialization and configuration errors need a spec or
    /// deployment fix. Kubernetes 4xx errors are not transient either, except
    /// 409 conflicts and 429 throttling.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae)
                    if (400..500).contains(&ae.code) && !matches!(ae.code, 409 | 429)
            ),
            Error::Validation { .. } => false,
            Error::Timeout { .. } => true,
            Error::Serialization { .. } => false,
            Error::Config { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} happened"),
            reason: reason.to_string(),
            code,
        }))
    }

    /// Story: a template name collision reports the offending field
    #[test]
    fn story_validation_error_names_field() {
        let err = Error::validation_for_field(
            "kubevirt-hyperconverged",
            "spec.dataImportCronTemplates",
            "name image2 is duplicated",
        );
        assert!(err.to_string().contains("kubevirt-hyperconverged"));
        assert!(err.to_string().contains("image2"));
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.dataImportCronTemplates"))
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(!api_error(409, "AlreadyExists").is_not_found());
        assert!(!Error::internal("boom").is_not_found());
    }

    #[test]
    fn test_kube_retryability() {
        assert!(!api_error(404, "NotFound").is_retryable());
        assert!(!api_error(403, "Forbidden").is_retryable());
        assert!(!api_error(422, "Invalid").is_retryable());
        assert!(api_error(409, "Conflict").is_retryable());
        assert!(api_error(429, "TooManyRequests").is_retryable());
        assert!(api_error(500, "InternalError").is_retryable());
        assert!(api_error(503, "ServiceUnavailable").is_retryable());
    }

    #[test]
    fn test_timeout_error() {
        let err = Error::timeout("SSP", "ssp-kubevirt-hyperconverged", "context cancelled");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("SSP"));
        assert!(err.to_string().contains("ssp-kubevirt-hyperconverged"));
    }

    #[test]
    fn test_config_and_serialization_not_retryable() {
        assert!(!Error::config("WATCH_NAMESPACE must be set").is_retryable());
        assert!(!Error::serialization("bad yaml").is_retryable());
        match Error::serialization_for_kind("DataImportCronTemplate", "missing field") {
            Error::Serialization { kind, .. } => {
                assert_eq!(kind.as_deref(), Some("DataImportCronTemplate"))
            }
            _ => panic!("Expected Serialization variant"),
        }
    }

    #[test]
    fn test_internal_error_context() {
        let err = Error::internal_with_context("owner-lookup", "no ReplicaSet owner");
        assert_eq!(err.context(), Some("owner-lookup"));
        assert!(err.to_string().contains("[owner-lookup]"));

        let err = Error::internal("unexpected");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
    }
}
