//! Error types for uowscope core.

use crate::resource::ResourceKind;
use std::fmt;
use thiserror::Error;

/// Error raised by an external resource or transaction handle.
pub type HandleError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for resource and transaction handle calls.
pub type HandleResult<T> = Result<T, HandleError>;

/// Result type for scope operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// The handle call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOperation {
    /// Creating the handle through the resource factory.
    Create,
    /// Opening the handle's transaction.
    BeginTransaction,
    /// Persisting pending changes.
    Persist,
    /// Committing the handle's transaction.
    Commit,
    /// Rolling back the handle's transaction.
    Rollback,
    /// Disposing the handle or its transaction.
    Dispose,
}

impl fmt::Display for ResourceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::BeginTransaction => "begin transaction",
            Self::Persist => "persist",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Dispose => "dispose",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in scope operations.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// The scope was already committed or rolled back.
    #[error(
        "scope already completed: save_changes or roll_back may run only once per scope; \
         create one scope per business transaction instead of committing mid-way"
    )]
    AlreadyCompleted,

    /// The scope was already disposed.
    #[error("scope is disposed")]
    Disposed,

    /// The scope's registry is leased out (completing or borrowed).
    #[error("scope registry is in use")]
    RegistryInUse,

    /// The API was used incorrectly.
    #[error("usage error: {message}")]
    Usage {
        /// Description of the misuse.
        message: String,
    },

    /// A resource or transaction handle failed.
    #[error("{operation} failed for resource {resource}: {source}")]
    Resource {
        /// Type name of the resource.
        resource: &'static str,
        /// The failing call.
        operation: ResourceOperation,
        /// The handle's own error.
        #[source]
        source: HandleError,
    },
}

impl ScopeError {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Wraps a handle error raised while running `operation` on `resource`.
    pub fn resource(resource: ResourceKind, operation: ResourceOperation, source: HandleError) -> Self {
        Self::Resource {
            resource: resource.name(),
            operation,
            source,
        }
    }

    /// Returns the failing operation if this is a resource error.
    #[must_use]
    pub fn operation(&self) -> Option<ResourceOperation> {
        match self {
            Self::Resource { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// Returns the handle's original error if this is a resource error.
    #[must_use]
    pub fn handle_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Resource { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    struct Orders;

    #[test]
    fn resource_error_keeps_source() {
        let err = ScopeError::resource(
            ResourceKind::of::<Orders>(),
            ResourceOperation::Persist,
            "disk full".into(),
        );
        assert_eq!(err.operation(), Some(ResourceOperation::Persist));
        assert_eq!(err.source().unwrap().to_string(), "disk full");
        assert_eq!(err.handle_error().unwrap().to_string(), "disk full");
        assert!(err.to_string().starts_with("persist failed for resource"));
        assert!(err.to_string().contains("Orders"));
    }

    #[test]
    fn usage_display() {
        let err = ScopeError::usage("isolation mismatch");
        assert_eq!(err.to_string(), "usage error: isolation mismatch");
        assert!(err.operation().is_none());
    }

    #[test]
    fn already_completed_mentions_single_commit() {
        let err = ScopeError::AlreadyCompleted;
        assert!(err.to_string().contains("only once"));
    }
}
