//! Core type definitions for uowscope.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one scope instance, used in logs.
///
/// Scope IDs are monotonically increasing and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub u64);

impl ScopeId {
    /// Creates a scope ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide scope ID.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope:{}", self.0)
    }
}

/// How a factory call relates to the ambient scope of the call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Ignore any ambient scope and never register the new one (orphan).
    CreateNewAlways,
    /// Create a new scope and register it, shadowing the ambient one until
    /// the new scope is torn down.
    CreateNewAlwaysScoped,
    /// Join the ambient scope if one exists, else create and register one.
    #[default]
    JoinIfExists,
}

/// Transaction isolation level requested for every resource handle of a
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Level left to the resource.
    Unspecified,
    /// Pending changes of more isolated transactions cannot be overwritten.
    Chaos,
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is read.
    ReadCommitted,
    /// Read rows stay stable for the transaction.
    RepeatableRead,
    /// Full serializability.
    Serializable,
    /// Reads see a snapshot taken at transaction start.
    Snapshot,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unspecified => "unspecified",
            Self::Chaos => "chaos",
            Self::ReadUncommitted => "read uncommitted",
            Self::ReadCommitted => "read committed",
            Self::RepeatableRead => "repeatable read",
            Self::Serializable => "serializable",
            Self::Snapshot => "snapshot",
        };
        f.write_str(name)
    }
}
