//! Read-only view over an ambient scope.

use super::AmbientScope;
use crate::error::ScopeResult;
use crate::resource::ResourceHandle;
use crate::types::{IsolationLevel, ScopeId};

/// A scope that never persists.
///
/// Handles are opened with change detection off, and the last release rolls
/// back instead of committing. No save or rollback operation is exposed.
#[derive(Debug)]
pub struct ReadOnlyScope {
    inner: AmbientScope,
}

impl ReadOnlyScope {
    pub(crate) fn new(inner: AmbientScope) -> Self {
        debug_assert!(inner.is_read_only());
        Self { inner }
    }

    /// Returns the scope's ID.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.inner.id()
    }

    /// Returns the isolation level of the scope's transactions.
    #[must_use]
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.inner.isolation_level()
    }

    /// Returns the number of outstanding references.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.inner.ref_count()
    }

    /// Returns true once the scope was finalized.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Returns true if both values reference the same scope.
    #[must_use]
    pub fn same_scope(&self, other: &ReadOnlyScope) -> bool {
        self.inner.same_scope(&other.inner)
    }

    /// Runs `f` on the scope's handle for `R`, creating it on first use.
    pub fn with_resource<R, T>(&self, f: impl FnOnce(&mut R) -> T) -> ScopeResult<T>
    where
        R: ResourceHandle,
    {
        self.inner.with_resource(f)
    }

    /// Adds another reference to this scope.
    pub fn join(&self) -> ScopeResult<ReadOnlyScope> {
        self.inner.join().map(Self::new)
    }

    /// Releases this reference, rolling back on the last.
    pub fn dispose(self) {
        self.inner.dispose();
    }

    /// Asynchronous [`ReadOnlyScope::dispose`].
    pub async fn dispose_async(self) {
        self.inner.dispose_async().await;
    }
}
