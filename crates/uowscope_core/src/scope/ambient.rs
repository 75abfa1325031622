//! The reference-counted ambient scope.

use super::shared::{ScopeShared, ScopeSlot};
use super::UnitOfWork;
use crate::error::{ScopeError, ScopeResult};
use crate::registry::ResourceRegistry;
use crate::resource::ResourceHandle;
use crate::types::{IsolationLevel, ScopeId};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One reference to a shared unit-of-work scope.
///
/// Every value returned by the factory (new or joined) counts as one
/// reference. Releasing a reference ([`AmbientScope::dispose`], its async
/// twin, or dropping the value) decrements the count; the release that
/// brings it to zero finalizes the scope:
///
/// 1. commits (read-write) or rolls back (read-only), unless already
///    completed through [`AmbientScope::save_changes`] or
///    [`AmbientScope::roll_back`]
/// 2. disposes every resource handle
/// 3. removes the scope from the ambient store
///
/// Errors raised while finalizing on release are logged, never returned.
/// Use [`AmbientScope::force_dispose`] to observe them.
///
/// # Example
///
/// ```rust,ignore
/// let scope = factory.create()?;
/// scope.with_resource(|orders: &mut OrdersStore| orders.add(order))?;
/// scope.save_changes()?; // returns 0 while an outer caller still holds the scope
/// scope.dispose();
/// ```
pub struct AmbientScope {
    shared: Arc<ScopeShared>,
    released: bool,
}

impl AmbientScope {
    pub(crate) fn from_shared(shared: Arc<ScopeShared>) -> Self {
        Self {
            shared,
            released: false,
        }
    }

    /// Joins `shared` if it still accepts references.
    pub(crate) fn join_shared(shared: Arc<ScopeShared>) -> Option<Self> {
        shared.try_join().then(|| Self::from_shared(shared))
    }

    pub(crate) fn slot(&self) -> ScopeSlot {
        ScopeSlot::of(&self.shared)
    }

    /// Returns the scope's ID.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.shared.id
    }

    /// Returns true for read-only scopes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.shared.settings.read_only
    }

    /// Returns true if the scope was never registered in the ambient store.
    #[must_use]
    pub fn is_orphan(&self) -> bool {
        self.shared.settings.orphan
    }

    /// Returns the isolation level of the scope's transactions.
    #[must_use]
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.shared.settings.isolation_level
    }

    /// Returns the number of outstanding references.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.shared.ref_count()
    }

    /// Returns true once a commit or rollback ran.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.shared.is_completed()
    }

    /// Returns true once the scope was finalized.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Returns true if both values reference the same scope.
    #[must_use]
    pub fn same_scope(&self, other: &AmbientScope) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Runs `f` on the scope's handle for `R`, creating it on first use.
    ///
    /// `f` must not access this scope again; nested access fails with
    /// [`ScopeError::RegistryInUse`].
    pub fn with_resource<R, T>(&self, f: impl FnOnce(&mut R) -> T) -> ScopeResult<T>
    where
        R: ResourceHandle,
    {
        self.shared
            .with_registry(|registry| registry.get_or_create::<R>().map(f))?
    }

    /// Runs `f` on the scope's registry.
    pub fn with_registry<T>(&self, f: impl FnOnce(&mut ResourceRegistry) -> T) -> ScopeResult<T> {
        self.shared.with_registry(f)
    }

    /// Commits every handle of the scope.
    ///
    /// While other references are outstanding this is a delayed commit: it
    /// returns 0 and leaves persistence to the last reference.
    ///
    /// # Errors
    ///
    /// - [`ScopeError::Disposed`] if the scope was finalized
    /// - [`ScopeError::AlreadyCompleted`] on a second commit or rollback
    /// - the last handle failure, after every handle had its attempt
    pub fn save_changes(&self) -> ScopeResult<usize> {
        self.shared.save_changes()
    }

    /// Asynchronous [`AmbientScope::save_changes`].
    pub async fn save_changes_async(&self, cancel: &CancellationToken) -> ScopeResult<usize> {
        self.shared.save_changes_async(cancel).await
    }

    /// Rolls back every handle's transaction, regardless of outstanding
    /// references.
    pub fn roll_back(&self) -> ScopeResult<()> {
        self.shared.roll_back()
    }

    /// Returns true while neither disposed nor completed.
    #[must_use]
    pub fn can_roll_back_or_commit(&self) -> bool {
        self.shared.can_roll_back_or_commit()
    }

    /// Adds another reference to this scope.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Disposed`] if the scope was finalized.
    pub fn join(&self) -> ScopeResult<AmbientScope> {
        Self::join_shared(Arc::clone(&self.shared)).ok_or(ScopeError::Disposed)
    }

    /// Releases this reference, finalizing the scope if it was the last.
    pub fn dispose(mut self) {
        self.released = true;
        self.shared.release();
    }

    /// Asynchronous [`AmbientScope::dispose`]; commits through the async
    /// persistence path.
    pub async fn dispose_async(mut self) {
        self.released = true;
        self.shared.release_async().await;
    }

    /// Finalizes the scope now, collapsing every outstanding reference.
    ///
    /// Returns the number of persisted entries, or the commit failure.
    /// A no-op returning 0 if the scope is already disposed.
    pub fn force_dispose(mut self) -> ScopeResult<usize> {
        self.released = true;
        self.shared.force_release()
    }

    /// Asynchronous [`AmbientScope::force_dispose`].
    pub async fn force_dispose_async(mut self) -> ScopeResult<usize> {
        self.released = true;
        self.shared.force_release_async().await
    }
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.release();
        }
    }
}

impl fmt::Debug for AmbientScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientScope")
            .field("id", &self.shared.id)
            .field("read_only", &self.shared.settings.read_only)
            .field("orphan", &self.shared.settings.orphan)
            .field("ref_count", &self.shared.ref_count())
            .field("completed", &self.shared.is_completed())
            .field("disposed", &self.shared.is_disposed())
            .finish()
    }
}

#[async_trait]
impl UnitOfWork for AmbientScope {
    fn save_changes(&self) -> ScopeResult<usize> {
        AmbientScope::save_changes(self)
    }

    async fn save_changes_async(&self, cancel: &CancellationToken) -> ScopeResult<usize> {
        AmbientScope::save_changes_async(self, cancel).await
    }

    fn roll_back(&self) -> ScopeResult<()> {
        AmbientScope::roll_back(self)
    }

    fn can_roll_back_or_commit(&self) -> bool {
        AmbientScope::can_roll_back_or_commit(self)
    }

    fn into_ambient(self: Box<Self>) -> Result<AmbientScope, Box<dyn UnitOfWork>> {
        Ok(*self)
    }
}
