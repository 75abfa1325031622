//! State shared by every reference to one scope.

use crate::error::{ScopeError, ScopeResult};
use crate::registry::ResourceRegistry;
use crate::types::{IsolationLevel, ScopeId};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uowscope_context::{CallContext, ScopeKey, ScopeStore};

/// Fixed attributes of a scope.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScopeSettings {
    pub(crate) key: ScopeKey,
    pub(crate) read_only: bool,
    pub(crate) orphan: bool,
    pub(crate) isolation_level: Option<IsolationLevel>,
}

/// Weak reference to a scope as kept in the ambient store.
#[derive(Clone)]
pub(crate) struct ScopeSlot(Weak<ScopeShared>);

impl ScopeSlot {
    pub(crate) fn of(shared: &Arc<ScopeShared>) -> Self {
        Self(Arc::downgrade(shared))
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<ScopeShared>> {
        self.0.upgrade()
    }

    fn is_joinable(&self) -> bool {
        self.upgrade().is_some_and(|shared| shared.is_joinable())
    }
}

/// A registry leased out of the scope state.
///
/// Dropping the lease puts the registry back, also when the access panicked
/// or an async commit was cancelled mid-way.
struct RegistryLease<'a> {
    shared: &'a ScopeShared,
    registry: Option<ResourceRegistry>,
    completes: bool,
}

impl RegistryLease<'_> {
    fn registry(&mut self) -> ScopeResult<&mut ResourceRegistry> {
        self.registry.as_mut().ok_or(ScopeError::RegistryInUse)
    }
}

impl Drop for RegistryLease<'_> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            self.shared.restore(registry, self.completes);
        }
    }
}

/// Finalization in progress; dropping it disposes the registry and marks
/// the scope disposed.
struct Finalizing<'a> {
    shared: &'a Arc<ScopeShared>,
    completed: bool,
    registry: Option<ResourceRegistry>,
}

impl Drop for Finalizing<'_> {
    fn drop(&mut self) {
        if let Some(mut registry) = self.registry.take() {
            registry.dispose();
        }
        self.shared.end_finalize();
    }
}

impl PartialEq for ScopeSlot {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

struct ScopeState {
    ref_count: usize,
    completed: bool,
    disposed: bool,
    /// `None` while leased out for completion or resource access.
    registry: Option<ResourceRegistry>,
}

/// Reference-counted core of a scope.
pub(crate) struct ScopeShared {
    pub(crate) id: ScopeId,
    pub(crate) settings: ScopeSettings,
    /// Carrier the scope is registered in; `None` for orphans.
    home: Option<CallContext>,
    /// Scope this one shadows in `home`, restored on teardown.
    shadowed: Option<ScopeSlot>,
    state: Mutex<ScopeState>,
}

impl ScopeShared {
    /// Creates a scope with one reference.
    ///
    /// Non-orphans are registered in `home` under their key.
    pub(crate) fn create(
        settings: ScopeSettings,
        registry: ResourceRegistry,
        home: Option<CallContext>,
    ) -> Arc<Self> {
        let home = if settings.orphan { None } else { home };
        let shadowed = home
            .as_ref()
            .and_then(|context| ScopeStore::<ScopeSlot>::get_in(context, settings.key))
            .filter(ScopeSlot::is_joinable);

        let shared = Arc::new(Self {
            id: ScopeId::next(),
            settings,
            home,
            shadowed,
            state: Mutex::new(ScopeState {
                ref_count: 1,
                completed: false,
                disposed: false,
                registry: Some(registry),
            }),
        });

        if let Some(context) = &shared.home {
            ScopeStore::set_in(context, settings.key, ScopeSlot::of(&shared));
        }
        debug!(
            scope = %shared.id,
            read_only = settings.read_only,
            orphan = settings.orphan,
            shadowing = shared.shadowed.is_some(),
            "scope created"
        );
        shared
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.state.lock().ref_count
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub(crate) fn is_joinable(&self) -> bool {
        let state = self.state.lock();
        !state.disposed && state.ref_count > 0
    }

    pub(crate) fn can_roll_back_or_commit(&self) -> bool {
        let state = self.state.lock();
        !state.disposed && !state.completed
    }

    /// Adds a reference. Returns false if the scope can no longer be joined.
    pub(crate) fn try_join(&self) -> bool {
        let mut state = self.state.lock();
        if state.disposed || state.ref_count == 0 {
            return false;
        }
        state.ref_count += 1;
        debug!(scope = %self.id, ref_count = state.ref_count, "scope joined");
        true
    }

    /// Runs `f` on the registry.
    ///
    /// The registry is taken out of the lock for the duration of `f`, so a
    /// nested access from inside `f` fails with
    /// [`ScopeError::RegistryInUse`] instead of deadlocking. The registry
    /// is put back even if `f` panics.
    pub(crate) fn with_registry<T>(
        &self,
        f: impl FnOnce(&mut ResourceRegistry) -> T,
    ) -> ScopeResult<T> {
        let registry = {
            let mut state = self.state.lock();
            if state.disposed {
                return Err(ScopeError::Disposed);
            }
            state.registry.take().ok_or(ScopeError::RegistryInUse)?
        };
        let mut lease = self.lease(registry, false);
        Ok(f(lease.registry()?))
    }

    fn lease(&self, registry: ResourceRegistry, completes: bool) -> RegistryLease<'_> {
        RegistryLease {
            shared: self,
            registry: Some(registry),
            completes,
        }
    }

    fn restore(&self, registry: ResourceRegistry, completed: bool) {
        let mut state = self.state.lock();
        if completed {
            state.completed = true;
        }
        if state.disposed {
            drop(state);
            drop(registry);
            return;
        }
        state.registry = Some(registry);
    }

    /// Takes the registry for a commit or rollback.
    ///
    /// Returns `None` for a delayed commit: other references still hold
    /// the scope, so the last one finalizes.
    fn begin_completion(&self, delayable: bool) -> ScopeResult<Option<ResourceRegistry>> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ScopeError::Disposed);
        }
        if state.completed {
            return Err(ScopeError::AlreadyCompleted);
        }
        if delayable && state.ref_count > 1 {
            debug!(scope = %self.id, ref_count = state.ref_count, "commit delayed to outermost reference");
            return Ok(None);
        }
        state
            .registry
            .take()
            .map(Some)
            .ok_or(ScopeError::RegistryInUse)
    }

    pub(crate) fn save_changes(&self) -> ScopeResult<usize> {
        let Some(registry) = self.begin_completion(true)? else {
            return Ok(0);
        };
        self.lease(registry, true).registry()?.commit()
    }

    pub(crate) async fn save_changes_async(&self, cancel: &CancellationToken) -> ScopeResult<usize> {
        let Some(registry) = self.begin_completion(true)? else {
            return Ok(0);
        };
        let mut lease = self.lease(registry, true);
        lease.registry()?.commit_async(cancel).await
    }

    pub(crate) fn roll_back(&self) -> ScopeResult<()> {
        let Some(registry) = self.begin_completion(false)? else {
            return Ok(());
        };
        self.lease(registry, true).registry()?.rollback()
    }

    /// Drops one reference. Returns true if it was the last one.
    fn release_one(&self) -> bool {
        let mut state = self.state.lock();
        if state.disposed || state.ref_count == 0 {
            return false;
        }
        state.ref_count -= 1;
        debug!(scope = %self.id, ref_count = state.ref_count, "scope reference released");
        state.ref_count == 0
    }

    /// Collapses every outstanding reference. Returns false if already
    /// disposed.
    fn collapse(&self) -> bool {
        let mut state = self.state.lock();
        if state.disposed {
            return false;
        }
        if state.ref_count > 1 {
            debug!(scope = %self.id, ref_count = state.ref_count, "collapsing outstanding references");
        }
        state.ref_count = 0;
        true
    }

    /// Releases one reference, finalizing on the last. Never fails.
    pub(crate) fn release(self: &Arc<Self>) {
        if !self.release_one() {
            return;
        }
        if let Err(error) = self.finalize() {
            warn!(scope = %self.id, %error, "finalization during dispose failed");
        }
    }

    /// Asynchronous [`ScopeShared::release`].
    pub(crate) async fn release_async(self: &Arc<Self>) {
        if !self.release_one() {
            return;
        }
        if let Err(error) = self.finalize_async().await {
            warn!(scope = %self.id, %error, "finalization during dispose failed");
        }
    }

    /// Finalizes regardless of outstanding references.
    pub(crate) fn force_release(self: &Arc<Self>) -> ScopeResult<usize> {
        if !self.collapse() {
            return Ok(0);
        }
        self.finalize()
    }

    /// Asynchronous [`ScopeShared::force_release`].
    pub(crate) async fn force_release_async(self: &Arc<Self>) -> ScopeResult<usize> {
        if !self.collapse() {
            return Ok(0);
        }
        self.finalize_async().await
    }

    fn finalize(self: &Arc<Self>) -> ScopeResult<usize> {
        let mut finalizing = self.begin_finalize();
        let completed = finalizing.completed;
        let registry = finalizing
            .registry
            .as_mut()
            .ok_or(ScopeError::RegistryInUse)?;
        if completed {
            Ok(0)
        } else if self.settings.read_only {
            registry.rollback().map(|()| 0)
        } else {
            registry.commit()
        }
    }

    async fn finalize_async(self: &Arc<Self>) -> ScopeResult<usize> {
        let mut finalizing = self.begin_finalize();
        let completed = finalizing.completed;
        let registry = finalizing
            .registry
            .as_mut()
            .ok_or(ScopeError::RegistryInUse)?;
        if completed {
            Ok(0)
        } else if self.settings.read_only {
            registry.rollback().map(|()| 0)
        } else {
            registry.commit_async(&CancellationToken::new()).await
        }
    }

    fn begin_finalize<'a>(self: &'a Arc<Self>) -> Finalizing<'a> {
        let mut state = self.state.lock();
        Finalizing {
            shared: self,
            completed: state.completed,
            registry: state.registry.take(),
        }
    }

    fn end_finalize(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.completed = true;
            state.disposed = true;
            state.ref_count = 0;
        }
        self.unregister();
        debug!(scope = %self.id, "scope disposed");
    }

    /// Removes this scope from its home carrier, restoring a shadowed scope
    /// that is still alive.
    fn unregister(self: &Arc<Self>) {
        let Some(home) = &self.home else {
            return;
        };
        let key = self.settings.key;
        let me = ScopeSlot::of(self);
        let restored = self
            .shadowed
            .as_ref()
            .filter(|previous| previous.is_joinable())
            .is_some_and(|previous| {
                ScopeStore::compare_and_swap_in(home, key, previous.clone(), &me)
            });
        if !restored {
            ScopeStore::remove_if_in(home, key, &me);
        }
    }
}
