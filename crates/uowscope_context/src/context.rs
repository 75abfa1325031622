//! Call-chain carrier.

use crate::key::ScopeKey;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// A type-erased slot value.
pub(crate) type SlotValue = Arc<dyn Any + Send + Sync>;

tokio::task_local! {
    static TASK_CONTEXT: CallContext;
}

thread_local! {
    static THREAD_CONTEXT: CallContext = CallContext::new();
}

/// The ambient slots of one logical call chain.
///
/// A `CallContext` is a cheap handle: clones share the same slots. Code
/// running inside [`CallContext::scope`] (or [`CallContext::sync_scope`])
/// sees this carrier through [`CallContext::current`]. Synchronous code
/// outside any scope and outside a tokio runtime uses its OS thread's
/// carrier, so each thread acts as its own call chain.
///
/// # Async chains
///
/// Code running on a tokio runtime has a carrier only when it was started
/// through [`CallContext::scope`], [`spawn_in_context`] or
/// [`spawn_detached`]. Worker threads are shared by unrelated tasks, so an
/// unscoped task never falls back to its thread's carrier:
/// [`CallContext::try_current`] returns `None` there.
#[derive(Clone, Default)]
pub struct CallContext {
    slots: Arc<RwLock<HashMap<ScopeKey, SlotValue>>>,
}

impl CallContext {
    /// Creates an empty carrier for a new, unrelated call chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the carrier of the running call chain, if it has one.
    ///
    /// Returns `None` for code on a tokio runtime that was not started
    /// inside a task-scoped carrier.
    #[must_use]
    pub fn try_current() -> Option<Self> {
        if let Ok(context) = TASK_CONTEXT.try_with(Clone::clone) {
            return Some(context);
        }
        if Handle::try_current().is_ok() {
            return None;
        }
        THREAD_CONTEXT.try_with(Clone::clone).ok()
    }

    /// Returns the carrier of the running call chain.
    ///
    /// Where [`CallContext::try_current`] finds none, this is a fresh empty
    /// carrier that nothing else observes.
    #[must_use]
    pub fn current() -> Self {
        Self::try_current().unwrap_or_else(|| {
            trace!("no call context for this task, using a detached carrier");
            Self::new()
        })
    }

    /// Returns true if the caller runs inside a task-scoped carrier.
    #[must_use]
    pub fn is_task_scoped() -> bool {
        TASK_CONTEXT.try_with(|_| ()).is_ok()
    }

    /// Runs `future` with this carrier as the current one.
    ///
    /// The carrier stays installed across every `.await` inside `future`.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        TASK_CONTEXT.scope(self, future).await
    }

    /// Runs `f` synchronously with this carrier as the current one.
    pub fn sync_scope<F, R>(self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        TASK_CONTEXT.sync_scope(self, f)
    }

    /// Snapshots this carrier for a child continuation.
    ///
    /// The child starts with every value present now. Writes made later on
    /// either side are not visible to the other.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            slots: Arc::new(RwLock::new(self.slots.read().clone())),
        }
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns true if no slot is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Returns true if both handles share the same slots.
    #[must_use]
    pub fn same_chain(&self, other: &CallContext) -> bool {
        Arc::ptr_eq(&self.slots, &other.slots)
    }

    pub(crate) fn slot(&self, key: ScopeKey) -> Option<SlotValue> {
        self.slots.read().get(&key).cloned()
    }

    pub(crate) fn insert(&self, key: ScopeKey, value: SlotValue) {
        self.slots.write().insert(key, value);
    }

    pub(crate) fn remove(&self, key: ScopeKey) -> bool {
        self.slots.write().remove(&key).is_some()
    }

    /// Runs `f` under the write lock so read-modify-write stays atomic.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut HashMap<ScopeKey, SlotValue>) -> R) -> R {
        f(&mut self.slots.write())
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("slots", &self.len())
            .finish()
    }
}

/// Spawns a child continuation of the current call chain.
///
/// The task runs with a fork of [`CallContext::current`], so it observes the
/// caller's ambient values without being able to change them.
pub fn spawn_in_context<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let context = CallContext::current().fork();
    tokio::spawn(context.scope(future))
}

/// Spawns a task as a new, unrelated call chain with empty slots.
pub fn spawn_detached<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(CallContext::new().scope(future))
}
