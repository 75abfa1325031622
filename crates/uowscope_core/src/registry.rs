//! Per-scope resource registry.

use crate::error::{ResourceOperation, ScopeError, ScopeResult};
use crate::notify::ChangeNotifier;
use crate::resource::{ResourceFactory, ResourceHandle, ResourceKind, TransactionHandle};
use crate::types::IsolationLevel;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A handle and its optional transaction.
struct Entry {
    kind: ResourceKind,
    handle: Box<dyn ResourceHandle>,
    transaction: Option<Box<dyn TransactionHandle>>,
}

impl Entry {
    fn persist(&mut self, notifier: &ChangeNotifier) -> ScopeResult<usize> {
        notifier.notify(self.kind, self.handle.as_ref());
        self.handle
            .persist_changes()
            .map_err(|e| ScopeError::resource(self.kind, ResourceOperation::Persist, e))
    }

    async fn persist_async(
        &mut self,
        notifier: &ChangeNotifier,
        cancel: &CancellationToken,
    ) -> ScopeResult<usize> {
        notifier.notify(self.kind, self.handle.as_ref());
        self.handle
            .persist_changes_async(cancel)
            .await
            .map_err(|e| ScopeError::resource(self.kind, ResourceOperation::Persist, e))
    }

    /// Commits and disposes the transaction, if any.
    fn commit_transaction(&mut self) -> ScopeResult<()> {
        let Some(mut transaction) = self.transaction.take() else {
            return Ok(());
        };
        let committed = transaction
            .commit()
            .map_err(|e| ScopeError::resource(self.kind, ResourceOperation::Commit, e));
        let disposed = transaction
            .dispose()
            .map_err(|e| ScopeError::resource(self.kind, ResourceOperation::Dispose, e));
        committed.and(disposed)
    }

    /// Rolls back and disposes the transaction, if any.
    fn rollback_transaction(&mut self) -> ScopeResult<()> {
        let Some(mut transaction) = self.transaction.take() else {
            return Ok(());
        };
        let rolled_back = transaction
            .rollback()
            .map_err(|e| ScopeError::resource(self.kind, ResourceOperation::Rollback, e));
        let disposed = transaction
            .dispose()
            .map_err(|e| ScopeError::resource(self.kind, ResourceOperation::Dispose, e));
        rolled_back.and(disposed)
    }

    /// Releases everything the entry still holds, logging failures.
    fn release(mut self) {
        if let Some(mut transaction) = self.transaction.take() {
            if let Err(error) = transaction.dispose() {
                warn!(resource = self.kind.name(), %error, "transaction dispose failed");
            }
        }
        if let Err(error) = self.handle.dispose() {
            warn!(resource = self.kind.name(), %error, "resource dispose failed");
        }
    }
}

/// Collects per-handle failures and surfaces the last one.
#[derive(Default)]
struct Failures {
    errors: Vec<ScopeError>,
}

impl Failures {
    fn capture<T>(&mut self, phase: &'static str, result: ScopeResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(phase, %error, "resource failure captured, continuing");
                self.errors.push(error);
                None
            }
        }
    }

    fn into_result<T>(mut self, value: T) -> ScopeResult<T> {
        match self.errors.pop() {
            Some(last) => Err(last),
            None => Ok(value),
        }
    }
}

/// Owns one handle (plus optional transaction) per resource type.
///
/// Handles are created lazily on first request and reused afterwards.
/// Commit and rollback give every handle a chance to finish: a failure is
/// captured, the remaining handles are still processed, and the last
/// captured error is returned at the end.
///
/// # Thread Safety
///
/// A registry belongs to one logical scope and is not meant to be driven
/// from several chains at once.
pub struct ResourceRegistry {
    read_only: bool,
    isolation_level: Option<IsolationLevel>,
    factory: Arc<dyn ResourceFactory>,
    notifier: ChangeNotifier,
    entries: Vec<Entry>,
    index: HashMap<TypeId, usize>,
    committed: bool,
    disposed: bool,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    pub fn new(
        factory: Arc<dyn ResourceFactory>,
        read_only: bool,
        isolation_level: Option<IsolationLevel>,
    ) -> Self {
        Self {
            read_only,
            isolation_level,
            factory,
            notifier: ChangeNotifier::new(),
            entries: Vec::new(),
            index: HashMap::new(),
            committed: false,
            disposed: false,
        }
    }

    /// Sets the change notifier invoked before each persist.
    #[must_use]
    pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Returns true if handles are opened in read-only mode.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the requested isolation level.
    #[must_use]
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }

    /// Returns true once commit or rollback ran.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Returns true once the registry was disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Returns the number of open handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no handle was opened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if a handle for `R` is open.
    #[must_use]
    pub fn contains<R: ResourceHandle>(&self) -> bool {
        self.index.contains_key(&TypeId::of::<R>())
    }

    /// Returns the open resource kinds in creation order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.entries.iter().map(|e| e.kind).collect()
    }

    /// Returns the handle for `R`, creating it on first use.
    ///
    /// A new handle is switched to read-only mode if the registry is
    /// read-only, and gets a transaction if an isolation level was
    /// requested.
    ///
    /// # Errors
    ///
    /// - [`ScopeError::Disposed`] after [`ResourceRegistry::dispose`]
    /// - [`ScopeError::Resource`] if the factory or the transaction fails
    /// - [`ScopeError::Usage`] if the factory returns another type
    pub fn get_or_create<R: ResourceHandle>(&mut self) -> ScopeResult<&mut R> {
        if self.disposed {
            return Err(ScopeError::Disposed);
        }

        let kind = ResourceKind::of::<R>();
        let position = match self.index.get(&kind.id()) {
            Some(&position) => position,
            None => self.open(kind)?,
        };

        let handle: &mut dyn ResourceHandle = self.entries[position].handle.as_mut();
        handle.as_any_mut().downcast_mut::<R>().ok_or_else(|| {
            ScopeError::usage(format!("registry entry for {kind} has another type"))
        })
    }

    /// Returns the handle for `R` if it was already created.
    pub fn get<R: ResourceHandle>(&mut self) -> Option<&mut R> {
        let position = *self.index.get(&TypeId::of::<R>())?;
        let handle: &mut dyn ResourceHandle = self.entries[position].handle.as_mut();
        handle.as_any_mut().downcast_mut::<R>()
    }

    fn open(&mut self, kind: ResourceKind) -> ScopeResult<usize> {
        let mut handle = self
            .factory
            .create(kind)
            .map_err(|e| ScopeError::resource(kind, ResourceOperation::Create, e))?;

        if (*handle).as_any().type_id() != kind.id() {
            if let Err(error) = handle.dispose() {
                warn!(resource = kind.name(), %error, "dispose of mistyped handle failed");
            }
            return Err(ScopeError::usage(format!(
                "resource factory returned a different type for {kind}"
            )));
        }

        if self.read_only {
            handle.set_auto_detect_changes(false);
        }

        let transaction = match self.isolation_level {
            Some(level) => match handle.begin_transaction(level) {
                Ok(transaction) => Some(transaction),
                Err(source) => {
                    if let Err(error) = handle.dispose() {
                        warn!(resource = kind.name(), %error, "resource dispose failed");
                    }
                    return Err(ScopeError::resource(
                        kind,
                        ResourceOperation::BeginTransaction,
                        source,
                    ));
                }
            },
            None => None,
        };

        debug!(
            resource = kind.name(),
            read_only = self.read_only,
            transactional = transaction.is_some(),
            "resource handle opened"
        );

        self.entries.push(Entry {
            kind,
            handle,
            transaction,
        });
        let position = self.entries.len() - 1;
        self.index.insert(kind.id(), position);
        Ok(position)
    }

    /// Persists every handle and commits their transactions.
    ///
    /// Read-only registries skip persisting and only commit transactions.
    /// Returns the total number of persisted entries. A no-op returning 0
    /// once committed or disposed. The registry counts as committed
    /// afterwards even when an error is returned.
    pub fn commit(&mut self) -> ScopeResult<usize> {
        if self.disposed || self.committed {
            return Ok(0);
        }

        let mut failures = Failures::default();
        let mut persisted = 0;
        for entry in &mut self.entries {
            if !self.read_only {
                match failures.capture("persist", entry.persist(&self.notifier)) {
                    Some(count) => persisted += count,
                    None => continue,
                }
            }
            failures.capture("commit", entry.commit_transaction());
        }

        self.committed = true;
        debug!(persisted, handles = self.entries.len(), "registry committed");
        failures.into_result(persisted)
    }

    /// Asynchronous [`ResourceRegistry::commit`].
    ///
    /// `cancel` is passed through to each handle's persist call only.
    pub async fn commit_async(&mut self, cancel: &CancellationToken) -> ScopeResult<usize> {
        if self.disposed || self.committed {
            return Ok(0);
        }

        let mut failures = Failures::default();
        let mut persisted = 0;
        for entry in &mut self.entries {
            if !self.read_only {
                let result = entry.persist_async(&self.notifier, cancel).await;
                match failures.capture("persist", result) {
                    Some(count) => persisted += count,
                    None => continue,
                }
            }
            failures.capture("commit", entry.commit_transaction());
        }

        self.committed = true;
        debug!(persisted, handles = self.entries.len(), "registry committed");
        failures.into_result(persisted)
    }

    /// Rolls back every open transaction.
    ///
    /// The registry counts as committed (terminal) afterwards even when an
    /// error is returned.
    pub fn rollback(&mut self) -> ScopeResult<()> {
        if self.disposed {
            return Ok(());
        }

        let mut failures = Failures::default();
        for entry in &mut self.entries {
            failures.capture("rollback", entry.rollback_transaction());
        }

        self.committed = true;
        debug!(handles = self.entries.len(), "registry rolled back");
        failures.into_result(())
    }

    /// Finalizes if needed, then disposes every handle.
    ///
    /// An uncommitted read-write registry is rolled back; an uncommitted
    /// read-only one is committed. Never fails: every error is logged.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }

        if !self.committed {
            let outcome = if self.read_only {
                self.commit().map(|_| ())
            } else {
                self.rollback()
            };
            if let Err(error) = outcome {
                warn!(%error, "finalization during registry dispose failed");
            }
        }

        for entry in self.entries.drain(..) {
            entry.release();
        }
        self.index.clear();
        self.disposed = true;
        debug!("registry disposed");
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("read_only", &self.read_only)
            .field("isolation_level", &self.isolation_level)
            .field("handles", &self.kinds())
            .field("committed", &self.committed)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}
