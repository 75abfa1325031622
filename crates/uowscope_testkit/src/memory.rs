//! In-memory resources for testing.
//!
//! A [`MemoryBackend`] holds committed rows per table plus a journal of
//! every handle call, and can be told to fail any call on any table.
//! [`MemoryResource`] is the resource handle a scope drives against it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use uowscope_core::{
    CancellationToken, ChangeKind, HandleResult, IsolationLevel, PendingChange, ResourceFactory,
    ResourceHandle, ResourceOperation, TransactionHandle, TypedResourceFactory,
};

/// Names a table of the in-memory backend.
///
/// Each table type is a distinct resource type for the registry.
pub trait Table: Send + 'static {
    /// Table name used in rows and journal entries.
    const NAME: &'static str;
}

/// The `orders` table.
#[derive(Debug)]
pub struct Orders;

/// The `inventory` table.
#[derive(Debug)]
pub struct Inventory;

/// The `audit` table.
#[derive(Debug)]
pub struct Audit;

impl Table for Orders {
    const NAME: &'static str = "orders";
}

impl Table for Inventory {
    const NAME: &'static str = "inventory";
}

impl Table for Audit {
    const NAME: &'static str = "audit";
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A handle was created.
    Created {
        /// Table name.
        table: &'static str,
    },
    /// A transaction was opened.
    TransactionBegun {
        /// Table name.
        table: &'static str,
        /// Requested isolation level.
        isolation: IsolationLevel,
    },
    /// Pending changes were persisted.
    Persisted {
        /// Table name.
        table: &'static str,
        /// Number of written rows.
        count: usize,
    },
    /// A transaction was committed.
    Committed {
        /// Table name.
        table: &'static str,
    },
    /// A transaction was rolled back.
    RolledBack {
        /// Table name.
        table: &'static str,
    },
    /// A transaction was released.
    TransactionDisposed {
        /// Table name.
        table: &'static str,
    },
    /// A handle was released.
    Disposed {
        /// Table name.
        table: &'static str,
    },
    /// A call failed by injection.
    Failed {
        /// Table name.
        table: &'static str,
        /// The failed call.
        operation: ResourceOperation,
    },
}

impl Event {
    /// Returns the table the event belongs to.
    #[must_use]
    pub fn table(&self) -> &'static str {
        match self {
            Self::Created { table }
            | Self::TransactionBegun { table, .. }
            | Self::Persisted { table, .. }
            | Self::Committed { table }
            | Self::RolledBack { table }
            | Self::TransactionDisposed { table }
            | Self::Disposed { table }
            | Self::Failed { table, .. } => *table,
        }
    }
}

/// Errors raised by in-memory handles.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// A failure injected with [`MemoryBackend::fail`].
    #[error("injected {operation} failure on {table}")]
    Injected {
        /// Table name.
        table: &'static str,
        /// The failed call.
        operation: ResourceOperation,
    },

    /// An asynchronous persist observed a cancelled token.
    #[error("persist of {table} cancelled")]
    Cancelled {
        /// Table name.
        table: &'static str,
    },
}

#[derive(Debug, Clone)]
struct Write {
    key: String,
    value: Option<String>,
}

#[derive(Default)]
struct BackendState {
    tables: HashMap<&'static str, BTreeMap<String, String>>,
    journal: Vec<Event>,
    failures: HashSet<(&'static str, ResourceOperation)>,
}

/// Shared in-memory store with a call journal and failure injection.
///
/// # Thread Safety
///
/// Clones share the same state and may be used from any thread.
///
/// # Example
///
/// ```rust
/// use uowscope_testkit::{MemoryBackend, Orders};
/// use uowscope_core::ResourceOperation;
///
/// let backend = MemoryBackend::new();
/// backend.fail::<Orders>(ResourceOperation::Persist);
/// assert!(backend.journal().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `operation` call on `T` fail.
    pub fn fail<T: Table>(&self, operation: ResourceOperation) {
        self.state.lock().failures.insert((T::NAME, operation));
    }

    /// Removes a failure injected with [`MemoryBackend::fail`].
    pub fn heal<T: Table>(&self, operation: ResourceOperation) {
        self.state.lock().failures.remove(&(T::NAME, operation));
    }

    /// Returns a copy of the journal.
    #[must_use]
    pub fn journal(&self) -> Vec<Event> {
        self.state.lock().journal.clone()
    }

    /// Returns the journal entries of `T`.
    #[must_use]
    pub fn events<T: Table>(&self) -> Vec<Event> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|e| e.table() == T::NAME)
            .cloned()
            .collect()
    }

    /// Counts the journal entries matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.state.lock().journal.iter().filter(|e| predicate(e)).count()
    }

    /// Number of persist calls that succeeded on `T`.
    #[must_use]
    pub fn persists<T: Table>(&self) -> usize {
        self.count(|e| matches!(e, Event::Persisted { table, .. } if *table == T::NAME))
    }

    /// Number of transaction commits on `T`.
    #[must_use]
    pub fn commits<T: Table>(&self) -> usize {
        self.count(|e| matches!(e, Event::Committed { table } if *table == T::NAME))
    }

    /// Number of transaction rollbacks on `T`.
    #[must_use]
    pub fn rollbacks<T: Table>(&self) -> usize {
        self.count(|e| matches!(e, Event::RolledBack { table } if *table == T::NAME))
    }

    /// Number of handle creations for `T`.
    #[must_use]
    pub fn creations<T: Table>(&self) -> usize {
        self.count(|e| matches!(e, Event::Created { table } if *table == T::NAME))
    }

    /// Number of handle disposals for `T`.
    #[must_use]
    pub fn disposals<T: Table>(&self) -> usize {
        self.count(|e| matches!(e, Event::Disposed { table } if *table == T::NAME))
    }

    /// Returns the committed rows of `T`.
    #[must_use]
    pub fn rows<T: Table>(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .tables
            .get(T::NAME)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns one committed row of `T`.
    #[must_use]
    pub fn row<T: Table>(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .tables
            .get(T::NAME)
            .and_then(|rows| rows.get(key).cloned())
    }

    /// Returns a factory for [`Orders`], [`Inventory`] and [`Audit`].
    #[must_use]
    pub fn resource_factory(&self) -> Arc<dyn ResourceFactory> {
        Arc::new(self.typed_factory())
    }

    /// Returns the typed factory behind [`MemoryBackend::resource_factory`],
    /// for callers that register further resources.
    #[must_use]
    pub fn typed_factory(&self) -> TypedResourceFactory {
        TypedResourceFactory::new()
            .with(self.opener::<Orders>())
            .with(self.opener::<Inventory>())
            .with(self.opener::<Audit>())
    }

    fn opener<T: Table>(
        &self,
    ) -> impl Fn() -> HandleResult<MemoryResource<T>> + Send + Sync + 'static {
        let backend = self.clone();
        move || MemoryResource::open(&backend)
    }

    fn record(&self, event: Event) {
        self.state.lock().journal.push(event);
    }

    fn check(&self, table: &'static str, operation: ResourceOperation) -> HandleResult<()> {
        let mut state = self.state.lock();
        if state.failures.contains(&(table, operation)) {
            state.journal.push(Event::Failed { table, operation });
            return Err(Box::new(MemoryError::Injected { table, operation }));
        }
        Ok(())
    }

    fn apply(&self, table: &'static str, writes: Vec<Write>) {
        let mut state = self.state.lock();
        let rows = state.tables.entry(table).or_default();
        for write in writes {
            match write.value {
                Some(value) => rows.insert(write.key, value),
                None => rows.remove(&write.key),
            };
        }
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBackend")
            .field("tables", &state.tables.len())
            .field("journal", &state.journal.len())
            .field("failures", &state.failures.len())
            .finish()
    }
}

/// Rows written inside an open transaction, applied on commit.
type TransactionBuffer = Arc<Mutex<Vec<Write>>>;

/// Resource handle for table `T`.
///
/// Writes are staged until persisted. With an open transaction, persisted
/// rows become visible in the backend only on commit.
pub struct MemoryResource<T> {
    backend: MemoryBackend,
    staged: Vec<(PendingChange, Write)>,
    auto_detect: bool,
    transaction: Option<TransactionBuffer>,
    _table: PhantomData<fn() -> T>,
}

impl<T: Table> MemoryResource<T> {
    fn open(backend: &MemoryBackend) -> HandleResult<Self> {
        backend.check(T::NAME, ResourceOperation::Create)?;
        backend.record(Event::Created { table: T::NAME });
        Ok(Self {
            backend: backend.clone(),
            staged: Vec::new(),
            auto_detect: true,
            transaction: None,
            _table: PhantomData,
        })
    }

    /// Stages an insert or update of `key`.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let kind = if self.backend.row::<T>(&key).is_some() {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        self.staged.push((
            PendingChange::new(key.clone(), kind),
            Write {
                key,
                value: Some(value.into()),
            },
        ));
    }

    /// Stages a removal of `key`.
    pub fn delete(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.staged.push((
            PendingChange::deleted(key.clone()),
            Write { key, value: None },
        ));
    }

    /// Reads a committed row.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.backend.row::<T>(key)
    }

    /// Returns the number of staged writes.
    #[must_use]
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Returns true unless a read-only registry switched detection off.
    #[must_use]
    pub fn auto_detect_changes(&self) -> bool {
        self.auto_detect
    }

    /// Returns true if the handle runs inside a transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

#[async_trait]
impl<T: Table> ResourceHandle for MemoryResource<T> {
    fn persist_changes(&mut self) -> HandleResult<usize> {
        self.backend.check(T::NAME, ResourceOperation::Persist)?;
        let writes: Vec<Write> = self.staged.drain(..).map(|(_, write)| write).collect();
        let count = writes.len();
        match &self.transaction {
            Some(buffer) => buffer.lock().extend(writes),
            None => self.backend.apply(T::NAME, writes),
        }
        self.backend.record(Event::Persisted {
            table: T::NAME,
            count,
        });
        Ok(count)
    }

    async fn persist_changes_async(&mut self, cancel: &CancellationToken) -> HandleResult<usize> {
        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            return Err(Box::new(MemoryError::Cancelled { table: T::NAME }));
        }
        self.persist_changes()
    }

    fn begin_transaction(
        &mut self,
        isolation: IsolationLevel,
    ) -> HandleResult<Box<dyn TransactionHandle>> {
        self.backend
            .check(T::NAME, ResourceOperation::BeginTransaction)?;
        let buffer = TransactionBuffer::default();
        self.transaction = Some(Arc::clone(&buffer));
        self.backend.record(Event::TransactionBegun {
            table: T::NAME,
            isolation,
        });
        Ok(Box::new(MemoryTransaction {
            table: T::NAME,
            backend: self.backend.clone(),
            buffer,
        }))
    }

    fn set_auto_detect_changes(&mut self, enabled: bool) {
        self.auto_detect = enabled;
    }

    fn pending_changes(&self) -> Vec<PendingChange> {
        self.staged.iter().map(|(change, _)| change.clone()).collect()
    }

    fn dispose(&mut self) -> HandleResult<()> {
        self.backend.check(T::NAME, ResourceOperation::Dispose)?;
        self.staged.clear();
        self.backend.record(Event::Disposed { table: T::NAME });
        Ok(())
    }
}

impl<T: Table> fmt::Debug for MemoryResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryResource")
            .field("table", &T::NAME)
            .field("staged", &self.staged.len())
            .field("auto_detect", &self.auto_detect)
            .field("in_transaction", &self.transaction.is_some())
            .finish()
    }
}

struct MemoryTransaction {
    table: &'static str,
    backend: MemoryBackend,
    buffer: TransactionBuffer,
}

impl TransactionHandle for MemoryTransaction {
    fn commit(&mut self) -> HandleResult<()> {
        self.backend.check(self.table, ResourceOperation::Commit)?;
        let writes = std::mem::take(&mut *self.buffer.lock());
        self.backend.apply(self.table, writes);
        self.backend.record(Event::Committed { table: self.table });
        Ok(())
    }

    fn rollback(&mut self) -> HandleResult<()> {
        self.backend.check(self.table, ResourceOperation::Rollback)?;
        self.buffer.lock().clear();
        self.backend.record(Event::RolledBack { table: self.table });
        Ok(())
    }

    fn dispose(&mut self) -> HandleResult<()> {
        self.buffer.lock().clear();
        self.backend
            .record(Event::TransactionDisposed { table: self.table });
        Ok(())
    }
}
