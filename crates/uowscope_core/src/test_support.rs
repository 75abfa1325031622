//! Recording resource doubles for unit tests.

use crate::error::HandleResult;
use crate::notify::PendingChange;
use crate::resource::{ResourceFactory, ResourceHandle, TransactionHandle, TypedResourceFactory};
use crate::types::IsolationLevel;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Shared event log and failure switches.
#[derive(Clone, Default)]
pub(crate) struct Ledger {
    events: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<HashSet<String>>>,
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, event: String) {
        self.events.lock().push(event);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Makes the event `point` (e.g. `persist:probe1`) fail from now on.
    pub(crate) fn fail(&self, point: &str) {
        self.failures.lock().insert(point.to_string());
    }

    fn check(&self, point: String) -> HandleResult<()> {
        let failing = self.failures.lock().contains(&point);
        self.record(point.clone());
        if failing {
            Err(format!("{point} failed").into())
        } else {
            Ok(())
        }
    }

    /// Factory for `Probe<1>` and `Probe<2>`.
    pub(crate) fn factory(&self) -> Arc<dyn ResourceFactory> {
        let one = self.clone();
        let two = self.clone();
        Arc::new(
            TypedResourceFactory::new()
                .with(move || Ok(Probe::<1>::new(&one)))
                .with(move || Ok(Probe::<2>::new(&two))),
        )
    }
}

/// Resource double; `N` makes distinct resource types.
pub(crate) struct Probe<const N: usize> {
    ledger: Ledger,
    pending: Vec<PendingChange>,
    auto_detect: bool,
}

impl<const N: usize> Probe<N> {
    pub(crate) fn new(ledger: &Ledger) -> Self {
        ledger.record(format!("create:probe{N}"));
        Self {
            ledger: ledger.clone(),
            pending: Vec::new(),
            auto_detect: true,
        }
    }

    pub(crate) fn add(&mut self, entity: &str) {
        self.pending.push(PendingChange::added(entity));
    }

    pub(crate) fn modify(&mut self, entity: &str) {
        self.pending.push(PendingChange::modified(entity));
    }

    pub(crate) fn auto_detect(&self) -> bool {
        self.auto_detect
    }
}

impl<const N: usize> ResourceHandle for Probe<N> {
    fn persist_changes(&mut self) -> HandleResult<usize> {
        self.ledger.check(format!("persist:probe{N}"))?;
        let count = self.pending.len();
        self.pending.clear();
        Ok(count)
    }

    fn begin_transaction(
        &mut self,
        isolation: IsolationLevel,
    ) -> HandleResult<Box<dyn TransactionHandle>> {
        self.ledger.check(format!("begin:probe{N}:{isolation}"))?;
        Ok(Box::new(ProbeTransaction {
            name: format!("probe{N}"),
            ledger: self.ledger.clone(),
        }))
    }

    fn set_auto_detect_changes(&mut self, enabled: bool) {
        self.auto_detect = enabled;
    }

    fn pending_changes(&self) -> Vec<PendingChange> {
        self.pending.clone()
    }

    fn dispose(&mut self) -> HandleResult<()> {
        self.ledger.check(format!("dispose:probe{N}"))
    }
}

struct ProbeTransaction {
    name: String,
    ledger: Ledger,
}

impl TransactionHandle for ProbeTransaction {
    fn commit(&mut self) -> HandleResult<()> {
        self.ledger.check(format!("commit:{}", self.name))
    }

    fn rollback(&mut self) -> HandleResult<()> {
        self.ledger.check(format!("rollback:{}", self.name))
    }

    fn dispose(&mut self) -> HandleResult<()> {
        self.ledger.check(format!("tx-dispose:{}", self.name))
    }
}
