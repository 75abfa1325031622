//! A change subscriber that records what it is told.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uowscope_core::{ChangeKind, ChangeSubscriber, HandleResult, PendingChange, ResourceKind};

/// One received notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Type name of the notifying resource.
    pub resource: &'static str,
    /// Changed entity.
    pub entity: String,
    /// Kind of change.
    pub kind: ChangeKind,
}

/// Records every notification; optionally fails after recording.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    received: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingSubscriber {
    /// Creates a subscriber that accepts every notification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a subscriber that returns an error for every notification.
    #[must_use]
    pub fn failing() -> Self {
        let subscriber = Self::default();
        subscriber.set_failing(true);
        subscriber
    }

    /// Switches failure mode on or off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns the received notifications.
    #[must_use]
    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }

    /// Returns the entities received with `kind`.
    #[must_use]
    pub fn entities(&self, kind: ChangeKind) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter(|n| n.kind == kind)
            .map(|n| n.entity.clone())
            .collect()
    }

    fn record(&self, resource: ResourceKind, change: &PendingChange) -> HandleResult<()> {
        self.received.lock().push(Notification {
            resource: resource.name(),
            entity: change.entity.clone(),
            kind: change.kind,
        });
        if self.failing.load(Ordering::SeqCst) {
            return Err(format!("subscriber rejected {}", change.entity).into());
        }
        Ok(())
    }
}

impl ChangeSubscriber for RecordingSubscriber {
    fn on_add(&self, resource: ResourceKind, change: &PendingChange) -> HandleResult<()> {
        self.record(resource, change)
    }

    fn on_update(&self, resource: ResourceKind, change: &PendingChange) -> HandleResult<()> {
        self.record(resource, change)
    }
}
