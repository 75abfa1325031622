//! Change notification fired right before a handle persists.

use crate::error::HandleResult;
use crate::resource::{ResourceHandle, ResourceKind};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Kind of a pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A new entry.
    Added,
    /// An existing entry with changed values.
    Modified,
    /// An entry scheduled for removal.
    Deleted,
}

/// One mutation a handle would write on its next persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// Identifier of the changed entry, as the handle names it.
    pub entity: String,
    /// Kind of mutation.
    pub kind: ChangeKind,
}

impl PendingChange {
    /// Creates a pending change.
    pub fn new(entity: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            entity: entity.into(),
            kind,
        }
    }

    /// Creates an `Added` change.
    pub fn added(entity: impl Into<String>) -> Self {
        Self::new(entity, ChangeKind::Added)
    }

    /// Creates a `Modified` change.
    pub fn modified(entity: impl Into<String>) -> Self {
        Self::new(entity, ChangeKind::Modified)
    }

    /// Creates a `Deleted` change.
    pub fn deleted(entity: impl Into<String>) -> Self {
        Self::new(entity, ChangeKind::Deleted)
    }
}

/// Receives pending changes before they are persisted.
///
/// Subscribers are telemetry, not part of the transaction: their errors are
/// logged and dropped.
pub trait ChangeSubscriber: Send + Sync {
    /// Called for every `Added` change.
    fn on_add(&self, resource: ResourceKind, change: &PendingChange) -> HandleResult<()>;

    /// Called for every `Modified` change.
    fn on_update(&self, resource: ResourceKind, change: &PendingChange) -> HandleResult<()>;
}

/// Fans pending changes out to the registered subscribers.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    subscribers: Vec<Arc<dyn ChangeSubscriber>>,
}

impl ChangeNotifier {
    /// Creates a notifier without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Arc<dyn ChangeSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Adds a subscriber in place.
    pub fn subscribe(&mut self, subscriber: Arc<dyn ChangeSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Returns the number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns true if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Dispatches the pending changes of `handle`.
    ///
    /// Never fails; subscriber errors are logged.
    pub fn notify(&self, resource: ResourceKind, handle: &dyn ResourceHandle) {
        if self.subscribers.is_empty() {
            return;
        }
        let changes = handle.pending_changes();
        if changes.is_empty() {
            return;
        }

        for subscriber in &self.subscribers {
            for change in &changes {
                let outcome = match change.kind {
                    ChangeKind::Added => subscriber.on_add(resource, change),
                    ChangeKind::Modified => subscriber.on_update(resource, change),
                    ChangeKind::Deleted => Ok(()),
                };
                if let Err(error) = outcome {
                    warn!(
                        resource = resource.name(),
                        entity = %change.entity,
                        %error,
                        "change subscriber failed"
                    );
                }
            }
        }
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
