//! Ambient scopes.
//!
//! A scope owns a [`ResourceRegistry`](crate::registry::ResourceRegistry)
//! and is shared, reference-counted, between every caller on the same
//! logical call chain that asked to join it. The last reference to go
//! finalizes the scope.

mod ambient;
mod read_only;
mod shared;

pub use ambient::AmbientScope;
pub use read_only::ReadOnlyScope;

pub(crate) use shared::{ScopeSettings, ScopeShared, ScopeSlot};

use crate::error::ScopeResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A unit of work as seen by the orchestrator.
///
/// [`AmbientScope`] is the canonical implementation. Other implementations
/// get commit and rollback, but no reference-counted teardown.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Commits, or delays the commit while other references are open.
    fn save_changes(&self) -> ScopeResult<usize>;

    /// Asynchronous [`UnitOfWork::save_changes`].
    async fn save_changes_async(&self, cancel: &CancellationToken) -> ScopeResult<usize>;

    /// Rolls back.
    fn roll_back(&self) -> ScopeResult<()>;

    /// Returns true while neither disposed nor completed.
    fn can_roll_back_or_commit(&self) -> bool;

    /// Converts into an [`AmbientScope`], or hands `self` back.
    fn into_ambient(self: Box<Self>) -> Result<AmbientScope, Box<dyn UnitOfWork>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScopeError;
    use crate::registry::ResourceRegistry;
    use crate::test_support::{Ledger, Probe};
    use uowscope_context::{CallContext, ScopeKey, ScopeStore};

    fn scope(ledger: &Ledger, context: &CallContext, read_only: bool) -> AmbientScope {
        let settings = ScopeSettings {
            key: if read_only {
                ScopeKey::read_only()
            } else {
                ScopeKey::read_write()
            },
            read_only,
            orphan: false,
            isolation_level: None,
        };
        let registry = ResourceRegistry::new(ledger.factory(), read_only, None);
        AmbientScope::from_shared(ScopeShared::create(settings, registry, Some(context.clone())))
    }

    #[test]
    fn registers_and_unregisters_in_home_context() {
        let ledger = Ledger::new();
        let context = CallContext::new();
        let outer = scope(&ledger, &context, false);

        let slot = ScopeStore::<ScopeSlot>::get_in(&context, ScopeKey::read_write());
        assert!(slot == Some(outer.slot()));

        outer.dispose();
        assert!(ScopeStore::<ScopeSlot>::get_in(&context, ScopeKey::read_write()).is_none());
    }

    #[test]
    fn last_release_commits_and_disposes() {
        let ledger = Ledger::new();
        let context = CallContext::new();
        let outer = scope(&ledger, &context, false);
        let inner = outer.join().unwrap();
        assert_eq!(outer.ref_count(), 2);

        inner
            .with_resource(|probe: &mut Probe<1>| probe.add("a"))
            .unwrap();
        assert_eq!(inner.save_changes().unwrap(), 0);
        inner.dispose();
        assert_eq!(ledger.count("persist"), 0);
        assert!(!outer.is_disposed());

        assert_eq!(outer.save_changes().unwrap(), 1);
        assert!(outer.is_completed());
        outer.dispose();
        assert_eq!(ledger.count("persist"), 1);
        assert_eq!(ledger.count("dispose:probe1"), 1);
    }

    #[test]
    fn second_commit_is_rejected() {
        let ledger = Ledger::new();
        let context = CallContext::new();
        let scope = scope(&ledger, &context, false);

        scope.save_changes().unwrap();
        assert!(matches!(
            scope.save_changes(),
            Err(ScopeError::AlreadyCompleted)
        ));
        assert!(matches!(scope.roll_back(), Err(ScopeError::AlreadyCompleted)));
        assert!(!scope.can_roll_back_or_commit());
    }

    #[test]
    fn read_only_rolls_back_on_release() {
        let ledger = Ledger::new();
        let context = CallContext::new();
        let scope = scope(&ledger, &context, true);

        scope
            .with_resource(|probe: &mut Probe<1>| {
                probe.add("ignored");
                assert!(!probe.auto_detect());
            })
            .unwrap();
        drop(scope);

        assert_eq!(ledger.count("persist"), 0);
        assert_eq!(ledger.count("dispose:probe1"), 1);
    }

    #[test]
    fn nested_access_reports_registry_in_use() {
        let ledger = Ledger::new();
        let context = CallContext::new();
        let scope = scope(&ledger, &context, false);

        let nested = scope
            .with_resource(|_probe: &mut Probe<1>| scope.with_resource(|_: &mut Probe<2>| ()))
            .unwrap();
        assert!(matches!(nested, Err(ScopeError::RegistryInUse)));
    }

    #[test]
    fn panicking_access_puts_the_registry_back() {
        let ledger = Ledger::new();
        let context = CallContext::new();
        let scope = scope(&ledger, &context, false);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scope.with_resource(|probe: &mut Probe<1>| {
                probe.add("a");
                panic!("handler failed");
            })
        }));
        assert!(outcome.is_err());

        assert!(scope.with_resource(|_: &mut Probe<1>| ()).is_ok());
        assert_eq!(scope.save_changes().unwrap(), 1);
        assert_eq!(ledger.count("persist:probe1"), 1);
    }

    #[test]
    fn disposed_scope_rejects_everything() {
        let ledger = Ledger::new();
        let context = CallContext::new();
        let scope = scope(&ledger, &context, false);
        let extra = scope.join().unwrap();

        assert_eq!(scope.force_dispose().unwrap(), 0);
        assert!(extra.is_disposed());
        assert_eq!(extra.ref_count(), 0);
        assert!(matches!(extra.join(), Err(ScopeError::Disposed)));
        assert!(matches!(extra.save_changes(), Err(ScopeError::Disposed)));
        assert!(matches!(
            extra.with_resource(|_: &mut Probe<1>| ()),
            Err(ScopeError::Disposed)
        ));
        // Releasing a collapsed reference is a no-op.
        extra.dispose();
        assert_eq!(ledger.count("create"), 0);
    }

    #[tokio::test]
    async fn async_release_commits() {
        let ledger = Ledger::new();
        let context = CallContext::new();
        let scope = scope(&ledger, &context, false);
        scope
            .with_resource(|probe: &mut Probe<2>| probe.modify("b"))
            .unwrap();

        scope.dispose_async().await;
        assert_eq!(ledger.count("persist:probe2"), 1);
        assert_eq!(ledger.count("dispose:probe2"), 1);
    }

    #[test]
    fn read_only_view_delegates() {
        let ledger = Ledger::new();
        let context = CallContext::new();
        let view = ReadOnlyScope::new(scope(&ledger, &context, true));
        let joined = view.join().unwrap();
        assert!(view.same_scope(&joined));
        assert_eq!(view.ref_count(), 2);

        joined.dispose();
        view.dispose();
        assert_eq!(ledger.count("persist"), 0);
    }
}
