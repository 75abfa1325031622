//! Lifecycle tests for ambient scopes over the in-memory backend.

use uowscope_context::CallContext;
use uowscope_core::{
    ChangeKind, IsolationLevel, JoinStrategy, ResourceOperation, ScopeConfig, ScopeError,
    UnitOfWorkManagement,
};
use uowscope_testkit::prelude::*;

fn put_order(scope: &uowscope_core::AmbientScope, key: &str) {
    scope
        .with_resource(|orders: &mut MemoryResource<Orders>| orders.put(key, "1 widget"))
        .unwrap();
}

#[test]
fn three_joins_commit_once_on_last_dispose() {
    with_harness(|h| {
        let first = h.factory.create().unwrap();
        let second = h.factory.create().unwrap();
        let third = h.factory.create().unwrap();
        assert_eq!(first.ref_count(), 3);
        put_order(&third, "o-1");

        third.dispose();
        second.dispose();
        assert_eq!(first.ref_count(), 1);
        assert_eq!(h.backend.persists::<Orders>(), 0);
        assert!(h.factory.has_ambient());

        first.dispose();
        assert_eq!(h.backend.persists::<Orders>(), 1);
        assert_eq!(h.backend.row::<Orders>("o-1").as_deref(), Some("1 widget"));
        assert!(!h.factory.has_ambient());
    });
}

#[test]
fn inner_save_changes_is_delayed() {
    with_harness(|h| {
        let outer = h.factory.create().unwrap();
        let inner = h.factory.create().unwrap();
        put_order(&inner, "o-1");

        assert_eq!(inner.save_changes().unwrap(), 0);
        inner.dispose();
        assert!(h.backend.rows::<Orders>().is_empty());

        assert_eq!(outer.save_changes().unwrap(), 1);
        assert_eq!(h.backend.row::<Orders>("o-1").as_deref(), Some("1 widget"));
        outer.dispose();
        assert_eq!(h.backend.persists::<Orders>(), 1);
    });
}

#[test]
fn second_save_is_already_completed() {
    with_harness(|h| {
        let scope = h.factory.create().unwrap();
        put_order(&scope, "o-1");

        scope.save_changes().unwrap();
        let err = scope.save_changes().err().unwrap();
        assert!(matches!(err, ScopeError::AlreadyCompleted));
        assert!(err.to_string().contains("only once"));
    });
}

#[test]
fn read_only_dispose_rolls_back() {
    let h = TestHarness::with_config(
        ScopeConfig::new().read_only_isolation_level(IsolationLevel::Snapshot),
    );
    h.isolated(|h| {
        let reader = h.factory.create_read_only().unwrap();
        let nested = h.factory.create_read_only().unwrap();
        reader
            .with_resource(|orders: &mut MemoryResource<Orders>| {
                assert!(!orders.auto_detect_changes());
                assert!(orders.in_transaction());
                orders.put("o-1", "should not persist");
            })
            .unwrap();

        nested.dispose();
        reader.dispose();

        assert_eq!(h.backend.rollbacks::<Orders>(), 1);
        assert_eq!(h.backend.commits::<Orders>(), 0);
        assert_eq!(h.backend.persists::<Orders>(), 0);
        assert!(h.backend.rows::<Orders>().is_empty());
        assert!(h.subscriber.received().is_empty());
    });
}

#[test]
fn force_dispose_finalizes_with_outstanding_joins() {
    with_harness(|h| {
        let outer = h.factory.create().unwrap();
        let leaked = h.factory.create().unwrap();
        put_order(&leaked, "o-1");
        assert_eq!(outer.ref_count(), 2);

        assert_eq!(outer.force_dispose().unwrap(), 1);
        assert!(leaked.is_disposed());
        assert!(!h.factory.has_ambient());
        assert!(CallContext::current().is_empty());

        drop(leaked);
        assert_eq!(h.backend.persists::<Orders>(), 1);
        assert_eq!(h.backend.disposals::<Orders>(), 1);
    });
}

#[test]
fn failed_persist_does_not_stop_other_resources() {
    with_harness(|h| {
        h.backend.fail::<Orders>(ResourceOperation::Persist);
        let scope = h.factory.create().unwrap();
        put_order(&scope, "o-1");
        scope
            .with_resource(|stock: &mut MemoryResource<Inventory>| stock.put("sku-1", "9"))
            .unwrap();

        let err = scope.save_changes().err().unwrap();

        assert_eq!(err.operation(), Some(ResourceOperation::Persist));
        assert!(err.to_string().contains("orders"));
        assert!(err
            .handle_error()
            .and_then(|e| e.downcast_ref::<MemoryError>())
            .is_some());
        assert_eq!(h.backend.persists::<Inventory>(), 1);
        assert_eq!(h.backend.row::<Inventory>("sku-1").as_deref(), Some("9"));
        assert!(scope.is_completed());
        assert!(!scope.can_roll_back_or_commit());
    });
}

#[test]
fn create_new_always_never_touches_the_store() {
    with_harness(|h| {
        let first = h.factory.create_with(JoinStrategy::CreateNewAlways).unwrap();
        let second = h.factory.create_with(JoinStrategy::CreateNewAlways).unwrap();

        assert!(!first.same_scope(&second));
        assert_ne!(first.id(), second.id());
        assert!(!h.factory.has_ambient());

        put_order(&first, "o-1");
        first.dispose();
        second.dispose();
        assert!(!h.factory.has_ambient());
        assert_eq!(h.backend.persists::<Orders>(), 1);
    });
}

#[test]
fn orchestrator_error_rolls_back() {
    let h = TestHarness::with_config(
        ScopeConfig::new().isolation_level(IsolationLevel::ReadCommitted),
    );
    h.isolated(|h| {
        let mut uow = h.orchestrator();
        uow.start().unwrap();

        let scope = h.factory.create().unwrap();
        put_order(&scope, "o-1");
        scope.dispose();

        let failure = std::io::Error::other("payment declined");
        uow.finish(Some(&failure)).unwrap();

        assert_eq!(h.backend.rollbacks::<Orders>(), 1);
        assert_eq!(h.backend.persists::<Orders>(), 0);
        assert_eq!(h.backend.commits::<Orders>(), 0);
        assert!(h.backend.rows::<Orders>().is_empty());
        assert!(!h.factory.has_ambient());
    });
}

#[test]
fn orchestrator_success_commits_in_a_transaction() {
    let h = TestHarness::with_config(
        ScopeConfig::new().isolation_level(IsolationLevel::Serializable),
    );
    h.isolated(|h| {
        let mut uow = h.orchestrator();
        let stored = uow
            .execute(|| {
                let scope = h.factory.create()?;
                put_order(&scope, "o-1");
                scope.with_resource(|audit: &mut MemoryResource<Audit>| {
                    audit.put("a-1", "order placed")
                })?;
                Ok::<_, ScopeError>(2)
            })
            .unwrap();

        assert_eq!(stored, 2);
        assert_eq!(h.backend.commits::<Orders>(), 1);
        assert_eq!(h.backend.commits::<Audit>(), 1);
        assert_eq!(h.backend.row::<Audit>("a-1").as_deref(), Some("order placed"));
        assert!(h.backend.journal().contains(&Event::TransactionBegun {
            table: "orders",
            isolation: IsolationLevel::Serializable,
        }));
    });
}

#[test]
fn subscribers_see_adds_and_updates_before_persist() {
    with_harness(|h| {
        let seed = h.factory.create().unwrap();
        put_order(&seed, "o-1");
        seed.dispose();

        let scope = h.factory.create().unwrap();
        scope
            .with_resource(|orders: &mut MemoryResource<Orders>| {
                orders.put("o-1", "2 widgets");
                orders.put("o-2", "1 gadget");
                orders.delete("o-3");
            })
            .unwrap();
        scope.dispose();

        assert_eq!(h.subscriber.entities(ChangeKind::Added), vec!["o-1", "o-2"]);
        assert_eq!(h.subscriber.entities(ChangeKind::Modified), vec!["o-1"]);
        assert!(h.subscriber.entities(ChangeKind::Deleted).is_empty());
    });
}

#[test]
fn failing_subscriber_does_not_block_persist() {
    with_harness(|h| {
        h.subscriber.set_failing(true);
        let scope = h.factory.create().unwrap();
        put_order(&scope, "o-1");

        assert_eq!(scope.save_changes().unwrap(), 1);
        assert_eq!(h.subscriber.received().len(), 1);
        assert_eq!(h.backend.row::<Orders>("o-1").as_deref(), Some("1 widget"));
    });
}

#[test]
fn dispose_errors_are_swallowed() {
    with_harness(|h| {
        h.backend.fail::<Orders>(ResourceOperation::Dispose);
        let scope = h.factory.create().unwrap();
        put_order(&scope, "o-1");
        scope
            .with_resource(|stock: &mut MemoryResource<Inventory>| stock.put("sku-1", "3"))
            .unwrap();

        scope.dispose();

        assert_eq!(h.backend.persists::<Orders>(), 1);
        assert_eq!(h.backend.disposals::<Inventory>(), 1);
        assert_eq!(h.backend.disposals::<Orders>(), 0);
        assert!(!h.factory.has_ambient());
    });
}

#[test]
fn scoped_creation_restores_the_outer_scope() {
    with_harness(|h| {
        let outer = h.factory.create().unwrap();
        put_order(&outer, "outer");

        let nested = h
            .factory
            .create_with(JoinStrategy::CreateNewAlwaysScoped)
            .unwrap();
        put_order(&nested, "nested");
        nested.dispose();
        assert_eq!(h.backend.row::<Orders>("nested").as_deref(), Some("1 widget"));
        assert!(h.backend.row::<Orders>("outer").is_none());

        let rejoined = h.factory.create().unwrap();
        assert!(rejoined.same_scope(&outer));
        rejoined.dispose();
        outer.dispose();
        assert_eq!(h.backend.row::<Orders>("outer").as_deref(), Some("1 widget"));
    });
}
