//! Propagation tests across tasks and threads.

use proptest::prelude::*;
use std::time::Duration;
use uowscope_context::{spawn_detached, spawn_in_context, CallContext, ScopeKey, ScopeStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_chains_never_observe_each_other() {
    let key = ScopeKey::generate();
    let mut handles = Vec::new();

    for chain in 0..32u32 {
        handles.push(spawn_detached(async move {
            ScopeStore::set(key, chain);
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert_eq!(ScopeStore::<u32>::get(key), Some(chain));
            }
            ScopeStore::<u32>::remove(key)
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn child_writes_do_not_leak_to_parent() {
    let key = ScopeKey::generate();
    CallContext::new()
        .scope(async move {
            ScopeStore::set(key, 1u32);

            spawn_in_context(async move {
                assert_eq!(ScopeStore::<u32>::get(key), Some(1));
                ScopeStore::set(key, 2u32);
                tokio::task::yield_now().await;
                assert_eq!(ScopeStore::<u32>::get(key), Some(2));
            })
            .await
            .unwrap();

            assert_eq!(ScopeStore::<u32>::get(key), Some(1));
        })
        .await;
}

#[test]
fn threads_are_independent_chains() {
    let key = ScopeKey::generate();
    ScopeStore::set(key, 1u32);

    let seen = std::thread::spawn(move || ScopeStore::<u32>::get(key))
        .join()
        .unwrap();

    assert_eq!(seen, None);
    assert!(ScopeStore::<u32>::remove(key));
}

proptest! {
    #[test]
    fn last_write_wins_within_a_chain(values in prop::collection::vec(any::<u64>(), 1..20)) {
        let key = ScopeKey::generate();
        let context = CallContext::new();
        for value in &values {
            ScopeStore::set_in(&context, key, *value);
        }
        prop_assert_eq!(ScopeStore::<u64>::get_in(&context, key), values.last().copied());
    }
}
