//! Typed view over the current call chain's slots.

use crate::context::CallContext;
use crate::key::ScopeKey;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Ambient key/value store for values of type `T`.
///
/// Every operation acts on [`CallContext::current`]; the `*_in` variants
/// take an explicit carrier instead. A slot holds at most one value. A slot
/// holding a value of another type reads as empty.
///
/// # Thread Safety
///
/// Operations are atomic per carrier, so independent chains running in
/// parallel (and clones of one carrier) can use the store concurrently.
pub struct ScopeStore<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScopeStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(key: ScopeKey, value: T) {
        Self::set_in(&CallContext::current(), key, value);
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(key: ScopeKey) -> Option<T> {
        Self::get_in(&CallContext::current(), key)
    }

    /// Removes the value stored under `key`.
    ///
    /// Returns true if a value was present.
    pub fn remove(key: ScopeKey) -> bool {
        Self::remove_in(&CallContext::current(), key)
    }

    /// Stores `value` under `key` in `context`.
    pub fn set_in(context: &CallContext, key: ScopeKey, value: T) {
        trace!(%key, "ambient slot set");
        context.insert(key, Arc::new(value));
    }

    /// Returns the value stored under `key` in `context`.
    #[must_use]
    pub fn get_in(context: &CallContext, key: ScopeKey) -> Option<T> {
        context.slot(key)?.downcast_ref::<T>().cloned()
    }

    /// Removes the value stored under `key` in `context`.
    pub fn remove_in(context: &CallContext, key: ScopeKey) -> bool {
        let removed = context.remove(key);
        if removed {
            trace!(%key, "ambient slot removed");
        }
        removed
    }
}

impl<T> ScopeStore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Replaces the value under `key` with `new` if it currently equals
    /// `expected`.
    ///
    /// Returns true if the swap happened.
    pub fn compare_and_swap(key: ScopeKey, new: T, expected: &T) -> bool {
        Self::compare_and_swap_in(&CallContext::current(), key, new, expected)
    }

    /// Removes the value under `key` if it currently equals `expected`.
    ///
    /// Returns true if the value was removed.
    pub fn remove_if(key: ScopeKey, expected: &T) -> bool {
        Self::remove_if_in(&CallContext::current(), key, expected)
    }

    /// [`ScopeStore::compare_and_swap`] on an explicit carrier.
    pub fn compare_and_swap_in(context: &CallContext, key: ScopeKey, new: T, expected: &T) -> bool {
        context.update(|slots| {
            let matches = slots
                .get(&key)
                .and_then(|v| v.downcast_ref::<T>())
                .is_some_and(|current| current == expected);
            if matches {
                slots.insert(key, Arc::new(new));
            }
            matches
        })
    }

    /// [`ScopeStore::remove_if`] on an explicit carrier.
    pub fn remove_if_in(context: &CallContext, key: ScopeKey, expected: &T) -> bool {
        let removed = context.update(|slots| {
            let matches = slots
                .get(&key)
                .and_then(|v| v.downcast_ref::<T>())
                .is_some_and(|current| current == expected);
            if matches {
                slots.remove(&key);
            }
            matches
        });
        if removed {
            trace!(%key, "ambient slot removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let key = ScopeKey::generate();
        let context = CallContext::new();

        assert_eq!(ScopeStore::<String>::get_in(&context, key), None);
        ScopeStore::set_in(&context, key, "a".to_string());
        assert_eq!(
            ScopeStore::<String>::get_in(&context, key).as_deref(),
            Some("a")
        );
        assert!(ScopeStore::<String>::remove_in(&context, key));
        assert!(!ScopeStore::<String>::remove_in(&context, key));
        assert_eq!(ScopeStore::<String>::get_in(&context, key), None);
    }

    #[test]
    fn other_type_reads_as_empty() {
        let key = ScopeKey::generate();
        let context = CallContext::new();
        ScopeStore::set_in(&context, key, 5u32);
        assert_eq!(ScopeStore::<u64>::get_in(&context, key), None);
        assert_eq!(ScopeStore::<u32>::get_in(&context, key), Some(5));
    }

    #[test]
    fn compare_and_swap_requires_expected_value() {
        let key = ScopeKey::generate();
        let context = CallContext::new();
        ScopeStore::set_in(&context, key, 1u32);

        assert!(!ScopeStore::compare_and_swap_in(&context, key, 3u32, &2));
        assert_eq!(ScopeStore::<u32>::get_in(&context, key), Some(1));

        assert!(ScopeStore::compare_and_swap_in(&context, key, 3u32, &1));
        assert_eq!(ScopeStore::<u32>::get_in(&context, key), Some(3));
    }

    #[test]
    fn compare_and_swap_on_empty_slot_fails() {
        let key = ScopeKey::generate();
        let context = CallContext::new();
        assert!(!ScopeStore::compare_and_swap_in(&context, key, 3u32, &1));
        assert_eq!(ScopeStore::<u32>::get_in(&context, key), None);
    }

    #[test]
    fn remove_if_leaves_foreign_value() {
        let key = ScopeKey::generate();
        let context = CallContext::new();
        ScopeStore::set_in(&context, key, 1u32);

        assert!(!ScopeStore::remove_if_in(&context, key, &2u32));
        assert_eq!(ScopeStore::<u32>::get_in(&context, key), Some(1));
        assert!(ScopeStore::remove_if_in(&context, key, &1u32));
        assert!(context.is_empty());
    }

    #[test]
    fn ambient_operations_use_current_chain() {
        let key = ScopeKey::generate();
        CallContext::new().sync_scope(|| {
            ScopeStore::set(key, 11u32);
            assert_eq!(ScopeStore::<u32>::get(key), Some(11));
            assert!(ScopeStore::compare_and_swap(key, 12u32, &11));
            assert!(ScopeStore::remove_if(key, &12u32));
            assert_eq!(ScopeStore::<u32>::get(key), None);
        });
    }
}
