//! Property-based test generators using proptest.
//!
//! Provides strategies for randomized join/write/release sequences on one
//! scope.

use crate::memory::{Audit, Inventory, MemoryResource, Orders};
use proptest::prelude::*;
use uowscope_core::{AmbientScope, IsolationLevel, JoinStrategy, ScopeResult};

/// A table of the in-memory backend, as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableChoice {
    /// [`Orders`].
    Orders,
    /// [`Inventory`].
    Inventory,
    /// [`Audit`].
    Audit,
}

/// One row written through some reference of a scope.
#[derive(Debug, Clone)]
pub struct PlannedWrite {
    /// Index of the reference that writes.
    pub holder: usize,
    /// Target table.
    pub table: TableChoice,
    /// Row key.
    pub key: String,
}

impl PlannedWrite {
    /// Stages the write on `scope`.
    pub fn apply(&self, scope: &AmbientScope) -> ScopeResult<()> {
        let value = format!("by-{}", self.holder);
        match self.table {
            TableChoice::Orders => scope.with_resource(|r: &mut MemoryResource<Orders>| {
                r.put(self.key.clone(), value)
            }),
            TableChoice::Inventory => scope.with_resource(|r: &mut MemoryResource<Inventory>| {
                r.put(self.key.clone(), value)
            }),
            TableChoice::Audit => scope.with_resource(|r: &mut MemoryResource<Audit>| {
                r.put(self.key.clone(), value)
            }),
        }
    }
}

/// A randomized nesting of one scope.
///
/// `depth` references are taken (the creating one included), `writes` are
/// staged through them, then every reference is released in
/// `release_order`.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    /// Number of references.
    pub depth: usize,
    /// A permutation of `0..depth`.
    pub release_order: Vec<usize>,
    /// Writes to stage before releasing.
    pub writes: Vec<PlannedWrite>,
}

/// Strategy for table choices.
pub fn table_strategy() -> impl Strategy<Value = TableChoice> {
    prop_oneof![
        Just(TableChoice::Orders),
        Just(TableChoice::Inventory),
        Just(TableChoice::Audit),
    ]
}

/// Strategy for row keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,11}").expect("Invalid regex")
}

/// Strategy for join strategies.
pub fn join_strategy_strategy() -> impl Strategy<Value = JoinStrategy> {
    prop_oneof![
        Just(JoinStrategy::CreateNewAlways),
        Just(JoinStrategy::CreateNewAlwaysScoped),
        Just(JoinStrategy::JoinIfExists),
    ]
}

/// Strategy for isolation levels.
pub fn isolation_level_strategy() -> impl Strategy<Value = IsolationLevel> {
    prop_oneof![
        Just(IsolationLevel::Unspecified),
        Just(IsolationLevel::Chaos),
        Just(IsolationLevel::ReadUncommitted),
        Just(IsolationLevel::ReadCommitted),
        Just(IsolationLevel::RepeatableRead),
        Just(IsolationLevel::Serializable),
        Just(IsolationLevel::Snapshot),
    ]
}

/// Strategy for join plans with at most `max_depth` references.
pub fn join_plan_strategy(max_depth: usize) -> impl Strategy<Value = JoinPlan> {
    (1..=max_depth.max(1))
        .prop_flat_map(|depth| {
            let release_order = Just((0..depth).collect::<Vec<_>>()).prop_shuffle();
            let writes = prop::collection::vec(
                (0..depth, table_strategy(), key_strategy()).prop_map(|(holder, table, key)| {
                    PlannedWrite { holder, table, key }
                }),
                0..6,
            );
            (Just(depth), release_order, writes)
        })
        .prop_map(|(depth, release_order, writes)| JoinPlan {
            depth,
            release_order,
            writes,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn release_order_is_a_permutation(plan in join_plan_strategy(6)) {
            let mut order = plan.release_order.clone();
            order.sort_unstable();
            prop_assert_eq!(order, (0..plan.depth).collect::<Vec<_>>());
            prop_assert!(plan.writes.iter().all(|w| w.holder < plan.depth));
        }
    }
}
