//! Scope factory configuration.

use crate::types::{IsolationLevel, JoinStrategy};
use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::ScopeFactory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Strategy used by `create()` and `create_read_only()`.
    pub default_strategy: JoinStrategy,

    /// Isolation level for transactions of read-write scopes (`None` = no
    /// explicit transaction).
    pub isolation_level: Option<IsolationLevel>,

    /// Isolation level for transactions of read-only scopes.
    pub read_only_isolation_level: Option<IsolationLevel>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            default_strategy: JoinStrategy::JoinIfExists,
            isolation_level: None,
            read_only_isolation_level: None,
        }
    }
}

impl ScopeConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default join strategy.
    #[must_use]
    pub const fn default_strategy(mut self, strategy: JoinStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Sets the isolation level of read-write scopes.
    #[must_use]
    pub const fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Sets the isolation level of read-only scopes.
    #[must_use]
    pub const fn read_only_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.read_only_isolation_level = Some(level);
        self
    }
}
