//! Scope creation and joining.

use crate::config::ScopeConfig;
use crate::error::{ScopeError, ScopeResult};
use crate::notify::ChangeNotifier;
use crate::registry::ResourceRegistry;
use crate::resource::ResourceFactory;
use crate::scope::{
    AmbientScope, ReadOnlyScope, ScopeSettings, ScopeShared, ScopeSlot, UnitOfWork,
};
use crate::types::{IsolationLevel, JoinStrategy};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uowscope_context::{CallContext, ScopeKey, ScopeStore};

/// Supplies scopes to an orchestrator.
pub trait ScopeProvider: Send + Sync {
    /// Creates or joins a scope using the provider's defaults.
    fn create_scope(&self) -> ScopeResult<Box<dyn UnitOfWork>>;
}

/// Creates ambient scopes, or joins the one already registered on the
/// current call chain.
///
/// Read-write and read-only scopes live under independent keys: a read-only
/// scope never joins a read-write one and vice versa.
///
/// # Example
///
/// ```rust,ignore
/// let factory = ScopeFactory::new(Arc::new(resources))
///     .with_config(ScopeConfig::new().isolation_level(IsolationLevel::Serializable));
///
/// let outer = factory.create()?;
/// let inner = factory.create()?; // joins `outer`
/// assert!(outer.same_scope(&inner));
/// ```
#[derive(Clone)]
pub struct ScopeFactory {
    resource_factory: Arc<dyn ResourceFactory>,
    config: ScopeConfig,
    notifier: ChangeNotifier,
}

impl ScopeFactory {
    /// Creates a factory with the default configuration.
    pub fn new(resource_factory: Arc<dyn ResourceFactory>) -> Self {
        Self {
            resource_factory,
            config: ScopeConfig::default(),
            notifier: ChangeNotifier::new(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ScopeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the change notifier handed to every new registry.
    #[must_use]
    pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    /// Creates or joins a read-write scope with the configured strategy.
    ///
    /// On a tokio runtime this must run inside a task-scoped
    /// [`CallContext`]; see [`ScopeFactory::create_using`].
    pub fn create(&self) -> ScopeResult<AmbientScope> {
        self.create_with(self.config.default_strategy)
    }

    /// Creates or joins a read-write scope with `strategy`.
    pub fn create_with(&self, strategy: JoinStrategy) -> ScopeResult<AmbientScope> {
        self.obtain(false, strategy, None, None)
    }

    /// Creates or joins a read-write scope with explicit arguments.
    ///
    /// A new scope uses `resource_factory` instead of the factory's own and
    /// opens transactions at `isolation_level` instead of the configured one.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Usage`] when joining a scope that runs at another
    /// isolation level than the one requested, or when a registered scope
    /// is requested from a tokio task that has no call context.
    pub fn create_using(
        &self,
        strategy: JoinStrategy,
        resource_factory: Option<Arc<dyn ResourceFactory>>,
        isolation_level: Option<IsolationLevel>,
    ) -> ScopeResult<AmbientScope> {
        self.obtain(false, strategy, resource_factory, isolation_level)
    }

    /// Creates or joins a read-only scope with the configured strategy.
    pub fn create_read_only(&self) -> ScopeResult<ReadOnlyScope> {
        self.create_read_only_with(self.config.default_strategy)
    }

    /// Creates or joins a read-only scope with `strategy`.
    pub fn create_read_only_with(&self, strategy: JoinStrategy) -> ScopeResult<ReadOnlyScope> {
        self.create_read_only_using(strategy, None, None)
    }

    /// Read-only counterpart of [`ScopeFactory::create_using`].
    pub fn create_read_only_using(
        &self,
        strategy: JoinStrategy,
        resource_factory: Option<Arc<dyn ResourceFactory>>,
        isolation_level: Option<IsolationLevel>,
    ) -> ScopeResult<ReadOnlyScope> {
        self.obtain(true, strategy, resource_factory, isolation_level)
            .map(ReadOnlyScope::new)
    }

    /// Returns true if the current call chain holds a joinable read-write
    /// scope.
    #[must_use]
    pub fn has_ambient(&self) -> bool {
        Self::ambient(ScopeKey::read_write()).is_some()
    }

    /// Returns true if the current call chain holds a joinable read-only
    /// scope.
    #[must_use]
    pub fn has_ambient_read_only(&self) -> bool {
        Self::ambient(ScopeKey::read_only()).is_some()
    }

    fn ambient(key: ScopeKey) -> Option<Arc<ScopeShared>> {
        ScopeStore::<ScopeSlot>::get(key)
            .and_then(|slot| slot.upgrade())
            .filter(|shared| shared.is_joinable())
    }

    fn obtain(
        &self,
        read_only: bool,
        strategy: JoinStrategy,
        resource_factory: Option<Arc<dyn ResourceFactory>>,
        isolation_level: Option<IsolationLevel>,
    ) -> ScopeResult<AmbientScope> {
        let key = if read_only {
            ScopeKey::read_only()
        } else {
            ScopeKey::read_write()
        };

        if strategy == JoinStrategy::JoinIfExists {
            if let Some(shared) = Self::ambient(key) {
                if let Some(requested) = isolation_level {
                    if shared.settings.isolation_level != Some(requested) {
                        return Err(ScopeError::usage(format!(
                            "cannot join {} at {requested}: it runs at {}",
                            shared.id,
                            shared
                                .settings
                                .isolation_level
                                .map_or_else(|| "no isolation level".to_string(), |l| l.to_string())
                        )));
                    }
                }
                if let Some(joined) = AmbientScope::join_shared(shared) {
                    return Ok(joined);
                }
            }
        }

        let orphan = strategy == JoinStrategy::CreateNewAlways;
        let isolation_level = isolation_level.or(if read_only {
            self.config.read_only_isolation_level
        } else {
            self.config.isolation_level
        });
        let factory = resource_factory.unwrap_or_else(|| Arc::clone(&self.resource_factory));
        let registry = ResourceRegistry::new(factory, read_only, isolation_level)
            .with_notifier(self.notifier.clone());
        let settings = ScopeSettings {
            key,
            read_only,
            orphan,
            isolation_level,
        };
        let home = if orphan {
            None
        } else {
            Some(CallContext::try_current().ok_or_else(|| {
                ScopeError::usage(
                    "no call context for this task: start it with CallContext::scope, \
                     spawn_in_context or spawn_detached",
                )
            })?)
        };
        debug!(?strategy, read_only, "creating scope");
        Ok(AmbientScope::from_shared(ScopeShared::create(
            settings, registry, home,
        )))
    }
}

impl ScopeProvider for ScopeFactory {
    fn create_scope(&self) -> ScopeResult<Box<dyn UnitOfWork>> {
        self.create().map(|scope| Box::new(scope) as Box<dyn UnitOfWork>)
    }
}

impl fmt::Debug for ScopeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeFactory")
            .field("config", &self.config)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}
