//! Test fixtures and scope helpers.
//!
//! Provides a ready-wired scope factory over a [`MemoryBackend`] and
//! helpers that run test bodies on a fresh call chain.

use crate::memory::MemoryBackend;
use crate::subscriber::RecordingSubscriber;
use std::future::Future;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uowscope_context::CallContext;
use uowscope_core::{ChangeNotifier, DefaultUnitOfWork, ScopeConfig, ScopeFactory};

/// A scope factory wired to an in-memory backend and a recording
/// subscriber.
pub struct TestHarness {
    /// The backing store.
    pub backend: MemoryBackend,
    /// Subscriber registered on every scope's registry.
    pub subscriber: Arc<RecordingSubscriber>,
    /// The factory under test.
    pub factory: ScopeFactory,
}

impl TestHarness {
    /// Creates a harness with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ScopeConfig::default())
    }

    /// Creates a harness with `config`.
    pub fn with_config(config: ScopeConfig) -> Self {
        let backend = MemoryBackend::new();
        let subscriber = Arc::new(RecordingSubscriber::new());
        let factory = ScopeFactory::new(backend.resource_factory())
            .with_config(config)
            .with_notifier(ChangeNotifier::new().with_subscriber(subscriber.clone()));
        Self {
            backend,
            subscriber,
            factory,
        }
    }

    /// Returns an orchestrator drawing scopes from this harness.
    pub fn orchestrator(&self) -> DefaultUnitOfWork<ScopeFactory> {
        DefaultUnitOfWork::new(self.factory.clone())
    }

    /// Runs `f` on a fresh call chain.
    pub fn isolated<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        CallContext::new().sync_scope(|| f(self))
    }

    /// Runs `future` on a fresh call chain.
    pub async fn isolated_async<F: Future>(&self, future: F) -> F::Output {
        CallContext::new().scope(future).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test body with a fresh harness on a fresh call chain.
///
/// # Example
///
/// ```rust
/// use uowscope_testkit::{with_harness, MemoryResource, Orders};
///
/// with_harness(|h| {
///     let scope = h.factory.create().unwrap();
///     scope
///         .with_resource(|orders: &mut MemoryResource<Orders>| orders.put("o-1", "1 widget"))
///         .unwrap();
///     scope.dispose();
///     assert_eq!(h.backend.row::<Orders>("o-1").as_deref(), Some("1 widget"));
/// });
/// ```
pub fn with_harness<T>(f: impl FnOnce(&TestHarness) -> T) -> T {
    init_test_logging();
    TestHarness::new().isolated(f)
}

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
