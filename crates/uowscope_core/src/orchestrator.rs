//! Start/finish orchestration around a business operation.
//!
//! [`DefaultUnitOfWork`] obtains a scope on start and finalizes it on finish:
//! committing through [`AmbientScope::force_dispose`](crate::AmbientScope::force_dispose)
//! when the operation succeeded, rolling back when it failed.
//! [`NullUnitOfWork`] does nothing, for call sites where scoping is off.

use crate::error::{ScopeError, ScopeResult};
use crate::factory::ScopeProvider;
use crate::scope::UnitOfWork;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Brackets a business operation with a unit of work.
#[async_trait]
pub trait UnitOfWorkManagement: Send {
    /// Obtains a scope for the operation.
    fn start(&mut self) -> ScopeResult<()>;

    /// Finalizes the scope: commits if `error` is `None`, rolls back
    /// otherwise.
    fn finish(&mut self, error: Option<&(dyn Error + Send + Sync + 'static)>) -> ScopeResult<()>;

    /// Asynchronous [`UnitOfWorkManagement::start`].
    async fn start_async(&mut self) -> ScopeResult<()>;

    /// Asynchronous [`UnitOfWorkManagement::finish`].
    async fn finish_async(
        &mut self,
        error: Option<&(dyn Error + Send + Sync + 'static)>,
    ) -> ScopeResult<()>;
}

/// Failure of [`DefaultUnitOfWork::execute`].
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E> {
    /// The business operation failed; the scope was rolled back.
    #[error(transparent)]
    Operation(E),

    /// The operation succeeded but the scope could not be started or
    /// committed.
    #[error(transparent)]
    Scope(ScopeError),
}

impl<E> ExecuteError<E> {
    /// Returns the operation error, if that is what failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::Scope(_) => None,
        }
    }

    /// Returns the scope error, if that is what failed.
    pub fn scope_error(&self) -> Option<&ScopeError> {
        match self {
            Self::Operation(_) => None,
            Self::Scope(error) => Some(error),
        }
    }
}

/// The standard orchestrator.
pub struct DefaultUnitOfWork<P> {
    provider: P,
    scope: Option<Box<dyn UnitOfWork>>,
}

impl<P: ScopeProvider> DefaultUnitOfWork<P> {
    /// Creates an orchestrator drawing scopes from `provider`.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            scope: None,
        }
    }

    /// Returns the provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns true between start and finish.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.scope.is_some()
    }

    /// Runs `operation` inside a unit of work.
    ///
    /// The scope commits if the operation returns `Ok` and rolls back if it
    /// returns `Err`. A rollback failure is logged; the operation error is
    /// what the caller sees.
    pub fn execute<T, E, F>(&mut self, operation: F) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: Error + Send + Sync + 'static,
    {
        self.start().map_err(ExecuteError::Scope)?;
        match operation() {
            Ok(value) => {
                self.finish(None).map_err(ExecuteError::Scope)?;
                Ok(value)
            }
            Err(error) => {
                if let Err(scope_error) = self.finish(Some(&error)) {
                    warn!(error = %scope_error, "rollback after failed operation failed");
                }
                Err(ExecuteError::Operation(error))
            }
        }
    }

    /// Asynchronous [`DefaultUnitOfWork::execute`].
    pub async fn execute_async<T, E, F, Fut>(
        &mut self,
        operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: Error + Send + Sync + 'static,
    {
        self.start_async().await.map_err(ExecuteError::Scope)?;
        match operation().await {
            Ok(value) => {
                self.finish_async(None).await.map_err(ExecuteError::Scope)?;
                Ok(value)
            }
            Err(error) => {
                if let Err(scope_error) = self.finish_async(Some(&error)).await {
                    warn!(error = %scope_error, "rollback after failed operation failed");
                }
                Err(ExecuteError::Operation(error))
            }
        }
    }

    fn open(&mut self) -> ScopeResult<()> {
        if self.scope.is_some() {
            return Err(ScopeError::usage("unit of work already started"));
        }
        self.scope = Some(self.provider.create_scope()?);
        Ok(())
    }

    /// Takes the held scope if it still has to be finalized. A scope that
    /// cannot commit or roll back any more is released right away.
    fn take_pending(&mut self) -> Option<Box<dyn UnitOfWork>> {
        let scope = self.scope.take()?;
        if scope.can_roll_back_or_commit() {
            Some(scope)
        } else {
            debug!("scope already completed, releasing");
            None
        }
    }
}

#[async_trait]
impl<P: ScopeProvider> UnitOfWorkManagement for DefaultUnitOfWork<P> {
    fn start(&mut self) -> ScopeResult<()> {
        self.open()
    }

    fn finish(&mut self, error: Option<&(dyn Error + Send + Sync + 'static)>) -> ScopeResult<()> {
        let Some(scope) = self.take_pending() else {
            return Ok(());
        };
        if let Some(error) = error {
            debug!(%error, "operation failed, rolling back");
            return scope.roll_back();
        }
        match scope.into_ambient() {
            Ok(ambient) => ambient.force_dispose().map(|_| ()),
            Err(foreign) => foreign.save_changes().map(|_| ()),
        }
    }

    async fn start_async(&mut self) -> ScopeResult<()> {
        self.open()
    }

    async fn finish_async(
        &mut self,
        error: Option<&(dyn Error + Send + Sync + 'static)>,
    ) -> ScopeResult<()> {
        let Some(scope) = self.take_pending() else {
            return Ok(());
        };
        if let Some(error) = error {
            debug!(%error, "operation failed, rolling back");
            return scope.roll_back();
        }
        match scope.into_ambient() {
            Ok(ambient) => ambient.force_dispose_async().await.map(|_| ()),
            Err(foreign) => foreign
                .save_changes_async(&CancellationToken::new())
                .await
                .map(|_| ()),
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for DefaultUnitOfWork<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultUnitOfWork")
            .field("provider", &self.provider)
            .field("started", &self.scope.is_some())
            .finish()
    }
}

/// An orchestrator whose operations all do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUnitOfWork;

impl NullUnitOfWork {
    /// Creates the null orchestrator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UnitOfWorkManagement for NullUnitOfWork {
    fn start(&mut self) -> ScopeResult<()> {
        Ok(())
    }

    fn finish(&mut self, _error: Option<&(dyn Error + Send + Sync + 'static)>) -> ScopeResult<()> {
        Ok(())
    }

    async fn start_async(&mut self) -> ScopeResult<()> {
        Ok(())
    }

    async fn finish_async(
        &mut self,
        _error: Option<&(dyn Error + Send + Sync + 'static)>,
    ) -> ScopeResult<()> {
        Ok(())
    }
}
