//! # uowscope Core
//!
//! Reference-counted ambient unit-of-work scopes.
//!
//! This crate provides:
//! - [`ResourceRegistry`] - one lazily created handle per resource type,
//!   committed and rolled back together with capture-and-continue errors
//! - [`AmbientScope`] / [`ReadOnlyScope`] - registries shared by every
//!   caller on one logical call chain, finalized by the last reference
//! - [`ScopeFactory`] - create, join, or deliberately isolate scopes
//! - [`DefaultUnitOfWork`] / [`NullUnitOfWork`] - start/finish orchestration
//!
//! ## Design Principles
//!
//! - Resource handles are opaque: the core only persists, commits, rolls
//!   back and disposes them
//! - Ambient state flows with the call chain, never through a global
//! - Disposal never fails; failures on release are logged
//! - Only the holder of the last reference persists
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use uowscope_core::{
//!     HandleResult, IsolationLevel, ResourceHandle, ScopeFactory, TransactionHandle,
//!     TypedResourceFactory,
//! };
//!
//! #[derive(Default)]
//! struct Orders {
//!     pending: Vec<String>,
//! }
//!
//! impl ResourceHandle for Orders {
//!     fn persist_changes(&mut self) -> HandleResult<usize> {
//!         Ok(std::mem::take(&mut self.pending).len())
//!     }
//!
//!     fn begin_transaction(
//!         &mut self,
//!         _isolation: IsolationLevel,
//!     ) -> HandleResult<Box<dyn TransactionHandle>> {
//!         Err("transactions are not supported".into())
//!     }
//! }
//!
//! let resources = TypedResourceFactory::new().with(|| Ok(Orders::default()));
//! let factory = ScopeFactory::new(Arc::new(resources));
//!
//! let outer = factory.create()?;
//! let inner = factory.create()?;
//! assert_eq!(outer.ref_count(), 2);
//!
//! inner.with_resource(|orders: &mut Orders| orders.pending.push("order-1".into()))?;
//! assert_eq!(inner.save_changes()?, 0); // delayed: `outer` still holds the scope
//! inner.dispose();
//!
//! assert_eq!(outer.save_changes()?, 1);
//! outer.dispose();
//! # Ok::<(), uowscope_core::ScopeError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod factory;
mod notify;
mod orchestrator;
mod registry;
mod resource;
mod scope;
mod types;

#[cfg(test)]
mod test_support;

pub use config::ScopeConfig;
pub use error::{
    HandleError, HandleResult, ResourceOperation, ScopeError, ScopeResult,
};
pub use factory::{ScopeFactory, ScopeProvider};
pub use notify::{ChangeKind, ChangeNotifier, ChangeSubscriber, PendingChange};
pub use orchestrator::{DefaultUnitOfWork, ExecuteError, NullUnitOfWork, UnitOfWorkManagement};
pub use registry::ResourceRegistry;
pub use resource::{
    AsAny, ResourceFactory, ResourceHandle, ResourceKind, TransactionHandle,
    TypedResourceFactory, UnknownResource,
};
pub use scope::{AmbientScope, ReadOnlyScope, UnitOfWork};
pub use types::{IsolationLevel, JoinStrategy, ScopeId};

pub use tokio_util::sync::CancellationToken;
