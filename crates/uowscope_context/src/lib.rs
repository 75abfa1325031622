//! # uowscope Context
//!
//! Ambient value storage scoped to a logical call chain.
//!
//! This crate provides the lowest layer of uowscope:
//! - [`ScopeKey`] - process-stable identifiers for ambient slots
//! - [`CallContext`] - the carrier that flows with one call chain
//! - [`ScopeStore`] - a typed key/value view over the current carrier
//!
//! ## Propagation
//!
//! A value set in a call chain is visible to everything that chain runs,
//! across `.await` points, and to child tasks spawned with
//! [`spawn_in_context`]. Chains started independently (separate threads,
//! [`spawn_detached`], or a fresh [`CallContext::scope`]) never observe
//! each other's values. A task on a tokio runtime that was started with a
//! plain `tokio::spawn` has no carrier of its own; its reads see nothing and
//! its writes are dropped.
//!
//! ## Example
//!
//! ```rust
//! use uowscope_context::{CallContext, ScopeKey, ScopeStore};
//!
//! let key = ScopeKey::generate();
//! CallContext::new().sync_scope(|| {
//!     ScopeStore::<u32>::set(key, 7);
//!     assert_eq!(ScopeStore::<u32>::get(key), Some(7));
//! });
//! assert_eq!(ScopeStore::<u32>::get(key), None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod context;
mod key;
mod store;

pub use context::{spawn_detached, spawn_in_context, CallContext};
pub use key::ScopeKey;
pub use store::ScopeStore;
