//! # uowscope Testkit
//!
//! Test utilities for uowscope.
//!
//! This crate provides:
//! - An in-memory, journaling resource backend with failure injection
//! - A recording change subscriber
//! - Harness fixtures that run tests on a fresh call chain
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use uowscope_testkit::prelude::*;
//!
//! #[test]
//! fn nested_joins_commit_once() {
//!     with_harness(|h| {
//!         let outer = h.factory.create().unwrap();
//!         let inner = h.factory.create().unwrap();
//!         // ...
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod memory;
pub mod subscriber;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::memory::*;
    pub use crate::subscriber::*;
}

pub use fixtures::*;
pub use generators::*;
pub use memory::*;
pub use subscriber::*;
