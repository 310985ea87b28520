//! # revstore testkit
//!
//! Test utilities for revstore.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//! - Durability hooks that record or fail flushes
//! - Stress testing utilities
//! - One-call tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use revstore_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         db.put("docs", "a", Value::empty_object(), None).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod durability;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::durability::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
    pub use revstore_core::Value;
}

pub use durability::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;
