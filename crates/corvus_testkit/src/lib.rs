//! # Corvus Testkit
//!
//! Test utilities for CorvusDB.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Sample triggers used by the scenario tests
//! - A recording indexing engine
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use corvus_testkit::prelude::*;
//! use serde_json::json;
//!
//! with_temp_db(|db| {
//!     db.put("users/1", None, object(json!({"name": "ayende"})), Default::default(), None)
//!         .unwrap();
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod fixtures;
pub mod generators;
pub mod stress;
pub mod triggers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::triggers::*;
}

pub use engine::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
pub use triggers::*;
