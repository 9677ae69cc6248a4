//! Test utilities for the hub core
//!
//! Fixtures over the in-memory backend, domain assertions and async helpers
//! shared by unit and integration tests.

pub mod assertions;
pub mod async_helpers;
pub mod fixtures;

pub use assertions::*;
pub use async_helpers::*;
pub use fixtures::*;
