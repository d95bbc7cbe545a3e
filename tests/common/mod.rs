//! Common test utilities for release-relay integration tests

#[allow(dead_code)]
pub mod fakes;
#[allow(dead_code)]
pub mod fixtures;

pub use fakes::*;
pub use fixtures::*;
