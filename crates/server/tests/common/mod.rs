//! Shared harness for the integration tests.

pub mod app;
pub mod fixtures;

#[allow(unused_imports)]
pub use app::*;
#[allow(unused_imports)]
pub use fixtures::*;
