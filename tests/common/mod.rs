//! Common test utilities for chatmedia-dl integration tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod recorder;
#[allow(dead_code)]
pub mod source;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use recorder::*;
#[allow(unused_imports)]
pub use source::*;
