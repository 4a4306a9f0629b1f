//! Fixture resolution: dependency ordering at discovery time and scoped
//! acquisition with reverse-order teardown at run time.

pub mod graph;
pub mod scope;

pub use graph::FixtureGraph;
pub use scope::{SuiteScope, TestScope, WorkerScope};
