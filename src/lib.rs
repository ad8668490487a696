pub mod agent;
pub mod audit;
pub mod config;
pub mod errors;
pub mod exit_codes;
pub mod logging;
pub mod repo;
pub mod state;
pub mod trigger;
pub mod workflow;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
