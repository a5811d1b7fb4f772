pub mod catalog;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod ecs;
pub mod engine;
pub mod error;
pub mod fare;
pub mod matching;
pub mod pool;
pub mod quotes;
pub mod runner;
pub mod spatial;
pub mod systems;
pub mod telemetry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
