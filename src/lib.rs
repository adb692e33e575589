// Beacon Validator - Scripted GATT conformance runner

pub mod ble;
pub mod config;
pub mod conformance;
pub mod store;

pub use config::ValidatorConfig;
pub use conformance::{
    suites, ConformanceError, LogObserver, RunObserver, RunSummary, Scheduler, SchedulerHandle,
    Script,
};
