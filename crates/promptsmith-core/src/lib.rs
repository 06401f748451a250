pub mod config;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod model;
pub mod pipeline;
pub mod providers;
pub mod refinement;
pub mod report;
pub mod scoring;
pub mod storage;

pub use engine::Orchestrator;
pub use errors::{ConfigError, OptimizeError, ServiceError};
