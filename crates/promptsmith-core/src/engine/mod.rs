pub mod evaluation;
pub mod orchestrator;

pub use orchestrator::Orchestrator;
