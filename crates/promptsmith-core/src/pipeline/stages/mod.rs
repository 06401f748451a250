mod evaluate;
mod generate_prompts;
mod generate_tests;
mod refine;
mod report;
mod select;

pub use evaluate::EvaluatePrompts;
pub use generate_prompts::GeneratePrompts;
pub use generate_tests::GenerateTests;
pub use refine::Refine;
pub use report::{BuildReport, PersistReport};
pub use select::{SelectTopK, SelectTopM};
