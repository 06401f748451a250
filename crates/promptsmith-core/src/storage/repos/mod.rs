//! Repositories: the only code that issues SQL. Each borrows the `Store`.

mod evaluations;
mod prompts;
mod runs;
mod stages;
mod test_cases;
mod tracks;
mod weaknesses;

pub use evaluations::EvaluationRepository;
pub use prompts::PromptRepository;
pub use runs::RunRepository;
pub use stages::StageResultRepository;
pub use test_cases::TestCaseRepository;
pub use tracks::TrackRepository;
pub use weaknesses::WeaknessRepository;

/// Collects a `query_map` iterator, surfacing the first row error.
pub(crate) fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> crate::errors::Result<Vec<T>> {
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}
