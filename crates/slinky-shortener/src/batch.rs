use slinky_core::{GenerateError, GenerationResult};

/// What happened to one item of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemOutcome {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub original_url: String,
    pub result: Result<GenerationResult, GenerateError>,
}

impl BatchItemOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Number of failed items in `outcomes`.
pub fn failures(outcomes: &[BatchItemOutcome]) -> usize {
    outcomes.iter().filter(|outcome| !outcome.is_ok()).count()
}
