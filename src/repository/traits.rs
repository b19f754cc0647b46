//! Repository trait definitions
//!
//! These traits define the abstract interfaces for data access operations.
//! Different implementations can provide different storage backends.

use crate::error::ScreenlogResult;
use crate::upload::UploadOutcome;

/// Repository for the upload outcome log
///
/// Outcomes are stored as a whole, oldest first.
pub trait OutcomeRepository: Send + Sync {
    /// Replace the stored outcomes
    fn save_outcomes(&self, outcomes: &[UploadOutcome]) -> ScreenlogResult<()>;

    /// Load stored outcomes, empty when nothing was saved yet
    fn load_outcomes(&self) -> ScreenlogResult<Vec<UploadOutcome>>;

    /// Delete all stored outcomes
    fn clear(&self) -> ScreenlogResult<()>;

    /// Count stored outcomes
    fn count_outcomes(&self) -> ScreenlogResult<usize> {
        Ok(self.load_outcomes()?.len())
    }
}
