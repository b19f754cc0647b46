//! Persistence for data that outlives the process

pub mod file;
pub mod traits;

pub use file::FileOutcomeRepository;
pub use traits::OutcomeRepository;
