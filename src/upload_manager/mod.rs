pub mod core;
pub mod report;
pub mod storage;

pub use core::{create_placeholder_file, UploadOrchestrator};
pub use report::{BatchReport, OutcomeStatus, Phase, UploadOutcome};
pub use storage::{MemoryUrlStore, UrlStore};
