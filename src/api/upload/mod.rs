pub mod models;
pub mod retry;
pub mod status;
pub mod tus;

pub use models::{FileInfo, StatusReport, UploadState, UploadTarget};
pub use retry::{make_attempts, RetryPolicy, Sleeper, ThreadSleeper};
pub use status::StatusPoller;
pub use tus::{
    encode_metadata, identifier_from_url, ChunkProgress, ResumableUploadSession, UploadSession,
    DEFAULT_CHUNK_SIZE,
};
