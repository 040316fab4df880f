pub mod api;
pub mod error;
pub mod metadata;
pub mod settings;
pub mod upload_manager;

pub use api::auth::{OAuthLogin, TokenProvider};
pub use api::upload::{ResumableUploadSession, StatusPoller, StatusReport, UploadTarget};
pub use error::{SingleUploadError, StatusError, TransferError, UploadError};
pub use metadata::{ConfigSource, DirConfigStore, MetadataBuilder};
pub use settings::{AppConfig, Mode};
pub use upload_manager::{BatchReport, UploadOrchestrator, UploadOutcome};

/// 初始化日志：读取 `RUST_LOG`，缺省为 `info`。
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
