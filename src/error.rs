use crate::upload_manager::UploadOutcome;
use std::path::PathBuf;

/// 分片上传（创建/续传/传输/收尾）阶段的错误。
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} request failed: {source}")]
    Request {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("upload server returned HTTP {status} while {operation}")]
    UnexpectedStatus { operation: &'static str, status: u16 },

    #[error("upload server response is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("invalid {header} header value: {value}")]
    InvalidHeader { header: &'static str, value: String },

    #[error("invalid upload location `{0}`")]
    InvalidLocation(String),

    #[error("upload resource {url} is gone (HTTP {status})")]
    ResourceGone { url: String, status: u16 },

    #[error("server offset {actual} is invalid after offset {previous} (total {total})")]
    OffsetMismatch { previous: u64, actual: u64, total: u64 },

    #[error("upload cancelled")]
    Cancelled,
}

impl TransferError {
    /// 传输层错误与 5xx/423 响应允许整段会话重试，其余错误直接终止。
    pub fn is_retriable(&self) -> bool {
        match self {
            TransferError::Request { .. } => true,
            TransferError::UnexpectedStatus { status, .. } => {
                (500..600).contains(status) || *status == 423
            }
            _ => false,
        }
    }
}

/// 状态查询阶段的错误。
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("status request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("status call failed with response code {status}")]
    UnexpectedStatus { status: u16 },

    #[error("failed to parse status response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 编排层对外暴露的错误分类。
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("login failed: {0}")]
    Auth(String),

    #[error("no metadata found for destination `{destination}` event `{event}`")]
    UnknownDestinationEvent { destination: String, event: String },

    #[error("config error at {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to prepare upload file: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub(crate) fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        UploadError::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// 批量模式下这些错误发生在逐个目标处理之前，需要终止整个运行。
    pub fn is_fatal_in_batch(&self) -> bool {
        matches!(
            self,
            UploadError::Auth(_)
                | UploadError::Config { .. }
                | UploadError::Settings(_)
                | UploadError::HttpClient(_)
        )
    }
}

/// 单目标模式的失败：保留失败的结果，调用方仍可输出摘要与报告。
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SingleUploadError {
    pub outcome: Box<UploadOutcome>,
    #[source]
    pub error: UploadError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_locked_are_retriable() {
        for status in [500, 502, 503, 423] {
            let err = TransferError::UnexpectedStatus {
                operation: "uploading chunk",
                status,
            };
            assert!(err.is_retriable(), "HTTP {status} should be retriable");
        }
    }

    #[test]
    fn client_errors_are_terminal() {
        for status in [400, 401, 404, 409, 412] {
            let err = TransferError::UnexpectedStatus {
                operation: "uploading chunk",
                status,
            };
            assert!(!err.is_retriable(), "HTTP {status} should be terminal");
        }
        assert!(!TransferError::Cancelled.is_retriable());
        assert!(!TransferError::ResourceGone {
            url: "http://localhost/upload/x".into(),
            status: 404,
        }
        .is_retriable());
    }

    #[test]
    fn batch_fatality() {
        assert!(UploadError::Auth("HTTP 401".into()).is_fatal_in_batch());
        assert!(UploadError::config("configs", "missing").is_fatal_in_batch());
        assert!(!UploadError::Transfer(TransferError::Cancelled).is_fatal_in_batch());
        assert!(
            !UploadError::Status(StatusError::UnexpectedStatus { status: 400 }).is_fatal_in_batch()
        );
    }
}
