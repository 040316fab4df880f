use super::report::{OutcomeStatus, Phase, UploadOutcome};
use super::storage::MemoryUrlStore;
use crate::api::upload::models::{FileInfo, StatusReport, UploadTarget};
use crate::api::upload::retry::{make_attempts, RetryPolicy, Sleeper, ThreadSleeper};
use crate::api::upload::status::StatusPoller;
use crate::api::upload::tus::{ResumableUploadSession, DEFAULT_CHUNK_SIZE};
use crate::error::{SingleUploadError, TransferError, UploadError};
use crate::metadata::{ConfigSource, Definition, MetadataBuilder};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use std::io::Write;
use std::sync::{atomic::AtomicBool, Arc};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

pub const PLACEHOLDER_PREFIX: &str = "test-upload-file";
pub const PLACEHOLDER_SUFFIX: &str = ".temp";
pub const PLACEHOLDER_CONTENT: &str = "--empty file--\n";

/// 创建一次上传用的占位文件；返回值被丢弃时文件随之删除。
pub fn create_placeholder_file() -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(PLACEHOLDER_PREFIX)
        .suffix(PLACEHOLDER_SUFFIX)
        .tempfile()?;
    file.write_all(PLACEHOLDER_CONTENT.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// 串联 元数据 → 上传 → 状态查询，逐个处理目标并汇总结果。
///
/// 目标之间只共享只读的 token 与续传 URL 存储；每个目标独占一个上传会话。
pub struct UploadOrchestrator {
    client: Client,
    base_url: String,
    chunk_size: usize,
    status_rounds: u32,
    session_retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    poller: StatusPoller,
    url_store: MemoryUrlStore,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl UploadOrchestrator {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            poller: StatusPoller::new(client.clone()),
            client,
            base_url: base_url.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            status_rounds: 1,
            session_retry: RetryPolicy::tus_default(),
            sleeper: Arc::new(ThreadSleeper),
            url_store: MemoryUrlStore::new(),
            cancel_flag: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_status_rounds(mut self, rounds: u32) -> Self {
        self.status_rounds = rounds.max(1);
        self
    }

    pub fn with_session_retry(mut self, policy: RetryPolicy) -> Self {
        self.session_retry = policy;
        self
    }

    pub fn with_status_policy(mut self, policy: RetryPolicy) -> Self {
        self.poller = self.poller.with_policy(policy);
        self
    }

    /// 会话重试与状态轮询共用同一个 sleeper。
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.poller = self.poller.with_sleeper(sleeper.clone());
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    /// 单目标模式：任何阶段的错误都直接返回给调用方，并附带失败的结果。
    pub fn run_single(
        &self,
        token: &str,
        destination: &str,
        event: &str,
    ) -> Result<UploadOutcome, SingleUploadError> {
        info!(destination, event, "starting single upload");
        let mut draft = OutcomeDraft::new(destination, event);
        match self.execute(token, &mut draft, None) {
            Ok(report) => Ok(draft.into_outcome(Ok(&report))),
            Err(error) => {
                let outcome = draft.into_outcome(Err(&error));
                error!(error = %error, phase = ?outcome.failed_phase, "single upload failed");
                Err(SingleUploadError {
                    outcome: Box::new(outcome),
                    error,
                })
            }
        }
    }

    /// 批量模式：先读取全部配置（失败即终止），再逐个处理；
    /// 单个目标的上传或状态错误只记录在它自己的结果里。
    pub fn run_batch(
        &self,
        token: &str,
        config: &dyn ConfigSource,
    ) -> Result<Vec<UploadOutcome>, UploadError> {
        let mut plan = Vec::new();
        for destination in config.destinations()? {
            for event in destination.ext_events {
                let definitions = config.definitions(&event.definition_filename)?;
                plan.push((destination.destination_id.clone(), event.name, definitions));
            }
        }
        info!(targets = plan.len(), "starting batch upload");

        let mut outcomes = Vec::with_capacity(plan.len());
        for (destination, event, definitions) in &plan {
            let mut draft = OutcomeDraft::new(destination, event);
            let result = self.execute(token, &mut draft, Some(definitions.as_slice()));
            if let Err(err) = &result {
                warn!(
                    destination = %destination,
                    event = %event,
                    error = %err,
                    "upload failed, continuing with next target"
                );
            }
            outcomes.push(draft.into_outcome(result.as_ref()));
        }
        Ok(outcomes)
    }

    fn execute(
        &self,
        token: &str,
        draft: &mut OutcomeDraft,
        definitions: Option<&[Definition]>,
    ) -> Result<StatusReport, UploadError> {
        draft.phase = Phase::Prepare;
        let placeholder = create_placeholder_file()?;
        let file = FileInfo::inspect(placeholder.path())?;
        draft.file_name = Some(file.name.clone());

        draft.phase = Phase::Metadata;
        let metadata = MetadataBuilder::build(&draft.destination, &draft.event, &file, definitions)?;
        let target = UploadTarget::new(file, &draft.destination, &draft.event, metadata);

        draft.phase = Phase::Upload;
        let tguid = self.upload(token, &target, draft)?;

        draft.phase = Phase::Status;
        let report =
            self.poller
                .poll_until_terminal(token, &tguid, &self.base_url, self.status_rounds)?;
        draft.status = Some(report.status.clone());
        info!(
            destination = %draft.destination,
            event = %draft.event,
            tguid = %tguid,
            status = %report.status,
            "upload finished"
        );
        Ok(report)
    }

    /// 整段会话按 tus 的默认间隔重试；重试时沿用已创建的资源地址续传。
    fn upload(
        &self,
        token: &str,
        target: &UploadTarget,
        draft: &mut OutcomeDraft,
    ) -> Result<String, TransferError> {
        let mut session = ResumableUploadSession::new(&self.client, token, &self.base_url, target)
            .with_chunk_size(self.chunk_size)
            .with_url_store(&self.url_store);
        if let Some(flag) = &self.cancel_flag {
            session = session.with_cancel_flag(flag.clone());
        }

        let result = make_attempts(
            &self.session_retry,
            self.sleeper.as_ref(),
            TransferError::is_retriable,
            |attempt| {
                if attempt > 0 {
                    info!(
                        tguid = session.identifier().unwrap_or_default(),
                        attempt, "retrying upload session"
                    );
                }
                session.run()
            },
        );
        draft.tguid = session.identifier().map(str::to_string);
        result
    }
}

/// 处理过程中逐步填充的结果草稿。
struct OutcomeDraft {
    destination: String,
    event: String,
    file_name: Option<String>,
    tguid: Option<String>,
    status: Option<String>,
    phase: Phase,
    started_at: DateTime<Utc>,
}

impl OutcomeDraft {
    fn new(destination: &str, event: &str) -> Self {
        Self {
            destination: destination.to_string(),
            event: event.to_string(),
            file_name: None,
            tguid: None,
            status: None,
            phase: Phase::Prepare,
            started_at: Utc::now(),
        }
    }

    fn into_outcome(self, result: Result<&StatusReport, &UploadError>) -> UploadOutcome {
        let (result, error, failed_phase) = match result {
            Ok(report) if report.is_complete() => (OutcomeStatus::Success, None, None),
            Ok(report) => (
                OutcomeStatus::Failed,
                Some(format!("server reported status `{}`", report.status)),
                Some(Phase::Status),
            ),
            Err(err) => (OutcomeStatus::Failed, Some(err.to_string()), Some(self.phase)),
        };
        UploadOutcome {
            destination: self.destination,
            event: self.event,
            file_name: self.file_name,
            tguid: self.tguid,
            status: self.status,
            result,
            error,
            failed_phase,
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::{build_blocking_client, DEFAULT_TIMEOUT};
    use crate::api::upload::retry::tests::RecordingSleeper;
    use std::sync::atomic::Ordering;

    fn orchestrator(base_url: &str, sleeper: Arc<RecordingSleeper>) -> UploadOrchestrator {
        UploadOrchestrator::new(build_blocking_client(DEFAULT_TIMEOUT).unwrap(), base_url)
            .with_sleeper(sleeper)
    }

    fn mock_created(server: &mut mockito::Server, id: &str) -> mockito::Mock {
        server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer tok")
            .match_header("upload-length", "15")
            .with_status(201)
            .with_header("Location", &format!("/upload/{id}"))
            .create()
    }

    #[test]
    fn placeholder_file_has_fixed_content() {
        let file = create_placeholder_file().unwrap();
        let info = FileInfo::inspect(file.path()).unwrap();
        assert_eq!(info.size, 15);
        assert!(info.name.starts_with(PLACEHOLDER_PREFIX));
        assert!(info.name.ends_with(PLACEHOLDER_SUFFIX));
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn single_upload_succeeds_when_status_complete() {
        let mut server = mockito::Server::new();
        let create = mock_created(&mut server, "abc123");
        let patch = server
            .mock("PATCH", "/upload/abc123")
            .match_header("upload-offset", "0")
            .with_status(204)
            .with_header("Upload-Offset", "15")
            .create();
        let _mock = server
            .mock("GET", "/status/abc123")
            .with_status(200)
            .with_body(r#"{"status":"Complete","percent_complete":100}"#)
            .create();

        let outcome = orchestrator(&server.url(), Arc::new(RecordingSleeper::default()))
            .run_single("tok", "dextesting", "testevent1")
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.tguid.as_deref(), Some("abc123"));
        assert_eq!(outcome.status.as_deref(), Some("Complete"));
        assert!(outcome.error.is_none());
        create.assert();
        patch.assert();
    }

    #[test]
    fn non_complete_status_is_a_failed_outcome() {
        let mut server = mockito::Server::new();
        let _create = mock_created(&mut server, "f1");
        let _mock = server
            .mock("PATCH", "/upload/f1")
            .with_status(204)
            .with_header("Upload-Offset", "15")
            .create();
        let _mock = server
            .mock("GET", "/status/f1")
            .with_status(200)
            .with_body(r#"{"status":"Failed"}"#)
            .create();

        let outcome = orchestrator(&server.url(), Arc::new(RecordingSleeper::default()))
            .run_single("tok", "dextesting", "testevent1")
            .unwrap();
        assert_eq!(outcome.result, OutcomeStatus::Failed);
        assert_eq!(outcome.failed_phase, Some(Phase::Status));
        assert_eq!(outcome.status.as_deref(), Some("Failed"));
    }

    #[test]
    fn unknown_pair_fails_single_mode_before_upload() {
        let mut server = mockito::Server::new();
        let create = server.mock("POST", "/upload").expect(0).create();

        let err = orchestrator(&server.url(), Arc::new(RecordingSleeper::default()))
            .run_single("tok", "nope", "nothing")
            .unwrap_err();
        assert!(matches!(err.error, UploadError::UnknownDestinationEvent { .. }));
        assert_eq!(err.outcome.result, OutcomeStatus::Failed);
        assert_eq!(err.outcome.failed_phase, Some(Phase::Metadata));
        let line = err.outcome.summary_line();
        assert!(line.starts_with("Destination: nope Event: nothing File: test-upload-file"));
        assert!(line.contains("TGUID: - Status: FAILED"));
        create.assert();
    }

    #[test]
    fn server_errors_retry_the_session_and_resume() {
        let mut server = mockito::Server::new();
        let create = mock_created(&mut server, "r1");
        let failing = server
            .mock("PATCH", "/upload/r1")
            .with_status(503)
            .expect(1)
            .create();
        let head = server
            .mock("HEAD", "/upload/r1")
            .with_status(200)
            .with_header("Upload-Offset", "0")
            .expect(1)
            .create();
        let patched = server
            .mock("PATCH", "/upload/r1")
            .with_status(204)
            .with_header("Upload-Offset", "15")
            .create();
        let _mock = server
            .mock("GET", "/status/r1")
            .with_status(200)
            .with_body(r#"{"status":"Complete"}"#)
            .create();
        let sleeper = Arc::new(RecordingSleeper::default());

        let outcome = orchestrator(&server.url(), sleeper.clone())
            .run_single("tok", "dextesting", "testevent1")
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(sleeper.recorded(), vec![std::time::Duration::from_millis(500)]);
        create.assert();
        failing.assert();
        head.assert();
        patched.assert();
    }

    #[test]
    fn cancelled_upload_keeps_identifier() {
        let mut server = mockito::Server::new();
        let _create = mock_created(&mut server, "c1");
        let patch = server.mock("PATCH", "/upload/c1").expect(0).create();
        let flag = Arc::new(AtomicBool::new(false));
        flag.store(true, Ordering::Relaxed);

        let orchestrator = orchestrator(&server.url(), Arc::new(RecordingSleeper::default()))
            .with_cancel_flag(flag);
        let err = orchestrator
            .run_single("tok", "dextesting", "testevent1")
            .unwrap_err();
        assert!(matches!(
            err.error,
            UploadError::Transfer(TransferError::Cancelled)
        ));
        assert_eq!(err.outcome.tguid.as_deref(), Some("c1"));
        assert_eq!(err.outcome.failed_phase, Some(Phase::Upload));
        assert!(err.outcome.summary_line().contains("TGUID: c1 Status: FAILED"));
        patch.assert();
    }
}
