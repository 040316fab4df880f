use super::models::StatusReport;
use super::retry::{make_attempts, RetryPolicy, Sleeper, ThreadSleeper};
use crate::api::client::join_base;
use crate::error::StatusError;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::Client;
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// 退避基数：第 n 次重试等待 `3000ms * n`。
pub const STATUS_RETRY_BASE: Duration = Duration::from_millis(3000);
/// 首次请求之外最多再重试的次数。
pub const STATUS_MAX_RETRIES: u32 = 3;

/// 标识作为路径段时保留 RFC 3986 的非保留字符。
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// 按上传标识查询服务端状态。
///
/// 首次响应为 HTTP 400 时视为"尚未索引"的暂态，按线性退避重试，重试期间的
/// 任何非 200 响应都继续重试；首次响应为其它非 200 时立即失败。
pub struct StatusPoller {
    client: Client,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl StatusPoller {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::linear(STATUS_RETRY_BASE, STATUS_MAX_RETRIES),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn status_url(status_base_url: &str, identifier: &str) -> String {
        let encoded = utf8_percent_encode(identifier, PATH_SEGMENT);
        join_base(status_base_url, &format!("/status/{encoded}"))
    }

    pub fn poll(
        &self,
        token: &str,
        identifier: &str,
        status_base_url: &str,
    ) -> Result<StatusReport, StatusError> {
        let url = Self::status_url(status_base_url, identifier);
        debug!(url = %url, "checking file status");

        // 首次响应为 400 才进入重试；进入之后任何非 200 都继续重试。
        let retrying = Cell::new(false);
        let body = make_attempts(
            &self.policy,
            self.sleeper.as_ref(),
            |err: &StatusError| match err {
                StatusError::UnexpectedStatus { status } => {
                    if *status == 400 {
                        retrying.set(true);
                    }
                    retrying.get()
                }
                _ => false,
            },
            |attempt| {
                if attempt > 0 {
                    info!(tguid = identifier, retry = attempt, "status call retry");
                }
                self.fetch(&url, token)
            },
        )?;

        let report = StatusReport::from_json(&body)?;
        info!(tguid = identifier, status = %report.status, "status call successful");
        Ok(report)
    }

    /// 在状态为非终态时继续轮询，最多 `rounds` 轮；每轮之间等待退避基数。
    pub fn poll_until_terminal(
        &self,
        token: &str,
        identifier: &str,
        status_base_url: &str,
        rounds: u32,
    ) -> Result<StatusReport, StatusError> {
        let rounds = rounds.max(1);
        let mut round = 1;
        loop {
            let report = self.poll(token, identifier, status_base_url)?;
            if report.state().is_terminal() || round >= rounds {
                return Ok(report);
            }
            debug!(
                tguid = identifier,
                status = %report.status,
                round,
                "status not terminal yet"
            );
            self.sleeper.sleep(self.policy.delay_for(1).unwrap_or(STATUS_RETRY_BASE));
            round += 1;
        }
    }

    fn fetch(&self, url: &str, token: &str) -> Result<String, StatusError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .map_err(StatusError::Request)?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(StatusError::UnexpectedStatus { status });
        }
        response.text().map_err(StatusError::Request)
    }
}
