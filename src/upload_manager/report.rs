use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => f.write_str("SUCCESS"),
            OutcomeStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// 失败发生在哪个阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Metadata,
    Prepare,
    Upload,
    Status,
}

/// 单个 (destination, event) 的处理结果；失败时也保留已分配的标识与错误详情。
#[derive(Clone, Debug, Serialize)]
pub struct UploadOutcome {
    pub destination: String,
    pub event: String,
    pub file_name: Option<String>,
    pub tguid: Option<String>,
    pub status: Option<String>,
    pub result: OutcomeStatus,
    pub error: Option<String>,
    pub failed_phase: Option<Phase>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.result == OutcomeStatus::Success
    }

    /// 面向操作人员的一行摘要，成功与失败都会输出。
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "Destination: {} Event: {} File: {} TGUID: {} Status: {}",
            self.destination,
            self.event,
            self.file_name.as_deref().unwrap_or("-"),
            self.tguid.as_deref().unwrap_or("-"),
            self.result,
        );
        if let Some(status) = &self.status {
            line.push_str(&format!(" Server status: {status}"));
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(" Error: {error}"));
        }
        line
    }
}

/// 一次运行产生的全部结果。
#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub outcomes: Vec<UploadOutcome>,
}

impl BatchReport {
    pub fn new(outcomes: Vec<UploadOutcome>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            outcomes,
        }
    }

    pub fn any_failed(&self) -> bool {
        self.outcomes.iter().any(|outcome| !outcome.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        self.outcomes.iter().map(UploadOutcome::summary_line).collect()
    }

    pub fn print_summary(&self) {
        for line in self.summary_lines() {
            println!("{line}");
        }
        println!(
            "{} of {} uploads succeeded",
            self.success_count(),
            self.outcomes.len()
        );
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}
