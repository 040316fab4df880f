use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 待上传本地文件的基础信息，元数据构建与上传都依赖它。
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl FileInfo {
    pub fn inspect(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: meta.len(),
            last_modified: DateTime::<Utc>::from(meta.modified()?),
        })
    }

    /// 以毫秒时间戳字符串表示的最后修改时间。
    pub fn last_modified_millis(&self) -> String {
        self.last_modified.timestamp_millis().to_string()
    }
}

/// 一次上传的不可变描述，会话开始前创建，之后不再修改。
#[derive(Clone, Debug)]
pub struct UploadTarget {
    file: FileInfo,
    destination: String,
    event: String,
    metadata: BTreeMap<String, String>,
}

impl UploadTarget {
    pub fn new(
        file: FileInfo,
        destination: &str,
        event: &str,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            file,
            destination: destination.to_string(),
            event: event.to_string(),
            metadata,
        }
    }

    pub fn file(&self) -> &FileInfo {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    pub fn file_name(&self) -> &str {
        &self.file.name
    }

    pub fn size(&self) -> u64 {
        self.file.size
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// 用于续传 URL 存储的指纹：路径 + 大小。
    pub fn fingerprint(&self) -> String {
        format!("{}-{}", self.file.path.to_string_lossy(), self.file.size)
    }
}

/// 服务端上报的上传状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    Pending,
    InProgress,
    Complete,
    Failed,
    Unknown,
}

impl UploadState {
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => UploadState::Pending,
            "inprogress" | "uploading" => UploadState::InProgress,
            "complete" | "completed" => UploadState::Complete,
            "failed" => UploadState::Failed,
            _ => UploadState::Unknown,
        }
    }

    /// 终态不会因为继续轮询而改变。
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadState::Complete | UploadState::Failed | UploadState::Unknown
        )
    }
}

/// `GET /status/{id}` 的响应；每次轮询重新获取，不做缓存。
/// 缺失或为 `null` 的字段取默认值，`timestamp` 既可以是字符串也可以是毫秒数。
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusReport {
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub percent_complete: f64,
    pub file_name: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub file_size_bytes: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub bytes_uploaded: u64,
    pub tus_upload_id: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub time_uploading_sec: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(deserialize_with = "string_or_number")]
    pub timestamp: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(text)) => Ok(Some(text)),
        Some(serde_json::Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "timestamp must be a string or a number, got {other}"
        ))),
    }
}

impl StatusReport {
    /// 解析状态响应：忽略未知字段，字段名大小写不敏感。
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        let normalized = match value {
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key.to_ascii_lowercase(), value))
                    .collect(),
            ),
            other => other,
        };
        serde_json::from_value(normalized)
    }

    pub fn state(&self) -> UploadState {
        UploadState::parse(&self.status)
    }

    /// 只有状态字符串忽略大小写等于 "Complete" 才算成功。
    pub fn is_complete(&self) -> bool {
        self.status.eq_ignore_ascii_case("Complete")
    }

    /// RFC 3339 字符串或毫秒时间戳。
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.as_deref()?.trim();
        if let Ok(millis) = raw.parse::<i64>() {
            return DateTime::<Utc>::from_timestamp_millis(millis);
        }
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn status_report_ignores_unknown_fields() {
        let body = r#"{
            "status": "Complete",
            "percent_complete": 100.0,
            "file_name": "test-upload-file.temp",
            "file_size_bytes": 15,
            "bytes_uploaded": 15,
            "tus_upload_id": "4f1c",
            "time_uploading_sec": 0.42,
            "metadata": {"meta_destination_id": "dextesting"},
            "timestamp": "2024-03-01T10:00:00Z",
            "jurisdiction": "XX",
            "nested": {"extra": [1, 2, 3]}
        }"#;
        let report = StatusReport::from_json(body).unwrap();
        assert_eq!(report.status, "Complete");
        assert_eq!(report.bytes_uploaded, 15);
        assert_eq!(report.tus_upload_id.as_deref(), Some("4f1c"));
        assert!(report.is_complete());
        assert!(report.timestamp_utc().is_some());
    }

    #[test]
    fn status_report_field_names_are_case_insensitive() {
        let body = r#"{"Status": "In Progress", "Percent_Complete": 40.5, "BYTES_UPLOADED": 6}"#;
        let report = StatusReport::from_json(body).unwrap();
        assert_eq!(report.state(), UploadState::InProgress);
        assert_eq!(report.percent_complete, 40.5);
        assert_eq!(report.bytes_uploaded, 6);
        assert!(!report.is_complete());
    }

    #[test]
    fn status_report_tolerates_nulls_and_numeric_timestamp() {
        let body = r#"{
            "status": "Complete",
            "percent_complete": null,
            "file_size_bytes": null,
            "bytes_uploaded": null,
            "time_uploading_sec": null,
            "metadata": null,
            "file_name": null,
            "timestamp": 1709287200000
        }"#;
        let report = StatusReport::from_json(body).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.percent_complete, 0.0);
        assert_eq!(report.bytes_uploaded, 0);
        assert!(report.metadata.is_empty());
        assert_eq!(report.timestamp.as_deref(), Some("1709287200000"));
        assert_eq!(
            report.timestamp_utc().map(|dt| dt.timestamp_millis()),
            Some(1_709_287_200_000)
        );
    }

    #[test]
    fn status_report_with_null_status_is_unknown() {
        let report = StatusReport::from_json(r#"{"status": null}"#).unwrap();
        assert_eq!(report.state(), UploadState::Unknown);
        assert!(!report.is_complete());
    }

    #[test]
    fn upload_state_parsing() {
        assert_eq!(UploadState::parse("complete"), UploadState::Complete);
        assert_eq!(UploadState::parse("FAILED"), UploadState::Failed);
        assert_eq!(UploadState::parse("in-progress"), UploadState::InProgress);
        assert_eq!(UploadState::parse("Pending"), UploadState::Pending);
        assert_eq!(UploadState::parse("weird"), UploadState::Unknown);
        assert!(!UploadState::Pending.is_terminal());
        assert!(UploadState::Failed.is_terminal());
    }

    #[test]
    fn file_info_reads_size_and_name() {
        let mut file = tempfile::Builder::new()
            .prefix("info")
            .suffix(".bin")
            .tempfile()
            .unwrap();
        file.write_all(b"0123456789").unwrap();
        let info = FileInfo::inspect(file.path()).unwrap();
        assert_eq!(info.size, 10);
        assert!(info.name.starts_with("info"));
        assert!(info.last_modified_millis().parse::<i64>().is_ok());
    }
}
