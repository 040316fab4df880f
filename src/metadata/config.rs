use crate::error::UploadError;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 目的地与事件清单的文件名。
pub const DESTINATIONS_FILE: &str = "allowed_destination_and_events.json";

/// 定义文件中的单个字段。
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct FieldDefinition {
    pub fieldname: String,
    #[serde(default)]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_required")]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Definition {
    #[serde(default)]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ExtEvent {
    pub name: String,
    pub definition_filename: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Destination {
    pub destination_id: String,
    #[serde(default)]
    pub ext_events: Vec<ExtEvent>,
}

/// `required` 既可能是布尔值也可能是字符串；只有忽略大小写等于 "true" 才算必填。
fn deserialize_required<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
        Null(()),
    }

    match Raw::deserialize(deserializer) {
        Ok(Raw::Bool(value)) => Ok(value),
        Ok(Raw::Text(text)) => Ok(text.trim().eq_ignore_ascii_case("true")),
        Ok(Raw::Null(())) => Ok(false),
        Err(_) => Err(de::Error::custom(
            "required must be a boolean or a string",
        )),
    }
}

/// 批量模式的外部配置来源，方便替换为其它存储或在单测中注入。
pub trait ConfigSource {
    fn destinations(&self) -> Result<Vec<Destination>, UploadError>;
    fn definitions(&self, definition_filename: &str) -> Result<Vec<Definition>, UploadError>;
}

/// 从本地目录读取 JSON 配置。
#[derive(Clone, Debug)]
pub struct DirConfigStore {
    root: PathBuf,
}

impl DirConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_json<T>(&self, file_name: &str) -> Result<T, UploadError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let path = self.root.join(file_name);
        let raw = fs::read_to_string(&path)
            .map_err(|e| UploadError::config(&path, format!("failed to read: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| UploadError::config(&path, format!("failed to parse: {e}")))
    }
}

impl ConfigSource for DirConfigStore {
    fn destinations(&self) -> Result<Vec<Destination>, UploadError> {
        self.read_json(DESTINATIONS_FILE)
    }

    fn definitions(&self, definition_filename: &str) -> Result<Vec<Definition>, UploadError> {
        self.read_json(definition_filename)
    }
}
