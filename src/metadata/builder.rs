use super::config::Definition;
use crate::api::upload::models::FileInfo;
use crate::error::UploadError;
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub const DESTINATION_FIELD: &str = "meta_destination_id";
pub const EVENT_FIELD: &str = "meta_ext_event";
/// 没有其它来源时填入的占位值。
pub const PLACEHOLDER: &str = "INTEGRATION-TEST";

const FILENAME_FIELDS: [&str; 2] = ["filename", "meta_ext_filename"];
const TIMESTAMP_FIELDS: [&str; 2] = ["original_file_timestamp", "meta_ext_file_timestamp"];

#[derive(Clone, Copy, Debug)]
enum MetaValue {
    Destination,
    Event,
    FileName,
    Fixed(&'static str),
}

type StaticEntry = &'static [(&'static str, MetaValue)];

const DEXTESTING_TESTEVENT1: StaticEntry = &[
    (DESTINATION_FIELD, MetaValue::Destination),
    (EVENT_FIELD, MetaValue::Event),
    ("filename", MetaValue::FileName),
    ("meta_ext_source", MetaValue::Fixed(PLACEHOLDER)),
];

const NDLP_ROUTINE_IMMUNIZATION: StaticEntry = &[
    (DESTINATION_FIELD, MetaValue::Destination),
    (EVENT_FIELD, MetaValue::Event),
    ("meta_ext_source", MetaValue::Fixed("IZGW")),
    ("meta_ext_sourceversion", MetaValue::Fixed("V2022-12-31")),
    ("meta_ext_filename", MetaValue::Fixed("TEST-FILE-3.zip")),
    ("meta_ext_submissionperiod", MetaValue::Fixed("2023Q1")),
    ("meta_schema_version", MetaValue::Fixed("1.0")),
    ("izgw_route_id", MetaValue::Fixed("dex-stg")),
    ("izgw_ipaddress", MetaValue::Fixed("127.0.0.1")),
    ("izgw_filesize", MetaValue::Fixed("1781578")),
    (
        "izgw_path",
        MetaValue::Fixed("/upload/files/f394848234438a40878125e990adfdc7"),
    ),
    (
        "izgw_uploaded_timestamp",
        MetaValue::Fixed("Mon, 21 Aug 2023 20:00:21 UTC"),
    ),
    ("meta_ext_entity", MetaValue::Fixed("MAA")),
    (
        "meta_username",
        MetaValue::Fixed("integration.testing.izgateway.org"),
    ),
    (
        "meta_ext_objectkey",
        MetaValue::Fixed("5c70b304-9a07-3329-8cac-a64a5dcba380"),
    ),
];

/// 内置的 (destination, event) 元数据表，键为小写；进程内只初始化一次。
static STATIC_METADATA: Lazy<HashMap<(String, String), StaticEntry>> = Lazy::new(|| {
    [
        ("dextesting", "testevent1", DEXTESTING_TESTEVENT1),
        ("ndlp", "routineimmunization", NDLP_ROUTINE_IMMUNIZATION),
    ]
    .into_iter()
    .map(|(destination, event, entry)| ((destination.to_string(), event.to_string()), entry))
    .collect()
});

fn table_key(destination: &str, event: &str) -> (String, String) {
    (destination.to_ascii_lowercase(), event.to_ascii_lowercase())
}

/// 为一次上传生成元数据。纯函数，不产生副作用。
pub struct MetadataBuilder;

impl MetadataBuilder {
    /// 未提供字段定义时查内置表；否则按字段定义补齐所有必填字段。
    pub fn build(
        destination: &str,
        event: &str,
        file: &FileInfo,
        definitions: Option<&[Definition]>,
    ) -> Result<BTreeMap<String, String>, UploadError> {
        match definitions {
            Some(definitions) => Ok(Self::from_definitions(destination, event, file, definitions)),
            None => Self::from_static_table(destination, event, file),
        }
    }

    fn from_static_table(
        destination: &str,
        event: &str,
        file: &FileInfo,
    ) -> Result<BTreeMap<String, String>, UploadError> {
        let entry = STATIC_METADATA
            .get(&table_key(destination, event))
            .ok_or_else(|| UploadError::UnknownDestinationEvent {
                destination: destination.to_string(),
                event: event.to_string(),
            })?;

        Ok(entry
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    MetaValue::Destination => destination.to_string(),
                    MetaValue::Event => event.to_string(),
                    MetaValue::FileName => file.name.clone(),
                    MetaValue::Fixed(fixed) => (*fixed).to_string(),
                };
                ((*key).to_string(), value)
            })
            .collect())
    }

    fn from_definitions(
        destination: &str,
        event: &str,
        file: &FileInfo,
        definitions: &[Definition],
    ) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        metadata.insert(DESTINATION_FIELD.to_string(), destination.to_string());
        metadata.insert(EVENT_FIELD.to_string(), event.to_string());

        for field in definitions
            .iter()
            .flat_map(|definition| definition.fields.iter())
            .filter(|field| field.required)
        {
            if metadata.contains_key(&field.fieldname) {
                continue;
            }
            let value = Self::default_value(&field.fieldname, field.allowed_values.as_deref(), file);
            debug!(field = %field.fieldname, value = %value, "filled required field");
            metadata.insert(field.fieldname.clone(), value);
        }
        metadata
    }

    fn default_value(fieldname: &str, allowed_values: Option<&[String]>, file: &FileInfo) -> String {
        if let Some(first) = allowed_values.and_then(|values| values.first()) {
            return first.clone();
        }
        let matches_any = |names: &[&str]| names.iter().any(|n| fieldname.eq_ignore_ascii_case(n));
        if matches_any(&FILENAME_FIELDS[..]) {
            file.name.clone()
        } else if matches_any(&TIMESTAMP_FIELDS[..]) {
            file.last_modified_millis()
        } else {
            PLACEHOLDER.to_string()
        }
    }
}
