use super::models::UploadTarget;
use crate::api::client::{
    OFFSET_CONTENT_TYPE, TUS_RESUMABLE, TUS_RESUMABLE_HEADER, UPLOAD_LENGTH_HEADER,
    UPLOAD_METADATA_HEADER, UPLOAD_OFFSET_HEADER,
};
use crate::error::TransferError;
use crate::upload_manager::storage::UrlStore;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, info};
use url::Url;

/// 默认分片大小：1 MiB。
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// 单次分片传输的结果：推进到新的偏移量，或者整个文件已传完。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkProgress {
    Advanced(u64),
    Complete,
}

/// 一次上传尝试的可变状态，仅由所属会话持有。
#[derive(Clone, Debug, Default)]
pub struct UploadSession {
    pub offset: u64,
    pub upload_url: Option<Url>,
    pub identifier: Option<String>,
    pub chunk_size: usize,
    pub completed: bool,
}

/// 驱动 tus 协议的可续传上传会话。
///
/// 流程：创建（或根据已记录的资源地址续传）→ 按固定大小 PATCH 分片 →
/// 收到"已完成"后释放文件句柄并返回资源标识。
pub struct ResumableUploadSession<'a> {
    client: &'a Client,
    token: &'a str,
    creation_url: String,
    target: &'a UploadTarget,
    url_store: Option<&'a dyn UrlStore>,
    cancel_flag: Option<Arc<AtomicBool>>,
    progress: Option<Box<dyn FnMut(u64, u64) + Send + 'a>>,
    state: UploadSession,
}

impl<'a> ResumableUploadSession<'a> {
    pub fn new(
        client: &'a Client,
        token: &'a str,
        endpoint_base_url: &str,
        target: &'a UploadTarget,
    ) -> Self {
        Self {
            client,
            token,
            creation_url: crate::api::client::join_base(endpoint_base_url, "/upload"),
            target,
            url_store: None,
            cancel_flag: None,
            progress: None,
            state: UploadSession {
                chunk_size: DEFAULT_CHUNK_SIZE,
                ..UploadSession::default()
            },
        }
    }

    /// 分片大小只能在会话开始前设置，0 表示使用默认值。
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.state.chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        self
    }

    pub fn with_url_store(mut self, store: &'a dyn UrlStore) -> Self {
        self.url_store = Some(store);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn FnMut(u64, u64) + Send + 'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 服务端分配的标识；创建成功后即可读取，即便后续分片失败。
    pub fn identifier(&self) -> Option<&str> {
        self.state.identifier.as_deref()
    }

    pub fn state(&self) -> &UploadSession {
        &self.state
    }

    /// 执行一次上传尝试。再次调用会从服务端确认的偏移量续传，而不是重新创建。
    pub fn run(&mut self) -> Result<String, TransferError> {
        let mut handle = TransferHandle::open(self.target.path())?;
        let result = self.transfer(&mut handle);
        handle.finish();
        result
    }

    fn transfer(&mut self, handle: &mut TransferHandle) -> Result<String, TransferError> {
        if self.state.upload_url.is_none() {
            let stored = self
                .url_store
                .and_then(|store| store.get(&self.target.fingerprint()));
            match stored {
                Some(url) => {
                    debug!(url = %url, "found stored upload url, resuming");
                    self.adopt_upload_url(url)?;
                    self.resume()?;
                }
                None => self.create()?,
            }
        } else {
            self.resume()?;
        }

        let total = self.target.size();
        loop {
            if self.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            match self.upload_chunk(handle)? {
                ChunkProgress::Advanced(offset) => self.report_progress(offset, total),
                ChunkProgress::Complete => break,
            }
        }

        self.state.completed = true;
        if let Some(store) = self.url_store {
            store.remove(&self.target.fingerprint());
        }
        self.state
            .identifier
            .clone()
            .ok_or_else(|| TransferError::InvalidLocation(String::new()))
    }

    /// `POST {base}/upload`，从 Location 中取得资源地址与标识。
    fn create(&mut self) -> Result<(), TransferError> {
        let metadata = encode_metadata(self.target.metadata())?;
        let mut request = self
            .client
            .post(&self.creation_url)
            .header(AUTHORIZATION, bearer(self.token))
            .header(TUS_RESUMABLE_HEADER, TUS_RESUMABLE)
            // 初始请求没有 body，显式声明长度为 0。
            .header(CONTENT_LENGTH, "0")
            .header(UPLOAD_LENGTH_HEADER, self.target.size().to_string());
        if !metadata.is_empty() {
            request = request.header(UPLOAD_METADATA_HEADER, metadata);
        }

        let response = request.send().map_err(|source| TransferError::Request {
            operation: "creating upload",
            source,
        })?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(TransferError::UnexpectedStatus {
                operation: "creating upload",
                status,
            });
        }

        let location = header_str(&response, "Location")?
            .ok_or(TransferError::MissingHeader("Location"))?;
        let url = Url::parse(&self.creation_url)
            .and_then(|base| base.join(&location))
            .map_err(|_| TransferError::InvalidLocation(location.clone()))?;

        self.adopt_upload_url(url)?;
        self.state.offset = 0;
        if let (Some(store), Some(url)) = (self.url_store, self.state.upload_url.as_ref()) {
            store.set(&self.target.fingerprint(), url);
        }
        info!(
            tguid = self.identifier().unwrap_or_default(),
            size = self.target.size(),
            "upload created"
        );
        Ok(())
    }

    /// `HEAD {location}` 查询服务端最后确认的偏移量。
    fn resume(&mut self) -> Result<(), TransferError> {
        let url = self
            .state
            .upload_url
            .clone()
            .ok_or_else(|| TransferError::InvalidLocation(String::new()))?;
        let response = self
            .client
            .head(url.clone())
            .header(AUTHORIZATION, bearer(self.token))
            .header(TUS_RESUMABLE_HEADER, TUS_RESUMABLE)
            .send()
            .map_err(|source| TransferError::Request {
                operation: "resuming upload",
                source,
            })?;

        let status = response.status().as_u16();
        if matches!(status, 403 | 404 | 410) {
            if let Some(store) = self.url_store {
                store.remove(&self.target.fingerprint());
            }
            return Err(TransferError::ResourceGone {
                url: url.to_string(),
                status,
            });
        }
        if !response.status().is_success() {
            return Err(TransferError::UnexpectedStatus {
                operation: "resuming upload",
                status,
            });
        }

        let offset = read_offset(&response)?;
        let total = self.target.size();
        if offset < self.state.offset || offset > total {
            return Err(TransferError::OffsetMismatch {
                previous: self.state.offset,
                actual: offset,
                total,
            });
        }
        info!(
            tguid = self.identifier().unwrap_or_default(),
            offset, "resuming upload from server offset"
        );
        self.state.offset = offset;
        Ok(())
    }

    /// 传输一个分片；没有剩余数据时返回 `Complete`。
    pub fn upload_chunk(
        &mut self,
        handle: &mut TransferHandle,
    ) -> Result<ChunkProgress, TransferError> {
        let total = self.target.size();
        let offset = self.state.offset;
        if offset >= total {
            return Ok(ChunkProgress::Complete);
        }
        let url = self
            .state
            .upload_url
            .clone()
            .ok_or_else(|| TransferError::InvalidLocation(String::new()))?;

        let max_len = (total - offset).min(self.state.chunk_size as u64) as usize;
        let chunk = handle.read_chunk(offset, max_len)?;
        if chunk.is_empty() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file ended at offset {offset}, expected {total} bytes"),
            )));
        }
        let sent = chunk.len() as u64;

        let response = self
            .client
            .patch(url)
            .header(AUTHORIZATION, bearer(self.token))
            .header(TUS_RESUMABLE_HEADER, TUS_RESUMABLE)
            .header(UPLOAD_OFFSET_HEADER, offset.to_string())
            .header(CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .body(chunk)
            .send()
            .map_err(|source| TransferError::Request {
                operation: "uploading chunk",
                source,
            })?;
        if !response.status().is_success() {
            return Err(TransferError::UnexpectedStatus {
                operation: "uploading chunk",
                status: response.status().as_u16(),
            });
        }

        let new_offset = read_offset(&response)?;
        if new_offset <= offset || new_offset > offset + sent || new_offset > total {
            return Err(TransferError::OffsetMismatch {
                previous: offset,
                actual: new_offset,
                total,
            });
        }
        self.state.offset = new_offset;
        Ok(ChunkProgress::Advanced(new_offset))
    }

    fn adopt_upload_url(&mut self, url: Url) -> Result<(), TransferError> {
        let identifier = identifier_from_url(url.as_str())
            .ok_or_else(|| TransferError::InvalidLocation(url.to_string()))?;
        self.state.identifier = Some(identifier);
        self.state.upload_url = Some(url);
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn report_progress(&mut self, uploaded: u64, total: u64) {
        if let Some(cb) = self.progress.as_mut() {
            cb(uploaded, total);
            return;
        }
        let percent = if total == 0 {
            100.0
        } else {
            uploaded as f64 / total as f64 * 100.0
        };
        info!(
            tguid = self.state.identifier.as_deref().unwrap_or_default(),
            "Upload at {percent:06.2}%."
        );
    }
}

/// 上传期间独占的文件句柄；`finish` 在所有退出路径上释放它。
pub struct TransferHandle {
    file: File,
    path: PathBuf,
}

impl TransferHandle {
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        Ok(Self {
            file: File::open(path)?,
            path: path.to_path_buf(),
        })
    }

    pub fn read_chunk(&mut self, offset: u64, max_len: usize) -> std::io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(max_len);
        (&mut self.file).take(max_len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn finish(self) {
        debug!(path = %self.path.display(), "released upload file handle");
    }
}

/// tus `Upload-Metadata`：`key base64(value)`，多个键值对用逗号连接。
pub fn encode_metadata(metadata: &BTreeMap<String, String>) -> Result<String, TransferError> {
    let mut pairs = Vec::with_capacity(metadata.len());
    for (key, value) in metadata {
        if key.is_empty() || key.contains([' ', ',']) {
            return Err(TransferError::InvalidHeader {
                header: "Upload-Metadata",
                value: key.clone(),
            });
        }
        pairs.push(format!("{key} {}", STANDARD.encode(value.as_bytes())));
    }
    Ok(pairs.join(","))
}

/// 资源地址的最后一段路径即为上传标识（tguid）。
pub fn identifier_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let segment = url
        .path_segments()?
        .filter(|segment| !segment.trim().is_empty())
        .last()?;
    let decoded = percent_decode_str(segment).decode_utf8_lossy();
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

fn header_str(response: &Response, name: &'static str) -> Result<Option<String>, TransferError> {
    match response.headers().get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim().to_string()))
            .map_err(|_| TransferError::InvalidHeader {
                header: name,
                value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            }),
    }
}

fn read_offset(response: &Response) -> Result<u64, TransferError> {
    let raw = header_str(response, UPLOAD_OFFSET_HEADER)?
        .ok_or(TransferError::MissingHeader(UPLOAD_OFFSET_HEADER))?;
    raw.parse::<u64>()
        .map_err(|_| TransferError::InvalidHeader {
            header: UPLOAD_OFFSET_HEADER,
            value: raw,
        })
}
