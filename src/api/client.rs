use reqwest::{blocking::Client, redirect::Policy};
use std::time::Duration;

/// tus 协议版本，所有 tus 请求都需要携带。
pub(crate) const TUS_RESUMABLE: &str = "1.0.0";
pub(crate) const TUS_RESUMABLE_HEADER: &str = "Tus-Resumable";
pub(crate) const UPLOAD_LENGTH_HEADER: &str = "Upload-Length";
pub(crate) const UPLOAD_OFFSET_HEADER: &str = "Upload-Offset";
pub(crate) const UPLOAD_METADATA_HEADER: &str = "Upload-Metadata";
pub(crate) const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// 默认请求超时；分片上传按 1 MiB 计算足够宽裕。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// 构建一个带有统一超时与重定向策略的阻塞式 HTTP 客户端。
/// 登录、上传、状态查询共用同一个客户端，避免重复配置。
pub fn build_blocking_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .redirect(Policy::limited(10))
        .build()
}

/// 拼接 base url 与路径，去掉 base 末尾多余的 `/`。
pub(crate) fn join_base(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
