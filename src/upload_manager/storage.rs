use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// 续传 URL 存储接口：按文件指纹记录 tus 资源地址，方便替换实现或编写单测。
pub trait UrlStore: Send + Sync {
    fn get(&self, fingerprint: &str) -> Option<Url>;
    fn set(&self, fingerprint: &str, url: &Url);
    fn remove(&self, fingerprint: &str);
}

/// 默认的内存实现，生命周期与一次运行相同。
#[derive(Default)]
pub struct MemoryUrlStore {
    urls: Mutex<HashMap<String, Url>>,
}

impl MemoryUrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.urls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UrlStore for MemoryUrlStore {
    fn get(&self, fingerprint: &str) -> Option<Url> {
        self.urls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(fingerprint)
            .cloned()
    }

    fn set(&self, fingerprint: &str, url: &Url) {
        self.urls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(fingerprint.to_string(), url.clone());
    }

    fn remove(&self, fingerprint: &str) {
        self.urls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(fingerprint);
    }
}
