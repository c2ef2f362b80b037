/// 缓存键模块
/// 所有键都经由 CacheKeyBuilder 生成，参数排序后拼接，保证同一请求得到同一个键

// 响应缓存键
pub mod response_keys;

// 指标镜像键
pub mod metrics_keys;

// 通配模式
pub mod pattern;

pub use metrics_keys::{METRICS_PREFIX, metrics_pattern, metrics_route_pattern, metrics_sample_key};
pub use pattern::{glob_escape, glob_match, glob_matcher};
pub use response_keys::{RESPONSE_PREFIX, response_key};

/// 结构化的缓存键构造器
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    segments: Vec<String>,
    params: Vec<(String, Option<String>)>,
}

impl CacheKeyBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            segments: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), Some(value.into())));
        self
    }

    /// 拆分原始查询串，空片段忽略，没有 `=` 的片段作为无值参数
    pub fn query(mut self, raw: Option<&str>) -> Self {
        for pair in raw.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => self.params.push((key.to_string(), Some(value.to_string()))),
                None => self.params.push((pair.to_string(), None)),
            }
        }
        self
    }

    pub fn build(mut self) -> String {
        let mut key = self.namespace;
        for segment in &self.segments {
            key.push(':');
            key.push_str(segment);
        }

        if !self.params.is_empty() {
            self.params.sort();
            let query = self
                .params
                .iter()
                .map(|(k, v)| match v {
                    Some(v) => format!("{}={}", k, v),
                    None => k.clone(),
                })
                .collect::<Vec<_>>()
                .join("&");
            key.push('?');
            key.push_str(&query);
        }

        key
    }
}
