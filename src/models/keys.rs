use std::fmt;

use axum::http::Method;
use serde::{Deserialize, Serialize};

/// 调用方标识（API Key 或 IP），限流分区键，每个请求重新构造
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientKey(String);

impl ClientKey {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self(Self::UNKNOWN.to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 规范化后的 `"{METHOD} {path-template}"`，同时用于限流和指标分区
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteKey(String);

impl RouteKey {
    pub fn new(method: &Method, path: &str) -> Self {
        Self(format!("{} {}", method.as_str(), normalize_path(path)))
    }

    /// 直接使用已规范化的键，例如从配置中读取
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 去掉方法前缀后的路径部分
    pub fn path(&self) -> &str {
        match self.0.split_once(' ') {
            Some((_, path)) => path,
            None => &self.0,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_key_trims_trailing_slash() {
        assert_eq!(RouteKey::new(&Method::GET, "/events/").as_str(), "GET /events");
        assert_eq!(RouteKey::new(&Method::POST, "/").as_str(), "POST /");
        assert_eq!(RouteKey::new(&Method::GET, "/events/{id}").path(), "/events/{id}");
    }

    #[test]
    fn blank_client_key_becomes_unknown() {
        assert_eq!(ClientKey::new("  ").as_str(), ClientKey::UNKNOWN);
        assert_eq!(ClientKey::new(" 10.0.0.1 ").as_str(), "10.0.0.1");
    }
}
