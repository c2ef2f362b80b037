use axum::Json;
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 本层对调用方可见的错误，只有限流拒绝会真正中断请求
#[derive(Debug, Error)]
pub enum AppError {
    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
    #[error("internal server error")]
    InternalServerError,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::RateLimited { retry_after } => {
                let body = Json(ErrorResponse {
                    error: "rate_limit_exceeded",
                    message: "Too many requests",
                    retry_after: Some(retry_after),
                });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
            AppError::InternalServerError => {
                let body = Json(ErrorResponse {
                    error: "internal_error",
                    message: "Internal server error",
                    retry_after: None,
                });
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}

/// 启动期配置错误，直接导致启动失败
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(name: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// 缓存后端错误，只在 CacheStore 内部流转，触发降级而不向外传播
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// 限流内部故障，调用方按放行处理
#[derive(Debug, Error, PartialEq)]
pub enum RateLimitError {
    #[error("window for {key} holds a timestamp {ahead_ms}ms in the future")]
    ClockSkew { key: String, ahead_ms: i64 },
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn rate_limited_renders_429_body() {
        let response = AppError::RateLimited { retry_after: 7 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");

        let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "error": "rate_limit_exceeded",
                "message": "Too many requests",
                "retry_after": 7
            })
        );
    }
}
