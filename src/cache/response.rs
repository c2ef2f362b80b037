use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, HttpBody, to_bytes},
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::keys::response_key;
use super::store::CacheStore;
use crate::error::AppError;

pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// 默认可缓存的最大响应体，1 MiB
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// 响应缓存层的状态：共享的 CacheStore、该层自己的过期时间和响应体上限
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<CacheStore>,
    ttl: Duration,
    max_body: usize,
}

impl ResponseCache {
    pub fn new(store: Arc<CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            max_body: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// 只有长度已知且不超过上限的响应体才会被读入内存
    fn fits(&self, body: &Body) -> bool {
        body.size_hint()
            .upper()
            .is_some_and(|len| len <= self.max_body as u64)
    }
}

/// 缓存中保存的响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = (status, self.body).into_response();
        let headers = response.headers_mut();
        match self.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
            Some(content_type) => {
                headers.insert(header::CONTENT_TYPE, content_type);
            }
            None => {
                headers.remove(header::CONTENT_TYPE);
            }
        }
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
        response
    }
}

/// 只读处理函数的响应缓存中间件，用 `route_layer` 挂在需要缓存的路由上
///
/// 命中时不调用处理函数；未命中时调用并缓存 2xx 且为 UTF-8 的响应体。
/// 超过上限或长度未知的响应体原样透传，不缓存。
pub async fn cache_response(
    State(cache): State<ResponseCache>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let key = response_key(req.uri().path(), req.uri().query());
    if let Some(cached) = cache.store.get::<CachedResponse>(&key).await {
        debug!(key = %key, "Response cache hit");
        return cached.into_response();
    }

    let response = next.run(req).await;
    if !response.status().is_success() {
        return response;
    }

    if !cache.fits(response.body()) {
        debug!(key = %key, max_body = cache.max_body, "Response body too large to cache");
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, cache.max_body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(key = %key, error = %e, "Failed to read response body for caching");
            return AppError::InternalServerError.into_response();
        }
    };

    if let Ok(text) = std::str::from_utf8(&bytes) {
        let cached = CachedResponse {
            status: parts.status.as_u16(),
            content_type: parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: text.to_string(),
        };
        if cache.store.set(&key, &cached, Some(cache.ttl)).await {
            debug!(key = %key, ttl_secs = cache.ttl.as_secs(), "Cached response");
        }
    }

    parts
        .headers
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::CacheSettings;
    use crate::clock::SystemClock;
    use axum::{Json, Router, routing::get};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(calls: Arc<AtomicUsize>) -> (Router, Arc<CacheStore>) {
        let store = Arc::new(CacheStore::in_memory(
            CacheSettings::default(),
            Arc::new(SystemClock),
        ));
        let cache = ResponseCache::new(store.clone(), Duration::from_secs(60)).with_max_body(64);

        let list_calls = calls.clone();
        let router = Router::new()
            .route(
                "/events",
                get(move || {
                    let calls = list_calls.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(serde_json::json!({ "call": n }))
                    }
                }),
            )
            .route("/large", get(|| async { "x".repeat(65) }))
            .route(
                "/missing",
                get(move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        StatusCode::NOT_FOUND
                    }
                }),
            )
            .route_layer(axum::middleware::from_fn_with_state(cache, cache_response));
        (router, store)
    }

    async fn call(router: &Router, uri: &str) -> (StatusCode, String, String) {
        let response = router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let cache_status = response
            .headers()
            .get(CACHE_STATUS_HEADER)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        (status, cache_status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn identical_requests_invoke_handler_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (router, _store) = app(calls.clone());

        let first = call(&router, "/events?b=2&a=1").await;
        let second = call(&router, "/events?a=1&b=2").await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.1, "MISS");
        assert_eq!(second.1, "HIT");
        assert_eq!(first.2, second.2);
    }

    #[tokio::test]
    async fn different_query_invokes_handler_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (router, _store) = app(calls.clone());

        call(&router, "/events?page=1").await;
        let other = call(&router, "/events?page=2").await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(other.2, r#"{"call":2}"#);
    }

    #[tokio::test]
    async fn error_responses_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (router, store) = app(calls.clone());

        assert_eq!(call(&router, "/missing").await.0, StatusCode::NOT_FOUND);
        assert_eq!(call(&router, "/missing").await.0, StatusCode::NOT_FOUND);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.keys("response:*").await.is_empty());
    }

    #[tokio::test]
    async fn invalidation_forces_a_fresh_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (router, store) = app(calls.clone());

        call(&router, "/events").await;
        store.delete_matching("response:/events*").await;
        let (_, cache_status, body) = call(&router, "/events").await;

        assert_eq!(cache_status, "MISS");
        assert_eq!(body, r#"{"call":2}"#);
    }

    #[tokio::test]
    async fn oversized_body_is_passed_through_uncached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (router, store) = app(calls);

        let (status, cache_status, body) = call(&router, "/large").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache_status, "");
        assert_eq!(body.len(), 65);
        assert!(store.keys("response:*").await.is_empty());

        let (_, cache_status, _) = call(&router, "/large").await;
        assert_eq!(cache_status, "");
    }
}
