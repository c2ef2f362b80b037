use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    AppState,
    alerts::AlertEvaluator,
    error::AppError,
    metrics::MetricsAggregator,
    models::{ClientKey, RouteKey},
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";
pub const API_KEY_HEADER: &str = "x-api-key";

/// 客户端关闭连接时记录的状态码
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// 请求关联 ID，放在请求扩展中供下游处理函数读取
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 请求治理中间件：关联 ID、限流、计时、指标记录与告警
pub async fn govern(State(state): State<AppState>, mut req: Request<Body>, next: Next) -> Response {
    let request_id = request_id(req.headers());
    let client = client_key(&req);
    let route = route_key(&req);

    // 先做限流判定，之后才有可能被取消
    let admission = state.limiter.admit(&client, &route);
    if !admission.allowed {
        warn!(
            request_id = %request_id,
            client = %client,
            route = %route,
            retry_after = admission.retry_after_secs,
            "Rate limit exceeded"
        );
        let mut response = AppError::RateLimited {
            retry_after: admission.retry_after_secs,
        }
        .into_response();
        set_header(&mut response, REQUEST_ID_HEADER, &request_id);
        return response;
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let in_flight = InFlight::start(
        state.metrics.clone(),
        state.alerts.clone(),
        route.clone(),
        request_id.clone(),
    );
    let mut response = next.run(req).await;
    let status = response.status();
    let elapsed = in_flight.complete(status);

    info!(
        target: "performance",
        request_id = %request_id,
        client = %client,
        route = %route,
        status = status.as_u16(),
        duration_ms = elapsed.as_secs_f64() * 1000.0,
        "Request completed"
    );

    set_header(&mut response, RESPONSE_TIME_HEADER, &format_response_time(elapsed));
    set_header(&mut response, REQUEST_ID_HEADER, &request_id);
    response
}

/// 沿用调用方传入的关联 ID，缺失或不合法时生成新的 UUID
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= 128
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        })
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 依次取 API Key、X-Real-IP、X-Forwarded-For 第一个非空地址、对端地址
pub fn client_key<B>(req: &Request<B>) -> ClientKey {
    let headers = req.headers();
    if let Some(api_key) = header_str(headers, API_KEY_HEADER).filter(|k| !k.trim().is_empty()) {
        return ClientKey::new(format!("key:{}", api_key.trim()));
    }

    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    let ip = header_str(headers, "x-real-ip")
        .filter(|ip| !ip.trim().is_empty())
        .or_else(|| {
            header_str(headers, "x-forwarded-for")
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or(remote_ip.as_deref())
        .unwrap_or(ClientKey::UNKNOWN);
    ClientKey::new(ip)
}

/// 匹配到路由时使用路由模板，否则使用原始路径
pub fn route_key<B>(req: &Request<B>) -> RouteKey {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str())
        .unwrap_or_else(|| req.uri().path());
    RouteKey::new(req.method(), path)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_header(response: &mut Response, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}

fn format_response_time(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

/// 正在处理的请求；未正常完成就被丢弃时按 499 记录
struct InFlight {
    metrics: Arc<MetricsAggregator>,
    alerts: Arc<AlertEvaluator>,
    route: RouteKey,
    request_id: String,
    started: Instant,
    completed: bool,
}

impl InFlight {
    fn start(
        metrics: Arc<MetricsAggregator>,
        alerts: Arc<AlertEvaluator>,
        route: RouteKey,
        request_id: String,
    ) -> Self {
        Self {
            metrics,
            alerts,
            route,
            request_id,
            started: Instant::now(),
            completed: false,
        }
    }

    fn complete(mut self, status: StatusCode) -> Duration {
        self.completed = true;
        let elapsed = self.started.elapsed();
        self.observe(elapsed, status.as_u16());
        elapsed
    }

    fn observe(&self, elapsed: Duration, status: u16) {
        self.metrics
            .record(&self.route, elapsed.as_secs_f64() * 1000.0, status);
        if let Some(snapshot) = self.metrics.snapshot(&self.route) {
            self.alerts.evaluate(&self.route, &snapshot);
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let elapsed = self.started.elapsed();
        warn!(
            request_id = %self.request_id,
            route = %self.route,
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            "Request cancelled before completion"
        );
        self.observe(elapsed, CLIENT_CLOSED_REQUEST);
    }
}
