use axum::{
    body::{Body, to_bytes},
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use tracing::error;

use super::governance::RequestId;

/// 记录日志时最多读取的错误响应体长度
const MAX_LOGGED_BODY: usize = 1024;

/// 记录 5xx 响应的状态和响应体，附带请求关联 ID
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.as_str().to_string())
        .unwrap_or_default();
    let uri = req.uri().clone();

    let response = next.run(req).await;
    if !response.status().is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_LOGGED_BODY).await {
        Ok(b) => b,
        Err(e) => {
            error!(request_id = %request_id, uri = %uri, "Failed to read error response body: {}", e);
            return Response::from_parts(parts, Body::empty());
        }
    };

    error!(
        request_id = %request_id,
        uri = %uri,
        status = %parts.status,
        body = %String::from_utf8_lossy(&bytes),
        "Server error occurred"
    );

    // 重置body以便重新构建响应
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}
