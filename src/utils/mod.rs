use axum::Json;
use serde::Serialize;

/// 统一的接口响应包装
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// 错误码，0表示成功
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_data: Option<T>,
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
}
