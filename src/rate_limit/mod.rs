//! 按客户端和路由分区的准入控制

mod limiter;
mod policy;
mod window;

pub use limiter::{Admission, RateLimiter};
pub use policy::{AdmissionPolicy, RequestLimit};
pub use window::RateWindow;
