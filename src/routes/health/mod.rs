mod handler;
mod model;

pub use handler::{alerts, health, metrics, ping};
pub use model::{AlertsResponse, CacheHealth, HealthResponse, MetricsResponse, PingResponse};
