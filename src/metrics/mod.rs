// 性能指标模块
// 按路由保存请求样本并计算滚动窗口统计

pub mod aggregator;
pub mod mirror;
pub mod sample;
pub mod snapshot;
pub mod window;

pub use aggregator::MetricsAggregator;
pub use mirror::MetricsMirror;
pub use sample::RequestSample;
pub use snapshot::{Metrics, MetricsView};
pub use window::{RetentionStrategy, SampleWindow};
