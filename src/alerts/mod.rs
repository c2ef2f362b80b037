// 告警模块
// 根据聚合指标和系统资源使用率生成告警，活动告警按时间窗口在读取时过滤

pub mod evaluator;
pub mod record;
pub mod system;

pub use evaluator::{AlertEvaluator, AlertThresholds};
pub use record::{AlertMetric, AlertRecord, Severity};
pub use system::{ServiceStatus, SystemMonitor, SystemUsage};
