use std::sync::Mutex;

use serde::Serialize;
use sysinfo::System;

use super::evaluator::AlertThresholds;
use super::record::{AlertRecord, Severity};

/// 某一时刻的 CPU 与内存使用率（百分比）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

/// 基于 sysinfo 的资源采样
///
/// CPU 使用率需要两次刷新之间的差值，所以首次采样的 CPU 值为 0。
/// 采样是阻塞调用，异步代码中应放进 `spawn_blocking`。
pub struct SystemMonitor {
    system: Mutex<System>,
    latest: Mutex<SystemUsage>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            latest: Mutex::new(SystemUsage::default()),
        }
    }

    pub fn refresh(&self) -> SystemUsage {
        let usage = {
            let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_cpu_usage();
            system.refresh_memory();

            let total = system.total_memory();
            let used = system.used_memory();
            SystemUsage {
                cpu_percent: f64::from(system.global_cpu_usage()),
                memory_percent: if total == 0 {
                    0.0
                } else {
                    used as f64 / total as f64 * 100.0
                },
                memory_used_bytes: used,
                memory_total_bytes: total,
            }
        };
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = usage;
        usage
    }

    /// 最近一次采样结果，不触发新的采样
    pub fn latest(&self) -> SystemUsage {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// 服务整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ServiceStatus {
    /// 资源使用率超过严重阈值为 unhealthy；缓存降级或存在活动告警为 degraded
    pub fn assess(
        usage: &SystemUsage,
        thresholds: &AlertThresholds,
        cache_demoted: bool,
        active_alerts: &[AlertRecord],
    ) -> Self {
        let critical = thresholds.system_critical_percent;
        if usage.cpu_percent > critical
            || usage.memory_percent > critical
            || active_alerts.iter().any(|a| a.severity == Severity::Critical)
        {
            ServiceStatus::Unhealthy
        } else if cache_demoted || !active_alerts.is_empty() {
            ServiceStatus::Degraded
        } else {
            ServiceStatus::Healthy
        }
    }
}
