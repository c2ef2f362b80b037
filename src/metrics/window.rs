use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::sample::RequestSample;

/// 样本保留策略：固定容量环形缓冲，或按时间裁剪
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionStrategy {
    Capacity(usize),
    Duration(Duration),
}

impl Default for RetentionStrategy {
    fn default() -> Self {
        RetentionStrategy::Capacity(100)
    }
}

impl FromStr for RetentionStrategy {
    type Err = String;

    /// `samples:100` 或 `seconds:3600`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, amount) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| "expected samples:N or seconds:N".to_string())?;
        let amount: u64 = amount
            .trim()
            .parse()
            .map_err(|e| format!("invalid amount: {e}"))?;
        if amount == 0 {
            return Err("retention must be greater than zero".into());
        }
        match kind.trim() {
            "samples" => Ok(RetentionStrategy::Capacity(amount as usize)),
            "seconds" => Ok(RetentionStrategy::Duration(Duration::from_secs(amount))),
            other => Err(format!("unknown retention kind {other:?}")),
        }
    }
}

impl fmt::Display for RetentionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionStrategy::Capacity(n) => write!(f, "samples:{n}"),
            RetentionStrategy::Duration(d) => write!(f, "seconds:{}", d.as_secs()),
        }
    }
}

/// 某个路由的样本窗口
#[derive(Debug, Default, Clone)]
pub struct SampleWindow {
    samples: VecDeque<RequestSample>,
}

impl SampleWindow {
    pub fn push(&mut self, sample: RequestSample, retention: RetentionStrategy, now: DateTime<Utc>) {
        self.samples.push_back(sample);
        self.prune(retention, now);
    }

    /// 按策略丢弃超出容量或超出时间的旧样本
    pub fn prune(&mut self, retention: RetentionStrategy, now: DateTime<Utc>) {
        match retention {
            RetentionStrategy::Capacity(capacity) => {
                while self.samples.len() > capacity {
                    self.samples.pop_front();
                }
            }
            RetentionStrategy::Duration(max_age) => {
                let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
                let Some(cutoff) = now.checked_sub_signed(max_age) else {
                    return;
                };
                while self
                    .samples
                    .front()
                    .is_some_and(|oldest| oldest.timestamp <= cutoff)
                {
                    self.samples.pop_front();
                }
            }
        }
    }

    /// 只读视图：按策略仍在保留范围内的样本，不修改窗口
    pub fn retained(
        &self,
        retention: RetentionStrategy,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &RequestSample> {
        let (skip, cutoff) = match retention {
            RetentionStrategy::Capacity(capacity) => (self.samples.len().saturating_sub(capacity), None),
            RetentionStrategy::Duration(max_age) => {
                let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
                (0, now.checked_sub_signed(max_age))
            }
        };
        self.samples
            .iter()
            .skip(skip)
            .filter(move |s| cutoff.is_none_or(|cutoff| s.timestamp > cutoff))
    }

    pub fn samples(&self) -> impl Iterator<Item = &RequestSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RouteKey;
    use axum::http::Method;

    fn sample(at: DateTime<Utc>, ms: f64) -> RequestSample {
        RequestSample::new(RouteKey::new(&Method::GET, "/events"), ms, 200, at)
    }

    #[test]
    fn parses_retention() {
        assert_eq!("samples:100".parse(), Ok(RetentionStrategy::Capacity(100)));
        assert_eq!(
            "seconds:3600".parse(),
            Ok(RetentionStrategy::Duration(Duration::from_secs(3600)))
        );
        assert!("samples:0".parse::<RetentionStrategy>().is_err());
        assert!("hours:1".parse::<RetentionStrategy>().is_err());
        assert_eq!(RetentionStrategy::Capacity(5).to_string(), "samples:5");
    }

    #[test]
    fn capacity_keeps_most_recent() {
        let now = Utc::now();
        let mut window = SampleWindow::default();
        for i in 0..5 {
            window.push(sample(now, i as f64), RetentionStrategy::Capacity(3), now);
        }
        let kept: Vec<f64> = window.samples().map(|s| s.duration_ms).collect();
        assert_eq!(kept, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn duration_drops_old_samples() {
        let now = Utc::now();
        let retention = RetentionStrategy::Duration(Duration::from_secs(60));
        let mut window = SampleWindow::default();
        window.push(sample(now, 1.0), retention, now);
        window.push(sample(now + chrono::Duration::seconds(30), 2.0), retention, now);

        window.prune(retention, now + chrono::Duration::seconds(60));
        assert_eq!(window.len(), 1);
        window.prune(retention, now + chrono::Duration::seconds(91));
        assert!(window.is_empty());
    }

    #[test]
    fn retained_view_leaves_window_untouched() {
        let now = Utc::now();
        let retention = RetentionStrategy::Duration(Duration::from_secs(60));
        let mut window = SampleWindow::default();
        window.push(sample(now, 1.0), retention, now);
        window.push(sample(now + chrono::Duration::seconds(30), 2.0), retention, now);

        let later = now + chrono::Duration::seconds(61);
        let kept: Vec<f64> = window.retained(retention, later).map(|s| s.duration_ms).collect();
        assert_eq!(kept, vec![2.0]);
        assert_eq!(window.len(), 2);
    }
}
