use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// 某个 (client, route) 在当前窗口内的请求时间戳
///
/// 时间戳在同一把锁内按顺序追加，所以过期项总在队首，裁剪只需从前面弹出。
#[derive(Debug, Default, Clone)]
pub struct RateWindow {
    stamps: VecDeque<DateTime<Utc>>,
}

impl RateWindow {
    /// 移除所有早于或等于 `now - window` 的时间戳
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        while self.stamps.front().is_some_and(|oldest| *oldest <= cutoff) {
            self.stamps.pop_front();
        }
    }

    pub fn push(&mut self, at: DateTime<Utc>) {
        self.stamps.push_back(at);
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.stamps.front().copied()
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.stamps.back().copied()
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
    }

    /// `ceil(oldest + window - now)`，最小为 0
    pub fn retry_after(&self, now: DateTime<Utc>, window: Duration) -> u64 {
        let Some(oldest) = self.oldest() else {
            return 0;
        };
        let remaining = (oldest + window - now)
            .num_nanoseconds()
            .unwrap_or(i64::MAX);
        if remaining <= 0 {
            return 0;
        }
        (remaining as u64).div_ceil(1_000_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_drops_only_expired_stamps() {
        let start = Utc::now();
        let mut window = RateWindow::default();
        window.push(start);
        window.push(start + Duration::seconds(30));

        window.prune(start + Duration::seconds(60), Duration::seconds(60));
        assert_eq!(window.len(), 1);
        assert_eq!(window.oldest(), Some(start + Duration::seconds(30)));
    }

    #[test]
    fn retry_after_rounds_up() {
        let start = Utc::now();
        let mut window = RateWindow::default();
        window.push(start);

        let now = start + Duration::milliseconds(58_500);
        assert_eq!(window.retry_after(now, Duration::seconds(60)), 2);
        assert_eq!(window.retry_after(start + Duration::seconds(61), Duration::seconds(60)), 0);
    }
}
