use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::RateLimitError;

/// 单个窗口内允许的最大请求数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLimit {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RequestLimit {
    pub fn new(max_requests: u32, window_secs: u64) -> Result<Self, RateLimitError> {
        if max_requests == 0 {
            return Err(RateLimitError::InvalidLimit(
                "max_requests must be greater than zero".into(),
            ));
        }
        if window_secs == 0 || window_secs > i32::MAX as u64 {
            return Err(RateLimitError::InvalidLimit(format!(
                "window of {window_secs}s is out of range"
            )));
        }
        Ok(Self {
            max_requests,
            window_secs,
        })
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }
}

/// 准入策略：单层窗口，或先检查突发上限再检查速率窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    #[default]
    SingleTier,
    TwoTier { burst: RequestLimit },
}

impl AdmissionPolicy {
    pub fn burst(&self) -> Option<RequestLimit> {
        match self {
            AdmissionPolicy::SingleTier => None,
            AdmissionPolicy::TwoTier { burst } => Some(*burst),
        }
    }
}
