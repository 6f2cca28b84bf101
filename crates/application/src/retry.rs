use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    Exponential { base: Duration },
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base }
    }

    /// 第 `attempt` 次重试前的等待时间（从 1 开始计数）
    pub fn delay_at(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { base } => {
                let exp = std::cmp::min(attempt.saturating_sub(1), 20);
                let factor = 1u32 << exp;
                base.saturating_mul(factor)
            }
        }
    }
}

/// 连接断开或打开失败后的重连策略
///
/// `max_attempts` 为 0 时不重连，连接断开后状态停留在 `Lost`/`Failed`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            backoff: Backoff::exponential(Duration::from_millis(500)),
        }
    }

    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::exponential(base_delay),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// 第 `attempt` 次重连的等待时间；超出上限时返回 `None`
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt <= self.max_attempts).then(|| self.backoff.delay_at(attempt))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delays_double() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay_at(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_at(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_at(4), Duration::from_millis(800));
    }

    #[test]
    fn policy_stops_after_max_attempts() {
        let policy = ReconnectPolicy::new(2, Duration::from_millis(10));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(20)));
        assert_eq!(policy.next_delay(3), None);
        assert!(!ReconnectPolicy::default().is_enabled());
        assert_eq!(ReconnectPolicy::default().next_delay(1), None);
    }
}
