use std::time::Duration;

use tokio::time::Instant;

/// 默认的输入提示过期时间
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_millis(2000);

/// 当前有效的“正在输入”提示，同一时刻最多一条
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingAnnouncement {
    pub text: String,
    pub expires_at: Instant,
}

impl TypingAnnouncement {
    pub fn new(text: impl Into<String>, ttl: Duration) -> Self {
        Self {
            text: text.into(),
            expires_at: Instant::now() + ttl,
        }
    }
}
