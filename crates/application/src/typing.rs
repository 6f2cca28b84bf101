//! 输入提示
//!
//! 单槽、自动过期的信号：Idle → Announced → Idle。
//! 新的提示覆盖旧提示并重置过期时间，只显示最近一位输入者。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use domain::{TypingAnnouncement, DEFAULT_TYPING_EXPIRY};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct TypingIndicator {
    inner: Arc<TypingState>,
}

struct TypingState {
    slot: watch::Sender<Option<TypingAnnouncement>>,
    // 每次 announce/clear 递增，过期任务只清除自己那一代的提示
    generation: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
    ttl: Duration,
}

impl TypingIndicator {
    pub fn new() -> Self {
        Self::with_expiry(DEFAULT_TYPING_EXPIRY)
    }

    pub fn with_expiry(ttl: Duration) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            inner: Arc::new(TypingState {
                slot,
                generation: AtomicU64::new(0),
                timer: Mutex::new(None),
                ttl,
            }),
        }
    }

    /// 显示提示并安排自动清除，取消之前尚未触发的清除
    ///
    /// 需要在 tokio 运行时内调用。
    pub fn announce(&self, text: impl Into<String>) {
        let announcement = TypingAnnouncement::new(text, self.inner.ttl);
        let deadline = announcement.expires_at;
        let mut generation = 0;

        self.inner.slot.send_modify(|slot| {
            generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *slot = Some(announcement);
        });

        let state: Weak<TypingState> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(state) = state.upgrade() {
                state.expire(generation);
            }
        });

        if let Some(previous) = self.inner.replace_timer(Some(timer)) {
            previous.abort();
        }
    }

    /// 立即清除提示
    pub fn clear(&self) {
        self.cancel();
        self.inner.slot.send_if_modified(|slot| {
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            slot.take().is_some()
        });
    }

    /// 取消待触发的自动清除，不改变当前显示
    pub fn cancel(&self) {
        if let Some(timer) = self.inner.replace_timer(None) {
            timer.abort();
        }
    }

    pub fn current(&self) -> Option<TypingAnnouncement> {
        self.inner.slot.borrow().clone()
    }

    pub fn text(&self) -> Option<String> {
        self.inner.slot.borrow().as_ref().map(|a| a.text.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.slot.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TypingAnnouncement>> {
        self.inner.slot.subscribe()
    }
}

impl Default for TypingIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl TypingState {
    fn expire(&self, generation: u64) {
        let cleared = self.slot.send_if_modified(|slot| {
            if self.generation.load(Ordering::Acquire) == generation && slot.is_some() {
                *slot = None;
                true
            } else {
                false
            }
        });
        if cleared {
            tracing::trace!(generation, "输入提示已过期");
        }
    }

    fn replace_timer(&self, timer: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut guard = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, timer)
    }
}

impl Drop for TypingState {
    fn drop(&mut self) {
        if let Some(timer) = self.replace_timer(None) {
            timer.abort();
        }
    }
}
