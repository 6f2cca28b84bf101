use std::sync::Arc;

use domain::{PresenceSet, UserId};
use tokio::sync::watch;

/// 在线状态跟踪器
///
/// 每次收到快照都整体替换，不做增量合并。
#[derive(Clone)]
pub struct PresenceTracker {
    online: Arc<watch::Sender<PresenceSet>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        let (online, _) = watch::channel(PresenceSet::new());
        Self {
            online: Arc::new(online),
        }
    }

    /// 用最新快照替换在线集合
    pub fn update_presence(&self, users: PresenceSet) {
        tracing::debug!(online = users.len(), "更新在线用户");
        self.online.send_replace(users);
    }

    pub fn current(&self) -> PresenceSet {
        self.online.borrow().clone()
    }

    /// 在线人数
    pub fn count(&self) -> usize {
        self.online.borrow().len()
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.online.borrow().contains(user_id)
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceSet> {
        self.online.subscribe()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> PresenceSet {
        ids.iter().map(|id| UserId::from(*id)).collect()
    }

    #[test]
    fn snapshot_replaces_instead_of_union() {
        let tracker = PresenceTracker::new();
        tracker.update_presence(set(&["a", "b", "c"]));
        assert_eq!(tracker.count(), 3);

        tracker.update_presence(set(&["a"]));
        assert_eq!(tracker.count(), 1);
        assert!(tracker.contains(&UserId::from("a")));
        assert!(!tracker.contains(&UserId::from("b")));
    }

    #[test]
    fn empty_snapshot_clears() {
        let tracker = PresenceTracker::new();
        tracker.update_presence(set(&["a"]));
        tracker.update_presence(PresenceSet::new());
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn subscribers_see_latest_snapshot() {
        let tracker = PresenceTracker::new();
        let mut rx = tracker.subscribe();
        tracker.update_presence(set(&["x", "y"]));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 2);
    }
}
