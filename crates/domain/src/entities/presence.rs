//! 在线用户快照
//!
//! 服务端每次推送完整集合，客户端整体替换，不做增量合并。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 当前在线的参与者集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceSet(BTreeSet<UserId>);

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 集合基数，即展示的在线人数
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.0.contains(user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserId> {
        self.0.iter()
    }
}

impl FromIterator<UserId> for PresenceSet {
    fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
