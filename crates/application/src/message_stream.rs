//! 消息流
//!
//! 把一次性的历史消息与实时到达的消息合并为一条有序、只追加的日志。
//! 观察者通过 [`MessageStream::subscribe`] 获得只读视图。

use std::sync::Arc;

use domain::ChatMessage;
use tokio::sync::watch;

/// 只追加的消息日志，克隆后共享同一份状态
#[derive(Clone)]
pub struct MessageStream {
    log: Arc<watch::Sender<Vec<ChatMessage>>>,
}

impl MessageStream {
    pub fn new() -> Self {
        let (log, _) = watch::channel(Vec::new());
        Self { log: Arc::new(log) }
    }

    /// 用历史消息整体替换当前日志
    ///
    /// 再次调用（例如重连后）会覆盖而不是合并。
    pub fn load_backlog(&self, messages: Vec<ChatMessage>) {
        tracing::debug!(count = messages.len(), "加载历史消息");
        self.log.send_replace(messages);
    }

    /// 在末尾追加一条消息，不做去重
    pub fn append(&self, message: ChatMessage) {
        self.log.send_modify(|log| log.push(message));
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.log.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.log.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.borrow().is_empty()
    }

    /// 订阅日志变化
    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.log.subscribe()
    }
}

impl Default for MessageStream {
    fn default() -> Self {
        Self::new()
    }
}
