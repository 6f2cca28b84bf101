//! 传输层抽象
//!
//! 连接管理器只依赖这里的 [`Transport`]，具体的 WebSocket/Socket.IO
//! 实现位于 infrastructure。

use async_trait::async_trait;
use domain::WireEvent;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// 一条已建立的双向链路
///
/// - 向 `outbound` 发送事件即写入连接；丢弃 `outbound` 即请求关闭连接。
/// - `inbound` 按到达顺序产出服务器事件；返回 `None` 表示连接已断开。
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<WireEvent>,
    pub inbound: mpsc::UnboundedReceiver<WireEvent>,
}

impl TransportLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<WireEvent>,
        inbound: mpsc::UnboundedReceiver<WireEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

/// 打开到聊天服务器的连接
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<TransportLink, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn open(&self, endpoint: &str) -> Result<TransportLink, TransportError> {
        (**self).open(endpoint).await
    }
}
