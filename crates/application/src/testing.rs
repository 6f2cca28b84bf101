//! 内存传输实现，用于测试会话流程
//!
//! [`MemoryTransport`] 每次 `open` 都会在 [`MemoryServer`] 一侧产生一个
//! [`ServerConnection`]，测试代码可以像服务器一样收发事件。

use std::time::Duration;

use async_trait::async_trait;
use domain::{ServerEvent, WireEvent};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{Transport, TransportLink};

/// 客户端侧的内存传输
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<ServerConnection>,
}

/// 服务器侧，接收客户端建立的连接
pub struct MemoryServer {
    incoming: mpsc::UnboundedReceiver<ServerConnection>,
}

/// 服务器视角的一条连接
pub struct ServerConnection {
    endpoint: String,
    to_client: mpsc::UnboundedSender<WireEvent>,
    from_client: mpsc::UnboundedReceiver<WireEvent>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryServer) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        (Self { accepted }, MemoryServer { incoming })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, endpoint: &str) -> Result<TransportLink, TransportError> {
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let connection = ServerConnection {
            endpoint: endpoint.to_owned(),
            to_client,
            from_client,
        };
        self.accepted
            .send(connection)
            .map_err(|_| TransportError::unreachable(endpoint))?;
        Ok(TransportLink::new(outbound, inbound))
    }
}

impl MemoryServer {
    /// 等待下一条客户端连接
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.incoming.recv().await
    }
}

impl ServerConnection {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 向客户端推送事件；客户端已断开时静默忽略
    pub fn send(&self, event: WireEvent) {
        let _ = self.to_client.send(event);
    }

    pub fn push(&self, event: ServerEvent) {
        self.send(event.into_wire());
    }

    /// 接收客户端发出的下一个事件，`None` 表示客户端已关闭连接
    pub async fn recv(&mut self) -> Option<WireEvent> {
        self.from_client.recv().await
    }

    /// 带超时的接收，超时返回 `None`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<WireEvent> {
        tokio::time::timeout(timeout, self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    /// 模拟服务器断开
    pub fn close(self) {
        drop(self);
    }
}
