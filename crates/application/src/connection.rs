//! 连接管理器
//!
//! 负责一条到房间的传输连接的完整生命周期：
//! - 打开连接并立即发送 `join`
//! - 按注册顺序把入站事件分发给处理器
//! - 发送出站事件（不等待确认）
//! - 幂等地关闭连接
//!
//! 所有入站处理器都在同一个驱动任务上依次执行，单个处理器执行完毕后
//! 才会分发下一个事件。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use domain::{ClientEvent, UserId, WireEvent};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{ApplicationError, ApplicationResult};
use crate::retry::ReconnectPolicy;
use crate::transport::{Transport, TransportLink};

/// 默认每个事件名最多缓存的未处理事件数
pub const DEFAULT_EARLY_EVENT_BUFFER: usize = 64;

/// 最多为多少个不同的事件名缓存未处理事件
pub const MAX_PENDING_EVENT_NAMES: usize = 16;

/// 入站事件处理器
pub type EventHandler = Box<dyn FnMut(&Value) + Send + 'static>;

/// 连接状态，供观察者订阅
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// 尚未调用 connect
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// 连接被对端或网络中断，且不再重连
    Lost,
    /// 无法建立连接
    Failed(String),
    /// 本端主动关闭
    Closed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// 连接已经结束且不会恢复
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Lost | ConnectionStatus::Failed(_) | ConnectionStatus::Closed
        )
    }
}

/// 连接参数
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub early_event_buffer: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            early_event_buffer: DEFAULT_EARLY_EVENT_BUFFER,
            reconnect: ReconnectPolicy::disabled(),
        }
    }
}

/// 事件处理器注册表
///
/// 没有处理器的事件会被暂存，在该事件名的第一个处理器注册时按到达顺序回放。
struct HandlerRegistry {
    handlers: HashMap<String, Vec<EventHandler>>,
    pending: HashMap<String, VecDeque<Value>>,
    buffer_limit: usize,
}

impl HandlerRegistry {
    fn new(buffer_limit: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            pending: HashMap::new(),
            buffer_limit,
        }
    }

    fn register(&mut self, event: String, handler: EventHandler) {
        let buffered = self.pending.remove(&event);
        let handlers = self.handlers.entry(event.clone()).or_default();
        handlers.push(handler);

        if let Some(buffered) = buffered {
            tracing::debug!(event = %event, count = buffered.len(), "回放注册前到达的事件");
            if let Some(handler) = handlers.last_mut() {
                for payload in buffered {
                    handler(&payload);
                }
            }
        }
    }

    fn dispatch(&mut self, event: WireEvent) {
        match self.handlers.get_mut(&event.name) {
            Some(handlers) if !handlers.is_empty() => {
                for handler in handlers.iter_mut() {
                    handler(&event.payload);
                }
            }
            _ => {
                if self.buffer_limit == 0 {
                    tracing::debug!(event = %event.name, "丢弃无处理器的事件");
                    return;
                }
                if !self.pending.contains_key(&event.name)
                    && self.pending.len() >= MAX_PENDING_EVENT_NAMES
                {
                    tracing::debug!(event = %event.name, "too many unhandled event names, dropping");
                    return;
                }
                let queue = self.pending.entry(event.name.clone()).or_default();
                if queue.len() >= self.buffer_limit {
                    queue.pop_front();
                    tracing::warn!(event = %event.name, "early event buffer full, dropping oldest");
                }
                queue.push_back(event.payload);
            }
        }
    }
}

enum Command {
    Emit(WireEvent),
    Register(String, EventHandler),
    Close,
}

struct ActiveConnection {
    commands: mpsc::UnboundedSender<Command>,
    detached: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

/// 单条房间连接的管理器
pub struct ConnectionManager<T: Transport + 'static> {
    transport: Arc<T>,
    options: ConnectionOptions,
    registry: Option<HandlerRegistry>,
    active: Option<ActiveConnection>,
    closing: Option<JoinHandle<()>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl<T: Transport + 'static> ConnectionManager<T> {
    pub fn new(transport: Arc<T>, options: ConnectionOptions) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self::with_status_channel(transport, options, Arc::new(status))
    }

    /// 使用外部提供的状态通道，便于上层在更换连接后保持同一个观察者
    pub fn with_status_channel(
        transport: Arc<T>,
        options: ConnectionOptions,
        status: Arc<watch::Sender<ConnectionStatus>>,
    ) -> Self {
        Self {
            transport,
            options,
            registry: None,
            active: None,
            closing: None,
            status,
        }
    }

    /// 注册入站事件处理器
    ///
    /// 同一事件名可以注册多个处理器，按注册顺序调用。
    /// 在 [`connect`](Self::connect) 之前注册的处理器与连接一同交给驱动任务，
    /// 因此不会错过任何早到的事件。
    pub fn on<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        let event = event.into();
        let handler: EventHandler = Box::new(handler);

        match &self.active {
            Some(active) => {
                if active
                    .commands
                    .send(Command::Register(event.clone(), handler))
                    .is_err()
                {
                    tracing::warn!(event = %event, "connection driver gone, handler dropped");
                }
            }
            None => {
                let limit = self.options.early_event_buffer;
                self.registry
                    .get_or_insert_with(|| HandlerRegistry::new(limit))
                    .register(event, handler);
            }
        }
    }

    /// 打开连接并宣告 `room_user_id`
    ///
    /// 不阻塞：连接建立在后台进行，失败通过 [`status`](Self::status) 体现为
    /// `ConnectionStatus::Failed`。若已有连接，先将其关闭。
    pub fn connect(&mut self, endpoint: &str, room_user_id: &UserId) {
        if self.active.is_some() {
            tracing::info!("关闭旧连接后重新连接");
            self.disconnect();
        }

        let limit = self.options.early_event_buffer;
        let registry = self
            .registry
            .take()
            .unwrap_or_else(|| HandlerRegistry::new(limit));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let detached = Arc::new(AtomicBool::new(false));

        self.status.send_replace(ConnectionStatus::Connecting);
        tracing::info!(endpoint = %endpoint, user_id = %room_user_id, "连接聊天服务器");

        let driver = Driver {
            transport: self.transport.clone(),
            endpoint: endpoint.to_owned(),
            join: ClientEvent::Join(room_user_id.clone()).into_wire(),
            registry,
            commands: command_rx,
            detached: detached.clone(),
            status: self.status.clone(),
            reconnect: self.options.reconnect.clone(),
        };

        self.active = Some(ActiveConnection {
            commands,
            detached,
            driver: tokio::spawn(driver.run()),
        });
    }

    /// 发送出站事件，不等待确认
    pub fn emit(&self, event: impl Into<String>, payload: Value) -> ApplicationResult<()> {
        let active = self.active.as_ref().ok_or(ApplicationError::NotConnected)?;
        active
            .commands
            .send(Command::Emit(WireEvent::new(event, payload)))
            .map_err(|_| ApplicationError::NotConnected)
    }

    /// 发送类型化的客户端事件
    pub fn emit_event(&self, event: ClientEvent) -> ApplicationResult<()> {
        let wire = event.into_wire();
        self.emit(wire.name, wire.payload)
    }

    /// 连接是否仍可用于发送
    pub fn is_open(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.commands.is_closed())
    }

    /// 关闭连接
    ///
    /// 幂等。立即解除所有处理器（返回后不会再有处理器被调用），
    /// 关闭命令排在已提交的出站事件之后，因此之前的 `emit` 会先被发出。
    /// 返回本次调用是否真正关闭了连接。
    pub fn disconnect(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        active.detached.store(true, Ordering::Release);
        // 驱动任务已退出时发送失败，忽略即可
        let _ = active.commands.send(Command::Close);
        self.status.send_replace(ConnectionStatus::Closed);
        self.closing = Some(active.driver);
        tracing::info!("连接已关闭");
        true
    }

    /// 关闭连接并等待驱动任务退出，超时则强制终止
    pub async fn shutdown(&mut self, timeout: Duration) {
        self.disconnect();
        if let Some(mut driver) = self.closing.take() {
            if tokio::time::timeout(timeout, &mut driver).await.is_err() {
                tracing::warn!(?timeout, "connection driver did not stop in time, aborting");
                driver.abort();
            }
        }
    }

    /// 订阅连接状态
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }
}

impl<T: Transport + 'static> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

enum LinkOutcome {
    Closed,
    Lost,
    Failed(String),
}

/// 后台驱动任务，独占传输链路与处理器注册表
struct Driver<T: Transport + 'static> {
    transport: Arc<T>,
    endpoint: String,
    join: WireEvent,
    registry: HandlerRegistry,
    commands: mpsc::UnboundedReceiver<Command>,
    detached: Arc<AtomicBool>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    reconnect: ReconnectPolicy,
}

impl<T: Transport + 'static> Driver<T> {
    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                self.publish(ConnectionStatus::Reconnecting { attempt });
            }

            let outcome = match self.transport.open(&self.endpoint).await {
                Ok(link) => {
                    // 打开期间已被 disconnect：直接丢弃新链路，不再宣告身份
                    if self.is_detached() {
                        tracing::debug!(endpoint = %self.endpoint, "连接在打开期间被关闭");
                        drop(link);
                        break;
                    }
                    attempt = 0;
                    self.serve(link).await
                }
                Err(err) => {
                    tracing::warn!(endpoint = %self.endpoint, error = %err, "failed to open connection");
                    LinkOutcome::Failed(err.to_string())
                }
            };

            let final_status = match outcome {
                LinkOutcome::Closed => break,
                LinkOutcome::Lost => ConnectionStatus::Lost,
                LinkOutcome::Failed(reason) => ConnectionStatus::Failed(reason),
            };

            if self.is_detached() {
                break;
            }

            attempt += 1;
            match self.reconnect.next_delay(attempt) {
                Some(delay) => {
                    tracing::info!(attempt, ?delay, "等待后重连");
                    tokio::time::sleep(delay).await;
                    if self.is_detached() {
                        break;
                    }
                }
                None => {
                    tracing::warn!(status = ?final_status, "connection ended, not reconnecting");
                    self.publish(final_status);
                    break;
                }
            }
        }

        tracing::debug!("连接驱动任务结束");
    }

    async fn serve(&mut self, mut link: TransportLink) -> LinkOutcome {
        self.publish(ConnectionStatus::Connected);

        if link.outbound.send(self.join.clone()).is_err() {
            return LinkOutcome::Lost;
        }

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(Command::Emit(event)) => {
                            tracing::debug!(event = %event.name, "发送事件");
                            if link.outbound.send(event).is_err() {
                                return LinkOutcome::Lost;
                            }
                        }
                        Some(Command::Register(event, handler)) => {
                            self.registry.register(event, handler);
                        }
                        Some(Command::Close) | None => {
                            // 丢弃 link 即请求传输层在发完已排队事件后关闭
                            return LinkOutcome::Closed;
                        }
                    }
                }

                incoming = link.inbound.recv() => {
                    match incoming {
                        Some(event) => {
                            if self.is_detached() {
                                continue;
                            }
                            tracing::trace!(event = %event.name, "收到事件");
                            self.registry.dispatch(event);
                        }
                        None => {
                            tracing::warn!(endpoint = %self.endpoint, "connection lost");
                            return LinkOutcome::Lost;
                        }
                    }
                }
            }
        }
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn publish(&self, status: ConnectionStatus) {
        if !self.is_detached() {
            self.status.send_replace(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::MemoryTransport;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> EventHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |tag: &'static str| -> EventHandler {
                let log = log.clone();
                Box::new(move |payload: &Value| {
                    log.lock().unwrap().push(format!("{tag}:{payload}"));
                })
            }
        };
        (log, make)
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn connect_sends_join_first() {
        let (transport, mut server) = MemoryTransport::new();
        let mut manager = ConnectionManager::new(Arc::new(transport), ConnectionOptions::default());

        manager.connect("memory://room", &UserId::from("u-1"));
        manager.emit("typing", json!("alice is typing...")).unwrap();

        let mut conn = server.accept().await.expect("client connected");
        assert_eq!(conn.endpoint(), "memory://room");
        assert_eq!(conn.recv().await.unwrap(), WireEvent::new("join", json!("u-1")));
        assert_eq!(conn.recv().await.unwrap().name, "typing");
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let (transport, mut server) = MemoryTransport::new();
        let mut manager = ConnectionManager::new(Arc::new(transport), ConnectionOptions::default());
        let (log, handler) = recorder();

        manager.on("message", handler("first"));
        manager.on("message", handler("second"));
        manager.connect("memory://room", &UserId::from("u-1"));

        let conn = server.accept().await.unwrap();
        conn.send(WireEvent::new("message", json!(1)));

        wait_until(|| log.lock().unwrap().len() == 2).await;
        assert_eq!(*log.lock().unwrap(), vec!["first:1", "second:1"]);
    }

    #[tokio::test]
    async fn early_events_are_replayed_to_late_handler() {
        let (transport, mut server) = MemoryTransport::new();
        let mut manager = ConnectionManager::new(Arc::new(transport), ConnectionOptions::default());
        let (log, handler) = recorder();

        manager.connect("memory://room", &UserId::from("u-1"));
        let mut conn = server.accept().await.unwrap();
        conn.send(WireEvent::new("typing", json!("a")));
        conn.send(WireEvent::new("typing", json!("b")));
        // join 已送达说明驱动任务在运行
        conn.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.on("typing", handler("late"));
        conn.send(WireEvent::new("typing", json!("c")));

        wait_until(|| log.lock().unwrap().len() == 3).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["late:\"a\"", "late:\"b\"", "late:\"c\""]
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_detaches_handlers() {
        let (transport, mut server) = MemoryTransport::new();
        let mut manager = ConnectionManager::new(Arc::new(transport), ConnectionOptions::default());
        let (log, handler) = recorder();
        manager.on("message", handler("h"));
        manager.connect("memory://room", &UserId::from("u-1"));

        let mut conn = server.accept().await.unwrap();
        conn.recv().await.unwrap();

        assert!(manager.disconnect());
        assert!(!manager.disconnect());
        assert!(!manager.is_open());
        assert!(matches!(
            manager.emit("typing", json!("x")),
            Err(ApplicationError::NotConnected)
        ));

        conn.send(WireEvent::new("message", json!(1)));
        assert!(conn.recv().await.is_none(), "transport closed after disconnect");
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(manager.current_status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn emit_before_close_is_flushed() {
        let (transport, mut server) = MemoryTransport::new();
        let mut manager = ConnectionManager::new(Arc::new(transport), ConnectionOptions::default());
        manager.connect("memory://room", &UserId::from("u-1"));

        manager.emit_event(ClientEvent::LeaveRoom).unwrap();
        manager.shutdown(Duration::from_secs(1)).await;

        let mut conn = server.accept().await.unwrap();
        assert_eq!(conn.recv().await.unwrap().name, "join");
        assert_eq!(conn.recv().await.unwrap(), WireEvent::bare("leaveRoom"));
        assert!(conn.recv().await.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_failed_status() {
        let mut transport = MockTransport::new();
        transport
            .expect_open()
            .times(1)
            .returning(|_| Err(TransportError::unreachable("connection refused")));

        let mut manager = ConnectionManager::new(Arc::new(transport), ConnectionOptions::default());
        let mut status = manager.status();
        manager.connect("ws://127.0.0.1:1", &UserId::from("u-1"));

        let failed = status
            .wait_for(|s| matches!(s, ConnectionStatus::Failed(_)))
            .await
            .unwrap()
            .clone();
        assert!(failed.is_terminal());
        wait_until(|| !manager.is_open()).await;
        assert!(manager.emit("typing", json!("x")).is_err());
    }

    /// 打开连接需要等待放行的传输，用于制造“连接中”的窗口
    struct GatedTransport {
        gate: Arc<tokio::sync::Notify>,
        opened: mpsc::UnboundedSender<mpsc::UnboundedReceiver<WireEvent>>,
    }

    #[async_trait::async_trait]
    impl Transport for GatedTransport {
        async fn open(&self, _endpoint: &str) -> Result<TransportLink, TransportError> {
            self.gate.notified().await;
            let (outbound, written) = mpsc::unbounded_channel();
            let (_server, inbound) = mpsc::unbounded_channel();
            let _ = self.opened.send(written);
            Ok(TransportLink::new(outbound, inbound))
        }
    }

    #[tokio::test]
    async fn disconnect_while_opening_sends_nothing() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let (opened, mut opened_rx) = mpsc::unbounded_channel();
        let transport = GatedTransport {
            gate: gate.clone(),
            opened,
        };
        let mut manager = ConnectionManager::new(Arc::new(transport), ConnectionOptions::default());

        manager.connect("gated://room", &UserId::from("u-old"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.disconnect());
        gate.notify_one();

        let mut written = opened_rx.recv().await.expect("open completed");
        assert!(written.recv().await.is_none(), "no join after disconnect");
        assert_eq!(manager.current_status(), ConnectionStatus::Closed);
    }

    #[test]
    fn unhandled_event_names_are_bounded() {
        let mut registry = HandlerRegistry::new(4);
        for i in 0..(MAX_PENDING_EVENT_NAMES * 2) {
            for n in 0..10 {
                registry.dispatch(WireEvent::new(format!("unknown-{i}"), json!(n)));
            }
        }
        assert_eq!(registry.pending.len(), MAX_PENDING_EVENT_NAMES);
        assert!(registry.pending.values().all(|queue| queue.len() == 4));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_and_rejoins_when_enabled() {
        let (transport, mut server) = MemoryTransport::new();
        let options = ConnectionOptions {
            reconnect: ReconnectPolicy::new(3, Duration::from_millis(100)),
            ..ConnectionOptions::default()
        };
        let mut manager = ConnectionManager::new(Arc::new(transport), options);
        manager.connect("memory://room", &UserId::from("u-1"));

        let mut first = server.accept().await.unwrap();
        assert_eq!(first.recv().await.unwrap().name, "join");
        first.close();

        let mut second = server.accept().await.unwrap();
        assert_eq!(second.recv().await.unwrap(), WireEvent::new("join", json!("u-1")));
        assert!(manager.is_open());
    }

    #[tokio::test]
    async fn dropped_link_without_reconnect_is_lost() {
        let (transport, mut server) = MemoryTransport::new();
        let mut manager = ConnectionManager::new(Arc::new(transport), ConnectionOptions::default());
        let mut status = manager.status();
        manager.connect("memory://room", &UserId::from("u-1"));

        let conn = server.accept().await.unwrap();
        conn.close();

        status
            .wait_for(|s| *s == ConnectionStatus::Lost)
            .await
            .unwrap();
        wait_until(|| !manager.is_open()).await;
    }
}
