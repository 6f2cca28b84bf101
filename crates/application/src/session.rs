//! 聊天会话控制器
//!
//! 组合连接管理器与三个状态容器：
//! - 启动时先注册入站处理器，再打开连接并宣告用户身份
//! - 提供发送消息、宣告输入、离开房间三个出站操作
//! - 销毁时关闭连接，且不会留下悬空连接

use std::sync::Arc;
use std::time::Duration;

use domain::{
    decode_payload, event_names, ChatMessage, ClientEvent, OutgoingMessage, PresenceSet,
    TypingAnnouncement, User, UserId, DEFAULT_TYPING_EXPIRY,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::connection::{ConnectionManager, ConnectionOptions, ConnectionStatus};
use crate::error::{ApplicationError, ApplicationResult};
use crate::message_stream::MessageStream;
use crate::presence::PresenceTracker;
use crate::retry::ReconnectPolicy;
use crate::transport::Transport;
use crate::typing::TypingIndicator;

/// 会话参数
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// 聊天服务器地址
    pub endpoint: String,
    /// 输入提示的显示时长
    pub typing_expiry: Duration,
    pub connection: ConnectionOptions,
    /// 离开时等待连接发送完已排队事件的最长时间
    pub shutdown_timeout: Duration,
}

impl SessionSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            typing_expiry: DEFAULT_TYPING_EXPIRY,
            connection: ConnectionOptions::default(),
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&config::ClientConfig> for SessionSettings {
    fn from(cfg: &config::ClientConfig) -> Self {
        Self {
            endpoint: cfg.server.endpoint.clone(),
            typing_expiry: Duration::from_millis(cfg.session.typing_expiry_ms),
            connection: ConnectionOptions {
                early_event_buffer: cfg.session.early_event_buffer,
                reconnect: ReconnectPolicy::new(
                    cfg.reconnect.max_attempts,
                    Duration::from_millis(cfg.reconnect.base_delay_ms),
                ),
            },
            shutdown_timeout: Duration::from_millis(cfg.session.shutdown_timeout_ms),
        }
    }
}

/// 会话结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// 用户主动离开
    Left,
    /// 会话被销毁（例如界面卸载）
    TornDown,
}

/// 会话结束通知，后续如何处理（例如跳转页面）由调用方决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnded {
    pub user_id: UserId,
    pub reason: EndReason,
}

/// 展示层使用的只读观察者集合
pub struct SessionObserver {
    pub messages: watch::Receiver<Vec<ChatMessage>>,
    pub presence: watch::Receiver<PresenceSet>,
    pub typing: watch::Receiver<Option<TypingAnnouncement>>,
    pub connection: watch::Receiver<ConnectionStatus>,
    pub ended: watch::Receiver<Option<SessionEnded>>,
}

/// 一个用户在聊天室中的会话
///
/// 独占连接与三个状态容器；连接不会暴露给外部。
pub struct ChatSession<T: Transport + 'static> {
    user: User,
    settings: SessionSettings,
    transport: Arc<T>,
    connection: ConnectionManager<T>,
    connection_status: Arc<watch::Sender<ConnectionStatus>>,
    messages: MessageStream,
    presence: PresenceTracker,
    typing: TypingIndicator,
    draft: String,
    ended: watch::Sender<Option<SessionEnded>>,
}

impl<T: Transport + 'static> ChatSession<T> {
    /// 打开连接并加入房间
    ///
    /// 需要在 tokio 运行时内调用。连接失败不会返回错误，
    /// 而是体现在 [`SessionObserver::connection`] 上。
    pub fn start(user: User, transport: Arc<T>, settings: SessionSettings) -> Self {
        let messages = MessageStream::new();
        let presence = PresenceTracker::new();
        let typing = TypingIndicator::with_expiry(settings.typing_expiry);
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        let connection_status = Arc::new(status);
        let (ended, _) = watch::channel(None);

        let connection = open_connection(
            &user,
            &transport,
            &settings,
            &connection_status,
            &messages,
            &presence,
            &typing,
        );

        tracing::info!(user_id = %user.id, username = %user.username, "会话已启动");

        Self {
            user,
            settings,
            transport,
            connection,
            connection_status,
            messages,
            presence,
            typing,
            draft: String::new(),
            ended,
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// 发送消息
    ///
    /// 文本为空或只含空白、会话已结束、没有可用连接时不做任何事并返回 `false`。
    /// 发送成功后清空输入缓冲区。
    pub fn send_message(&mut self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        if self.is_ended() || !self.connection.is_open() {
            tracing::debug!("没有可用连接，忽略发送");
            return false;
        }

        let outgoing = OutgoingMessage::from_user(&self.user, text);
        match self.connection.emit_event(ClientEvent::SendMessage(outgoing)) {
            Ok(()) => {
                self.draft.clear();
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to send message");
                false
            }
        }
    }

    /// 宣告正在输入，每次输入活动都会调用，发送端不做防抖
    pub fn announce_typing(&self) -> bool {
        if self.is_ended() || !self.connection.is_open() {
            return false;
        }
        match self
            .connection
            .emit_event(ClientEvent::Typing(self.user.typing_notice()))
        {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(error = %err, "typing announcement dropped");
                false
            }
        }
    }

    /// 更新输入缓冲区，并视为一次输入活动
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
        self.announce_typing();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// 发送输入缓冲区中的内容
    pub fn submit_draft(&mut self) -> bool {
        let text = self.draft.clone();
        self.send_message(&text)
    }

    /// 离开房间
    ///
    /// 先发送 `leaveRoom`，再关闭连接并等待已排队事件发出。离开是终态：
    /// 之后不再处理任何入站事件，再次调用返回 `None` 且不会重复发送。
    pub async fn leave(&mut self) -> Option<SessionEnded> {
        if self.is_ended() {
            return None;
        }

        if self.connection.is_open() {
            if let Err(err) = self.connection.emit_event(ClientEvent::LeaveRoom) {
                tracing::warn!(error = %err, "failed to send leave signal");
            }
        }

        self.typing.clear();
        self.connection.shutdown(self.settings.shutdown_timeout).await;
        tracing::info!(user_id = %self.user.id, "已离开房间");
        Some(self.finish(EndReason::Left))
    }

    /// 销毁会话：清除输入提示并关闭连接，不发送 `leaveRoom`
    ///
    /// 幂等，`Drop` 时自动调用。
    pub fn teardown(&mut self) {
        self.release_connection();
        if !self.is_ended() {
            self.finish(EndReason::TornDown);
        }
    }

    /// 更换用户身份
    ///
    /// 先关闭当前连接，再以新身份打开新连接；状态容器保持不变，
    /// 新连接收到的历史消息会覆盖旧日志。
    pub fn switch_user(&mut self, user: User) -> ApplicationResult<()> {
        if self.is_ended() {
            return Err(ApplicationError::SessionEnded);
        }
        if user.id == self.user.id {
            self.user = user;
            return Ok(());
        }

        tracing::info!(from = %self.user.id, to = %user.id, "切换用户身份");
        self.release_connection();
        self.draft.clear();
        self.user = user;
        self.connection = open_connection(
            &self.user,
            &self.transport,
            &self.settings,
            &self.connection_status,
            &self.messages,
            &self.presence,
            &self.typing,
        );
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.ended.borrow().is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    pub fn observe(&self) -> SessionObserver {
        SessionObserver {
            messages: self.messages.subscribe(),
            presence: self.presence.subscribe(),
            typing: self.typing.subscribe(),
            connection: self.connection_status.subscribe(),
            ended: self.ended.subscribe(),
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.snapshot()
    }

    pub fn online_users(&self) -> PresenceSet {
        self.presence.current()
    }

    pub fn online_count(&self) -> usize {
        self.presence.count()
    }

    pub fn typing_text(&self) -> Option<String> {
        self.typing.text()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status.borrow().clone()
    }

    pub fn ended(&self) -> watch::Receiver<Option<SessionEnded>> {
        self.ended.subscribe()
    }

    fn release_connection(&mut self) {
        self.typing.clear();
        self.connection.disconnect();
    }

    fn finish(&self, reason: EndReason) -> SessionEnded {
        let ended = SessionEnded {
            user_id: self.user.id.clone(),
            reason,
        };
        self.ended.send_replace(Some(ended.clone()));
        ended
    }
}

impl<T: Transport + 'static> Drop for ChatSession<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// 注册入站处理器后再连接，保证不会错过早到的事件
fn open_connection<T: Transport + 'static>(
    user: &User,
    transport: &Arc<T>,
    settings: &SessionSettings,
    status: &Arc<watch::Sender<ConnectionStatus>>,
    messages: &MessageStream,
    presence: &PresenceTracker,
    typing: &TypingIndicator,
) -> ConnectionManager<T> {
    let mut connection = ConnectionManager::with_status_channel(
        transport.clone(),
        settings.connection.clone(),
        status.clone(),
    );

    let stream = messages.clone();
    connection.on(event_names::PREVIOUS_MESSAGES, move |payload: &Value| {
        if let Some(backlog) = decode::<Vec<ChatMessage>>(event_names::PREVIOUS_MESSAGES, payload) {
            stream.load_backlog(backlog);
        }
    });

    let stream = messages.clone();
    connection.on(event_names::MESSAGE, move |payload: &Value| {
        if let Some(message) = decode::<ChatMessage>(event_names::MESSAGE, payload) {
            stream.append(message);
        }
    });

    let indicator = typing.clone();
    connection.on(event_names::TYPING, move |payload: &Value| {
        if let Some(text) = decode::<String>(event_names::TYPING, payload) {
            indicator.announce(text);
        }
    });

    let tracker = presence.clone();
    connection.on(event_names::UPDATE_ONLINE_USERS, move |payload: &Value| {
        if let Some(users) = decode::<PresenceSet>(event_names::UPDATE_ONLINE_USERS, payload) {
            tracker.update_presence(users);
        }
    });

    connection.connect(&settings.endpoint, &user.id);
    connection
}

/// 解析失败的负载只记录日志并丢弃，不影响状态
fn decode<T: DeserializeOwned>(event: &str, payload: &Value) -> Option<T> {
    match decode_payload(event, payload) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(event, error = %err, "malformed payload dropped");
            None
        }
    }
}
