//! 聊天室事件协议
//!
//! 连接上传输的是“事件名 + JSON负载”。这里定义事件名常量、
//! 通用的 [`WireEvent`]，以及类型化的入站/出站事件。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::message::{ChatMessage, OutgoingMessage};
use crate::entities::presence::PresenceSet;
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::UserId;

/// 事件名常量
pub mod event_names {
    /// 出站：连接后宣告身份
    pub const JOIN: &str = "join";
    /// 入站：一次性历史消息
    pub const PREVIOUS_MESSAGES: &str = "previousMessages";
    /// 入站：实时消息
    pub const MESSAGE: &str = "message";
    /// 出站：发布消息
    pub const SEND_MESSAGE: &str = "sendMessage";
    /// 双向：正在输入提示
    pub const TYPING: &str = "typing";
    /// 入站：在线用户快照
    pub const UPDATE_ONLINE_USERS: &str = "updateOnlineUsers";
    /// 出站：主动离开房间
    pub const LEAVE_ROOM: &str = "leaveRoom";
}

/// 线路上的通用事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub name: String,
    /// 无负载的事件使用 `Value::Null`
    pub payload: Value,
}

impl WireEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// 不带负载的事件
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_null()
    }
}

/// 客户端发往服务器的事件
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Join(UserId),
    SendMessage(OutgoingMessage),
    Typing(String),
    LeaveRoom,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => event_names::JOIN,
            ClientEvent::SendMessage(_) => event_names::SEND_MESSAGE,
            ClientEvent::Typing(_) => event_names::TYPING,
            ClientEvent::LeaveRoom => event_names::LEAVE_ROOM,
        }
    }

    /// 转换为线路事件
    pub fn into_wire(self) -> WireEvent {
        let name = self.name();
        let payload = match self {
            ClientEvent::Join(user_id) => Value::String(user_id.into()),
            ClientEvent::SendMessage(message) => serde_json::json!({
                "userId": message.user_id,
                "username": message.username,
                "text": message.text,
            }),
            ClientEvent::Typing(text) => Value::String(text),
            ClientEvent::LeaveRoom => Value::Null,
        };
        WireEvent::new(name, payload)
    }
}

/// 服务器推送给客户端的事件
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PreviousMessages(Vec<ChatMessage>),
    Message(ChatMessage),
    Typing(String),
    UpdateOnlineUsers(PresenceSet),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::PreviousMessages(_) => event_names::PREVIOUS_MESSAGES,
            ServerEvent::Message(_) => event_names::MESSAGE,
            ServerEvent::Typing(_) => event_names::TYPING,
            ServerEvent::UpdateOnlineUsers(_) => event_names::UPDATE_ONLINE_USERS,
        }
    }

    /// 转换为线路事件，主要用于测试中模拟服务器
    pub fn into_wire(self) -> WireEvent {
        let name = self.name();
        let payload = match self {
            ServerEvent::PreviousMessages(messages) => serde_json::to_value(messages),
            ServerEvent::Message(message) => serde_json::to_value(message),
            ServerEvent::Typing(text) => Ok(Value::String(text)),
            ServerEvent::UpdateOnlineUsers(users) => serde_json::to_value(users),
        }
        .unwrap_or(Value::Null);
        WireEvent::new(name, payload)
    }
}

/// 解析指定事件名的负载，失败时返回 [`DomainError::ProtocolError`]
pub fn decode_payload<T: DeserializeOwned>(event: &str, payload: &Value) -> DomainResult<T> {
    T::deserialize(payload).map_err(|err| DomainError::protocol_error(event, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_carries_user_id() {
        let wire = ClientEvent::Join(UserId::from("u-1")).into_wire();
        assert_eq!(wire, WireEvent::new("join", json!("u-1")));
    }

    #[test]
    fn test_leave_room_has_no_payload() {
        let wire = ClientEvent::LeaveRoom.into_wire();
        assert_eq!(wire.name, "leaveRoom");
        assert!(!wire.has_payload());
    }

    #[test]
    fn test_send_message_payload() {
        let outgoing = OutgoingMessage {
            user_id: UserId::from("u-1"),
            username: "alice".into(),
            text: "hi".into(),
        };
        let wire = ClientEvent::SendMessage(outgoing).into_wire();
        assert_eq!(wire.name, "sendMessage");
        assert_eq!(
            wire.payload,
            json!({"userId": "u-1", "username": "alice", "text": "hi"})
        );
    }

    #[test]
    fn test_decode_server_payloads() {
        let backlog = ServerEvent::PreviousMessages(vec![ChatMessage::new("a", "A", "one")]).into_wire();
        assert_eq!(backlog.name, "previousMessages");
        let messages: Vec<ChatMessage> = decode_payload(&backlog.name, &backlog.payload).unwrap();
        assert_eq!(messages, vec![ChatMessage::new("a", "A", "one")]);

        let presence: PresenceSet =
            decode_payload("updateOnlineUsers", &json!(["a", "b", "a"])).unwrap();
        assert_eq!(presence.len(), 2);
    }

    #[test]
    fn test_malformed_payload_is_protocol_error() {
        let err = decode_payload::<ChatMessage>("message", &json!(42)).unwrap_err();
        assert!(matches!(err, DomainError::ProtocolError { ref event, .. } if event == "message"));
    }
}
