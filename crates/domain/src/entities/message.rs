//! 聊天消息实体定义
//!
//! 消息没有客户端生成的ID，顺序完全由到达顺序决定。

use serde::{Deserialize, Serialize};

use crate::entities::user::User;
use crate::value_objects::UserId;

/// 房间中的一条聊天消息
///
/// 服务端可能附带额外字段（`_id`、时间戳等），解析时忽略。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// 发送者ID
    pub user_id: UserId,
    /// 发送者用户名
    pub username: String,
    /// 消息正文
    pub text: String,
}

impl ChatMessage {
    pub fn new(user_id: impl Into<UserId>, username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            text: text.into(),
        }
    }
}

/// 客户端发出的 `sendMessage` 负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub user_id: UserId,
    pub username: String,
    pub text: String,
}

impl OutgoingMessage {
    /// 以用户身份构造待发送消息，正文原样保留
    pub fn from_user(user: &User, text: impl Into<String>) -> Self {
        Self {
            user_id: user.id.clone(),
            username: user.username.as_str().to_owned(),
            text: text.into(),
        }
    }
}

impl From<OutgoingMessage> for ChatMessage {
    fn from(value: OutgoingMessage) -> Self {
        Self {
            user_id: value.user_id,
            username: value.username,
            text: value.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let message = ChatMessage::new("u-1", "alice", "hello");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"userId": "u-1", "username": "alice", "text": "hello"})
        );
    }

    #[test]
    fn test_message_ignores_server_fields() {
        let message: ChatMessage = serde_json::from_str(
            r#"{"_id":"m1","userId":"u-2","username":"bob","text":"hi","timestamp":"2024-01-01T00:00:00Z","__v":0}"#,
        )
        .unwrap();
        assert_eq!(message, ChatMessage::new("u-2", "bob", "hi"));
    }

    #[test]
    fn test_outgoing_keeps_text_verbatim() {
        let user = User::new("u-1", "alice", "alice@example.com").unwrap();
        let outgoing = OutgoingMessage::from_user(&user, "  spaced  ");
        assert_eq!(outgoing.text, "  spaced  ");
        assert_eq!(ChatMessage::from(outgoing).user_id, user.id);
    }
}
