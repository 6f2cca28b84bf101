//! 用户实体定义
//!
//! 会话所代表的已认证用户。身份由外部提供，会话期间不可变。

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{UserId, Username};
use serde::{Deserialize, Serialize};

/// 用户实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// 用户唯一ID（服务端文档ID）
    #[serde(alias = "_id")]
    pub id: UserId,
    /// 用户名
    pub username: Username,
    /// 邮箱
    pub email: String,
}

impl User {
    /// 创建用户，校验ID、用户名与邮箱
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> DomainResult<Self> {
        let id = UserId::parse(id)?;
        let username = Username::parse(username)?;
        let email = email.into();
        Self::validate_email(&email)?;

        Ok(Self {
            id,
            username,
            email,
        })
    }

    /// 输入中提示文本，例如 `alice is typing...`
    pub fn typing_notice(&self) -> String {
        format!("{} is typing...", self.username)
    }

    fn validate_email(email: &str) -> DomainResult<()> {
        let email = email.trim();
        let valid = match email.split_once('@') {
            Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
            None => false,
        };
        if !valid {
            return Err(DomainError::validation_error("email", "invalid format"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_creation() {
        let user = User::new("u-1", "alice", "alice@example.com").unwrap();
        assert_eq!(user.id.as_str(), "u-1");
        assert_eq!(user.username.as_str(), "alice");
        assert_eq!(user.email, "alice@example.com");
    }

    #[test]
    fn test_user_rejects_invalid_email() {
        assert!(User::new("u-1", "alice", "alice.example.com").is_err());
        assert!(User::new("u-1", "alice", "@example.com").is_err());
    }

    #[test]
    fn test_typing_notice() {
        let user = User::new("u-1", "alice", "alice@example.com").unwrap();
        assert_eq!(user.typing_notice(), "alice is typing...");
    }

    #[test]
    fn test_user_accepts_document_id_field() {
        let user: User = serde_json::from_str(
            r#"{"_id":"65ab","username":"bob","email":"bob@example.com"}"#,
        )
        .unwrap();
        assert_eq!(user.id.as_str(), "65ab");
    }
}
