//! 领域实体定义
//!
//! 包含会话涉及的核心实体：用户、消息、在线集合、输入提示。

pub mod message;
pub mod presence;
pub mod typing;
pub mod user;

// 重新导出核心实体
pub use message::{ChatMessage, OutgoingMessage};
pub use presence::PresenceSet;
pub use typing::{TypingAnnouncement, DEFAULT_TYPING_EXPIRY};
pub use user::User;
