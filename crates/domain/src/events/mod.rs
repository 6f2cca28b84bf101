//! 事件协议定义
//!
//! 客户端与聊天服务器之间的命名事件。

pub mod chat_event;

// 重新导出事件类型
pub use chat_event::*;
