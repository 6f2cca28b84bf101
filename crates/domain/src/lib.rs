//! 聊天会话客户端的领域模型
//!
//! 包含用户、消息、在线集合、输入提示等实体，以及与服务器交互的事件协议。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
