//! 应用层实现。
//!
//! 这里是会话与状态同步的核心：连接生命周期、消息流、在线状态、
//! 输入提示，以及把它们组合在一起的会话控制器。传输实现通过
//! [`Transport`] 注入。

pub mod connection;
pub mod error;
pub mod message_stream;
pub mod presence;
pub mod retry;
pub mod session;
pub mod transport;
pub mod typing;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use connection::{ConnectionManager, ConnectionOptions, ConnectionStatus, EventHandler};
pub use error::{ApplicationError, ApplicationResult, TransportError};
pub use message_stream::MessageStream;
pub use presence::PresenceTracker;
pub use retry::{Backoff, ReconnectPolicy};
pub use session::{ChatSession, EndReason, SessionEnded, SessionObserver, SessionSettings};
pub use transport::{Transport, TransportLink};
pub use typing::TypingIndicator;
