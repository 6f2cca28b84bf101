//! 基础设施层实现。
//!
//! 提供应用层 [`application::Transport`] 的 Socket.IO over WebSocket 适配器。

pub mod socketio;
pub mod websocket;

pub use socketio::{EnginePacket, Handshake, PacketError, SocketPacket};
pub use websocket::{socket_url, SocketIoTransport, DEFAULT_HANDSHAKE_TIMEOUT};
