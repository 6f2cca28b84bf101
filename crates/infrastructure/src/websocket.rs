//! 基于 WebSocket 的 Socket.IO 传输实现
//!
//! 建立连接后完成 Engine.IO/Socket.IO 握手，然后由后台任务在
//! WebSocket 与 [`TransportLink`] 的两个通道之间搬运事件。

use std::time::Duration;

use application::{Transport, TransportError, TransportLink};
use async_trait::async_trait;
use domain::WireEvent;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::socketio::{self, EnginePacket, Handshake, SocketPacket};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 默认握手超时
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket.IO over WebSocket 传输
#[derive(Debug, Clone)]
pub struct SocketIoTransport {
    handshake_timeout: Duration,
}

impl Default for SocketIoTransport {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

impl SocketIoTransport {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }

    pub fn from_config(cfg: &config::ClientConfig) -> Self {
        Self::new(Duration::from_millis(cfg.server.handshake_timeout_ms))
    }
}

#[async_trait]
impl Transport for SocketIoTransport {
    async fn open(&self, endpoint: &str) -> Result<TransportLink, TransportError> {
        let url = socket_url(endpoint)?;
        info!("连接 Socket.IO: {}", url);

        let (mut ws, _response) = timeout(self.handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::unreachable(format!("{endpoint}: connect timed out")))?
            .map_err(|e| TransportError::unreachable(format!("{endpoint}: {e}")))?;

        let handshake = timeout(self.handshake_timeout, handshake(&mut ws))
            .await
            .map_err(|_| TransportError::handshake("timed out"))??;
        debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "Socket.IO 握手完成");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let silence_limit =
            Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        tokio::spawn(pump(ws, outbound_rx, inbound_tx, silence_limit));

        Ok(TransportLink::new(outbound_tx, inbound_rx))
    }
}

/// 由服务器地址构造 Socket.IO WebSocket 地址
///
/// `http`/`ws` 映射为 `ws`，`https`/`wss` 映射为 `wss`；没有路径时使用
/// 默认的 `/socket.io/`。
pub fn socket_url(endpoint: &str) -> Result<String, TransportError> {
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| TransportError::unreachable(format!("invalid endpoint: {endpoint}")))?;
    let ws_scheme = match scheme {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::unreachable(format!(
                "unsupported scheme: {other}"
            )))
        }
    };

    if rest.contains('?') {
        return Ok(format!("{ws_scheme}://{rest}"));
    }

    let rest = rest.trim_end_matches('/');
    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return Err(TransportError::unreachable(format!(
            "missing host: {endpoint}"
        )));
    }
    let path = if path.is_empty() { "/socket.io" } else { path };

    Ok(format!(
        "{ws_scheme}://{authority}{path}/?EIO=4&transport=websocket"
    ))
}

/// 等待 Engine.IO open，连接默认命名空间并等待确认
async fn handshake(ws: &mut WsStream) -> Result<Handshake, TransportError> {
    let open = loop {
        match next_packet(ws).await? {
            EnginePacket::Open(open) => break open,
            other => debug!("握手前忽略数据包: {:?}", other),
        }
    };

    send_text(ws, socketio::CONNECT.to_string()).await?;

    loop {
        match next_packet(ws).await? {
            EnginePacket::Message(body) => match socketio::decode_socket(&body) {
                Ok(SocketPacket::Connect(_)) => return Ok(open),
                Ok(SocketPacket::ConnectError(reason)) => {
                    return Err(TransportError::handshake(reason.to_string()))
                }
                Ok(other) => debug!("握手期间忽略数据包: {:?}", other),
                Err(e) => return Err(TransportError::Protocol(e.to_string())),
            },
            EnginePacket::Ping(probe) => send_text(ws, socketio::pong(&probe)).await?,
            EnginePacket::Close => return Err(TransportError::Closed),
            _ => {}
        }
    }
}

async fn next_packet(ws: &mut WsStream) -> Result<EnginePacket, TransportError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return socketio::decode_engine(text.as_str())
                    .map_err(|e| TransportError::Protocol(e.to_string()))
            }
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::handshake(e.to_string())),
        }
    }
}

async fn send_text(ws: &mut WsStream, text: String) -> Result<(), TransportError> {
    ws.send(Message::text(text))
        .await
        .map_err(|e| TransportError::handshake(e.to_string()))
}

/// 后台任务：转发两个方向的事件并回应心跳
///
/// 出站通道关闭时先发送 Socket.IO disconnect 再关闭 WebSocket；
/// 任务退出时丢弃入站发送端，连接管理器据此得知连接已断开。
async fn pump(
    mut ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<WireEvent>,
    inbound: mpsc::UnboundedSender<WireEvent>,
    silence_limit: Duration,
) {
    loop {
        tokio::select! {
            biased;

            event = outbound.recv() => {
                match event {
                    Some(event) => {
                        let text = socketio::encode_event(&event);
                        if let Err(e) = ws.send(Message::text(text)).await {
                            warn!(event = %event.name, "发送事件失败: {}", e);
                            break;
                        }
                    }
                    None => {
                        debug!("出站通道关闭，断开连接");
                        let _ = ws.send(Message::text(socketio::DISCONNECT)).await;
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }

            frame = timeout(silence_limit, ws.next()) => {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(_) => {
                        warn!("服务器心跳超时");
                        break;
                    }
                };
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_text(&mut ws, text.as_str(), &inbound).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("服务器关闭了 WebSocket 连接");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket 错误: {}", e);
                        break;
                    }
                    None => {
                        info!("WebSocket 流结束");
                        break;
                    }
                    // 二进制帧与底层 ping/pong 不参与 Socket.IO 协议
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// 处理一个文本帧，返回 `false` 表示应结束连接
async fn handle_text(
    ws: &mut WsStream,
    text: &str,
    inbound: &mpsc::UnboundedSender<WireEvent>,
) -> bool {
    let packet = match socketio::decode_engine(text) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("无法解析 Engine.IO 数据包: {}", e);
            return true;
        }
    };

    match packet {
        EnginePacket::Ping(probe) => ws.send(Message::text(socketio::pong(&probe))).await.is_ok(),
        EnginePacket::Message(body) => match socketio::decode_socket(&body) {
            Ok(SocketPacket::Event(event)) => {
                debug!(event = %event.name, "收到服务器事件");
                inbound.send(event).is_ok()
            }
            Ok(SocketPacket::Disconnect) => {
                info!("服务器断开了命名空间连接");
                false
            }
            Ok(other) => {
                debug!("忽略数据包: {:?}", other);
                true
            }
            Err(e) => {
                warn!("无法解析 Socket.IO 数据包: {}", e);
                true
            }
        },
        EnginePacket::Close => false,
        _ => true,
    }
}
