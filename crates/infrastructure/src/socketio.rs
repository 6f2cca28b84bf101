//! Socket.IO v4 / Engine.IO v4 文本数据包编解码
//!
//! 只覆盖聊天客户端用到的部分：默认命名空间、文本事件、心跳。
//!
//! Engine.IO 数据包：`0` open、`1` close、`2` ping、`3` pong、`4` message、
//! `5` upgrade、`6` noop。Socket.IO 数据包位于 Engine.IO message 之内：
//! `0` connect、`1` disconnect、`2` event、`3` ack、`4` connect_error。

use domain::WireEvent;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// 客户端连接默认命名空间
pub const CONNECT: &str = "40";
/// 客户端断开默认命名空间
pub const DISCONNECT: &str = "41";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type: {0}")]
    UnknownType(char),
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("unsupported packet: {0}")]
    Unsupported(&'static str),
}

/// Engine.IO open 数据包携带的握手信息
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event(WireEvent),
    ConnectError(Value),
}

/// 解析一个 Engine.IO 文本数据包
pub fn decode_engine(text: &str) -> Result<EnginePacket, PacketError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let body = chars.as_str();

    match kind {
        '0' => serde_json::from_str(body)
            .map(EnginePacket::Open)
            .map_err(|err| PacketError::InvalidJson(err.to_string())),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(body.to_owned())),
        '3' => Ok(EnginePacket::Pong(body.to_owned())),
        '4' => Ok(EnginePacket::Message(body.to_owned())),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(PacketError::UnknownType(other)),
    }
}

/// 解析 Engine.IO message 中的 Socket.IO 数据包
pub fn decode_socket(text: &str) -> Result<SocketPacket, PacketError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let body = skip_namespace(chars.as_str());

    match kind {
        '0' => {
            if body.is_empty() {
                Ok(SocketPacket::Connect(None))
            } else {
                parse_json(body).map(|value| SocketPacket::Connect(Some(value)))
            }
        }
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            // 事件可能带有 ack id：`42` 后紧跟数字
            let body = body.trim_start_matches(|c: char| c.is_ascii_digit());
            decode_event(body).map(SocketPacket::Event)
        }
        '3' => Err(PacketError::Unsupported("ack")),
        '4' => parse_json(body).map(SocketPacket::ConnectError),
        '5' | '6' => Err(PacketError::Unsupported("binary")),
        other => Err(PacketError::UnknownType(other)),
    }
}

/// 编码为 Engine.IO message 中的 Socket.IO event：`42["name",payload]`
pub fn encode_event(event: &WireEvent) -> String {
    let mut args = vec![Value::String(event.name.clone())];
    if event.has_payload() {
        args.push(event.payload.clone());
    }
    format!("42{}", Value::Array(args))
}

/// 对 ping 的回应
pub fn pong(probe: &str) -> String {
    format!("3{probe}")
}

fn decode_event(body: &str) -> Result<WireEvent, PacketError> {
    let Value::Array(mut args) = parse_json(body)? else {
        return Err(PacketError::InvalidEvent("expected array".into()));
    };
    if args.is_empty() {
        return Err(PacketError::InvalidEvent("missing event name".into()));
    }
    let Value::String(name) = args.remove(0) else {
        return Err(PacketError::InvalidEvent("event name must be a string".into()));
    };
    // 聊天协议每个事件至多一个参数，多余参数忽略
    let payload = args.into_iter().next().unwrap_or(Value::Null);
    Ok(WireEvent::new(name, payload))
}

/// 跳过 `/nsp,` 形式的命名空间前缀
fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn parse_json(body: &str) -> Result<Value, PacketError> {
    serde_json::from_str(body).map_err(|err| PacketError::InvalidJson(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_open_handshake() {
        let packet = decode_engine(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        match packet {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "abc");
                assert_eq!(handshake.ping_interval, 25000);
                assert_eq!(handshake.ping_timeout, 20000);
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn decodes_heartbeat_and_control() {
        assert_eq!(decode_engine("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(decode_engine("3probe").unwrap(), EnginePacket::Pong("probe".into()));
        assert_eq!(decode_engine("1").unwrap(), EnginePacket::Close);
        assert_eq!(decode_engine("6").unwrap(), EnginePacket::Noop);
        assert_eq!(decode_engine(""), Err(PacketError::Empty));
        assert_eq!(decode_engine("9"), Err(PacketError::UnknownType('9')));
        assert_eq!(pong(""), "3");
    }

    #[test]
    fn decodes_events() {
        let EnginePacket::Message(body) =
            decode_engine(r#"42["message",{"userId":"u","username":"n","text":"t"}]"#).unwrap()
        else {
            panic!("expected message");
        };
        assert_eq!(
            decode_socket(&body).unwrap(),
            SocketPacket::Event(WireEvent::new(
                "message",
                json!({"userId": "u", "username": "n", "text": "t"})
            ))
        );

        // 带 ack id 与命名空间
        assert_eq!(
            decode_socket(r#"2/chat,7["typing","bob is typing..."]"#).unwrap(),
            SocketPacket::Event(WireEvent::new("typing", json!("bob is typing...")))
        );

        // 无参数事件
        assert_eq!(
            decode_socket(r#"2["leaveRoom"]"#).unwrap(),
            SocketPacket::Event(WireEvent::bare("leaveRoom"))
        );
    }

    #[test]
    fn decodes_connect_variants() {
        assert_eq!(decode_socket("0").unwrap(), SocketPacket::Connect(None));
        assert_eq!(
            decode_socket(r#"0{"sid":"s1"}"#).unwrap(),
            SocketPacket::Connect(Some(json!({"sid": "s1"})))
        );
        assert_eq!(
            decode_socket(r#"4{"message":"Not authorized"}"#).unwrap(),
            SocketPacket::ConnectError(json!({"message": "Not authorized"}))
        );
        assert_eq!(decode_socket("1").unwrap(), SocketPacket::Disconnect);
    }

    #[test]
    fn rejects_malformed_events() {
        assert!(matches!(decode_socket("2{}"), Err(PacketError::InvalidEvent(_))));
        assert!(matches!(decode_socket("2[]"), Err(PacketError::InvalidEvent(_))));
        assert!(matches!(decode_socket("2[1,2]"), Err(PacketError::InvalidEvent(_))));
        assert!(matches!(decode_socket("2[oops"), Err(PacketError::InvalidJson(_))));
        assert_eq!(decode_socket("3[]"), Err(PacketError::Unsupported("ack")));
    }

    #[test]
    fn encodes_events() {
        assert_eq!(
            encode_event(&WireEvent::new("join", json!("u-1"))),
            r#"42["join","u-1"]"#
        );
        assert_eq!(encode_event(&WireEvent::bare("leaveRoom")), r#"42["leaveRoom"]"#);
    }
}
