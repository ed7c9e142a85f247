//! Engine.IO v4 / Socket.IO v4 text frame codec.
//!
//! A WebSocket text frame carries one Engine.IO packet: a single type digit
//! followed by its payload. Engine.IO `message` packets wrap a Socket.IO packet:
//!
//! ```text
//! <type>[<attachments>-][<namespace>,][<ack id>][<json>]
//! ```
//!
//! Binary attachments are not supported; such packets are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const ROOT_NAMESPACE: &str = "/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine packet type '{0}'")]
    UnknownEngineType(char),
    #[error("unknown socket packet type '{0}'")]
    UnknownSocketType(char),
    #[error("binary attachments are not supported")]
    BinaryUnsupported,
    #[error("invalid json payload: {0}")]
    Json(String),
}

/// Parameters announced by the server in the Engine.IO `open` packet.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, WireError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(WireError::Empty)?;
        let body = chars.as_str();
        match kind {
            '0' => serde_json::from_str(body)
                .map(Self::Open)
                .map_err(|err| WireError::Json(err.to_string())),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(body.to_string())),
            '3' => Ok(Self::Pong(body.to_string())),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(WireError::UnknownEngineType(other)),
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            // The open packet is server-only; encoding it is only useful to mock servers.
            Self::Open(handshake) => format!(
                "0{}",
                serde_json::to_string(handshake).unwrap_or_else(|_| "{}".into())
            ),
            Self::Close => "1".into(),
            Self::Ping(body) => format!("2{body}"),
            Self::Pong(body) => format!("3{body}"),
            Self::Message(body) => format!("4{body}"),
            Self::Upgrade => "5".into(),
            Self::Noop => "6".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
}

impl PacketKind {
    fn digit(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
        }
    }
}

/// One Socket.IO packet addressed to a namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct SocketPacket {
    pub kind: PacketKind,
    pub namespace: String,
    pub id: Option<u64>,
    pub data: Option<Value>,
}

impl SocketPacket {
    pub fn connect(namespace: impl Into<String>, auth: Option<Value>) -> Self {
        Self {
            kind: PacketKind::Connect,
            namespace: namespace.into(),
            id: None,
            data: auth,
        }
    }

    pub fn disconnect(namespace: impl Into<String>) -> Self {
        Self {
            kind: PacketKind::Disconnect,
            namespace: namespace.into(),
            id: None,
            data: None,
        }
    }

    pub fn event(namespace: impl Into<String>, name: &str, payload: Value) -> Self {
        let data = match payload {
            Value::Null => Value::Array(vec![Value::String(name.to_string())]),
            other => Value::Array(vec![Value::String(name.to_string()), other]),
        };
        Self {
            kind: PacketKind::Event,
            namespace: namespace.into(),
            id: None,
            data: Some(data),
        }
    }

    pub fn decode(body: &str) -> Result<Self, WireError> {
        let mut chars = body.chars();
        let kind = match chars.next().ok_or(WireError::Empty)? {
            '0' => PacketKind::Connect,
            '1' => PacketKind::Disconnect,
            '2' => PacketKind::Event,
            '3' => PacketKind::Ack,
            '4' => PacketKind::ConnectError,
            '5' | '6' => return Err(WireError::BinaryUnsupported),
            other => return Err(WireError::UnknownSocketType(other)),
        };
        let mut rest = chars.as_str();

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let ns = &rest[..idx];
                    rest = &rest[idx + 1..];
                    ns.to_string()
                }
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                }
            }
        } else {
            ROOT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let parsed = rest[..digits].parse::<u64>().ok();
            rest = &rest[digits..];
            parsed
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest).map_err(|err| WireError::Json(err.to_string()))?)
        };

        Ok(Self {
            kind,
            namespace,
            id,
            data,
        })
    }

    /// Encode as a Socket.IO packet body (without the Engine.IO prefix).
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        if self.namespace != ROOT_NAMESPACE && !self.namespace.is_empty() {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Encode wrapped in an Engine.IO `message` packet, ready for a text frame.
    #[must_use]
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }

    /// Event name and first argument of an `event` packet.
    #[must_use]
    pub fn event_parts(&self) -> Option<(String, Value)> {
        if self.kind != PacketKind::Event {
            return None;
        }
        let items = self.data.as_ref()?.as_array()?;
        let name = items.first()?.as_str()?.to_string();
        let payload = items.get(1).cloned().unwrap_or(Value::Null);
        Some((name, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_open_handshake() {
        let frame = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        match EnginePacket::decode(frame).expect("decode") {
            EnginePacket::Open(open) => {
                assert_eq!(open.sid, "abc");
                assert_eq!(open.ping_interval, 25_000);
                assert_eq!(open.ping_timeout, 20_000);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn decodes_namespaced_event() {
        let packet =
            SocketPacket::decode(r#"2/v1,["price-update",{"currencyPair":"SEI-USDT","price":0.4}]"#)
                .expect("decode");
        assert_eq!(packet.kind, PacketKind::Event);
        assert_eq!(packet.namespace, "/v1");
        assert_eq!(packet.id, None);
        let (name, payload) = packet.event_parts().expect("event");
        assert_eq!(name, "price-update");
        assert_eq!(payload["price"], json!(0.4));
    }

    #[test]
    fn decodes_ack_id_and_root_namespace() {
        let packet = SocketPacket::decode(r#"212["botState",{"botId":"bot1"}]"#).expect("decode");
        assert_eq!(packet.namespace, ROOT_NAMESPACE);
        assert_eq!(packet.id, Some(12));
        assert_eq!(packet.event_parts().map(|(name, _)| name).as_deref(), Some("botState"));
    }

    #[test]
    fn decodes_connect_ack_and_error() {
        let ack = SocketPacket::decode(r#"0/v1,{"sid":"xyz"}"#).expect("ack");
        assert_eq!(ack.kind, PacketKind::Connect);
        assert_eq!(ack.data, Some(json!({"sid": "xyz"})));

        let err = SocketPacket::decode(r#"4/v1,{"message":"Invalid namespace"}"#).expect("err");
        assert_eq!(err.kind, PacketKind::ConnectError);
        assert_eq!(err.data, Some(json!({"message": "Invalid namespace"})));
    }

    #[test]
    fn scalar_event_payload_survives() {
        let frame = SocketPacket::event("/v1", "cex-SEI-USDT-price", json!(1.02)).to_frame();
        assert_eq!(frame, r#"42/v1,["cex-SEI-USDT-price",1.02]"#);
        let body = match EnginePacket::decode(&frame).expect("engine") {
            EnginePacket::Message(body) => body,
            other => panic!("unexpected packet {other:?}"),
        };
        let (_, payload) = SocketPacket::decode(&body)
            .expect("socket")
            .event_parts()
            .expect("event");
        assert_eq!(payload, json!(1.02));
    }

    #[test]
    fn connect_request_keeps_trailing_comma() {
        assert_eq!(SocketPacket::connect("/v1", None).to_frame(), "40/v1,");
        assert_eq!(SocketPacket::connect("/", None).to_frame(), "40");
    }

    #[test]
    fn rejects_binary_and_garbage() {
        assert_eq!(
            SocketPacket::decode(r#"51-/v1,["x",{"_placeholder":true,"num":0}]"#),
            Err(WireError::BinaryUnsupported)
        );
        assert!(matches!(
            EnginePacket::decode("9"),
            Err(WireError::UnknownEngineType('9'))
        ));
        assert!(matches!(
            SocketPacket::decode("2/v1,[oops"),
            Err(WireError::Json(_))
        ));
    }
}
