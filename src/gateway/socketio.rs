// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Socket.IO text packet codec.
//!
//! Covers the subset of Engine.IO v4 / Socket.IO v5 needed by a client on
//! the default namespace over a WebSocket transport: handshake, ping/pong,
//! namespace connect/disconnect and event packets.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Engine.IO open packet payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

/// Bounds on the liveness window, whatever the server advertises.
const MIN_LIVENESS: Duration = Duration::from_secs(1);
const MAX_LIVENESS: Duration = Duration::from_secs(300);

impl OpenInfo {
    /// How long the server may stay silent before the link is dead.
    pub fn liveness_window(&self) -> Duration {
        let window = self.ping_interval.saturating_add(self.ping_timeout);
        Duration::from_millis(window).clamp(MIN_LIVENESS, MAX_LIVENESS)
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO `0`: transport handshake.
    Open(OpenInfo),
    /// Engine.IO `1`: transport closed by the server.
    Close,
    /// Engine.IO `2`.
    Ping,
    /// Engine.IO `3`.
    Pong,
    /// Socket.IO `0`: namespace connected.
    Connect(Value),
    /// Socket.IO `1`: namespace disconnected.
    Disconnect,
    /// Socket.IO `2`: event with its first argument.
    Event { name: String, data: Value },
    /// Socket.IO `4`: namespace connection refused.
    ConnectError(Value),
    /// Anything else (upgrade, noop, acks, binary).
    Other,
}

/// Packet decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode one WebSocket text frame.
pub fn decode(frame: &str) -> Result<Packet, PacketError> {
    let mut chars = frame.chars();
    let engine = chars.next().ok_or(PacketError::Empty)?;
    let rest = chars.as_str();

    match engine {
        '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket(rest),
        '5' | '6' => Ok(Packet::Other),
        _ => Err(PacketError::Malformed("unknown engine packet type")),
    }
}

fn decode_socket(packet: &str) -> Result<Packet, PacketError> {
    let mut chars = packet.chars();
    let kind = chars.next().ok_or(PacketError::Malformed("missing socket packet type"))?;
    let body = strip_ack_id(strip_namespace(chars.as_str()));

    match kind {
        '0' => Ok(Packet::Connect(parse_optional(body)?)),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(body),
        '4' => Ok(Packet::ConnectError(parse_optional(body)?)),
        '3' | '5' | '6' => Ok(Packet::Other),
        _ => Err(PacketError::Malformed("unknown socket packet type")),
    }
}

fn decode_event(body: &str) -> Result<Packet, PacketError> {
    let args: Vec<Value> = serde_json::from_str(body)?;
    let mut args = args.into_iter();
    let name = match args.next() {
        Some(Value::String(name)) => name,
        _ => return Err(PacketError::Malformed("event without a name")),
    };
    let data = args.next().unwrap_or(Value::Null);
    Ok(Packet::Event { name, data })
}

/// Drop a `/namespace,` prefix.
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(i) => &body[i + 1..],
            None => "",
        }
    } else {
        body
    }
}

/// Drop a numeric acknowledgement id.
fn strip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_optional(body: &str) -> Result<Value, PacketError> {
    if body.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(serde_json::from_str(body)?)
    }
}

/// Socket.IO connect to the default namespace.
pub fn encode_connect() -> String {
    "40".to_string()
}

/// Socket.IO disconnect from the default namespace.
pub fn encode_disconnect() -> String {
    "41".to_string()
}

/// Engine.IO pong.
pub fn encode_pong() -> String {
    "3".to_string()
}

/// Socket.IO event with a single argument.
pub fn encode_event(name: &str, data: &Value) -> String {
    let args = Value::Array(vec![Value::String(name.to_string()), data.clone()]);
    format!("42{}", args)
}

/// WebSocket endpoint for a Socket.IO server base address.
///
/// `http(s)` schemes map to `ws(s)`; an empty path becomes `/socket.io/`;
/// any query on the base address is kept.
pub fn endpoint(base: &str) -> String {
    let base = base.trim();
    let (scheme, rest) = match base.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("ws", base),
    };
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "https" | "wss" => "wss",
        _ => "ws",
    };

    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, query),
        None => (rest, ""),
    };
    let (authority, path) = match location.find('/') {
        Some(i) => location.split_at(i),
        None => (location, ""),
    };
    let path = if path.is_empty() || path == "/" {
        "/socket.io/"
    } else {
        path
    };

    let mut url = format!("{}://{}{}?EIO=4&transport=websocket", scheme, authority, path);
    if !query.is_empty() {
        url.push('&');
        url.push_str(query);
    }
    url
}
