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

//! Event-bus gateway.
//!
//! Socket.IO transport with an application-level handshake: after the
//! transport connects the client emits `identify_printer`, and print jobs
//! are only accepted once the server answers `printer_connected` with a
//! true status.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{Reporter, SessionSlot};
use super::socketio::{self, Packet};
use super::{validate, GatewayClient, GatewayError, GatewayEvent, Protocol, SessionPhase};

/// Client → server: declare which printer this is.
pub const EVENT_IDENTIFY: &str = "identify_printer";

/// Server → client: identification result.
pub const EVENT_PRINTER_CONNECTED: &str = "printer_connected";

/// Server → client: a print job.
pub const EVENT_PRINT_MESSAGE: &str = "print_message";

const USER_CLOSE_REASON: &str = "User disconnected";

/// Used when the server rejects the code without saying why.
const DEFAULT_REJECT_REASON: &str = "Printer identification rejected";

/// Silence allowed before the Engine.IO handshake has told us the ping interval.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct PrinterConnectedPayload {
    status: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrintMessagePayload {
    message: String,
}

/// Session phase of the event-bus protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventBusPhase {
    #[default]
    Idle,
    Connecting,
    Identifying,
    Authorized,
    Closed(String),
    Failed(String),
}

impl EventBusPhase {
    fn is_terminal(&self) -> bool {
        matches!(self, EventBusPhase::Closed(_) | EventBusPhase::Failed(_))
    }
}

impl From<EventBusPhase> for SessionPhase {
    fn from(phase: EventBusPhase) -> Self {
        match phase {
            EventBusPhase::Idle => SessionPhase::Idle,
            EventBusPhase::Connecting => SessionPhase::Connecting,
            EventBusPhase::Identifying => SessionPhase::Identifying,
            EventBusPhase::Authorized => SessionPhase::Ready,
            EventBusPhase::Closed(reason) => SessionPhase::Closed(reason),
            EventBusPhase::Failed(reason) => SessionPhase::Failed(reason),
        }
    }
}

/// Inputs to the event-bus state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBusInput {
    /// User asked to connect.
    Dial,
    /// Socket.IO namespace connected.
    TransportConnected,
    /// Server refused the namespace connection.
    ConnectError(String),
    /// A named event from the server.
    Event { name: String, data: Value },
    /// Server disconnected the session.
    Disconnected(String),
    /// User asked to disconnect.
    UserClose,
    /// Transport failed.
    TransportError(String),
}

/// Side effects requested by the event-bus state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBusEffect {
    /// Send an event to the server.
    Emit { name: &'static str, data: Value },
    /// Hand a print payload to the dispatcher.
    Deliver(String),
    /// Tear the transport down.
    CloseTransport,
    /// Report a problem that leaves the phase unchanged.
    Notice(String),
}

/// Event-bus protocol state machine. Holds no I/O.
#[derive(Debug)]
pub struct EventBusMachine {
    credential: String,
    phase: EventBusPhase,
}

impl EventBusMachine {
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            phase: EventBusPhase::Idle,
        }
    }

    pub fn phase(&self) -> &EventBusPhase {
        &self.phase
    }

    /// Apply one input and return the effects to perform.
    pub fn step(&mut self, input: EventBusInput) -> Vec<EventBusEffect> {
        use EventBusPhase::*;

        let phase = self.phase.clone();
        match (phase, input) {
            (Idle | Closed(_) | Failed(_), EventBusInput::Dial) => {
                self.phase = Connecting;
                vec![]
            }
            (Connecting, EventBusInput::TransportConnected) => {
                self.phase = Identifying;
                vec![EventBusEffect::Emit {
                    name: EVENT_IDENTIFY,
                    data: serde_json::json!({ "code": self.credential }),
                }]
            }
            (Connecting | Identifying | Authorized, EventBusInput::Event { name, data }) => {
                self.handle_event(&name, data)
            }
            (Connecting | Identifying | Authorized, EventBusInput::ConnectError(reason)) => {
                self.phase = Failed(reason);
                vec![EventBusEffect::CloseTransport]
            }
            (Connecting | Identifying | Authorized, EventBusInput::Disconnected(reason)) => {
                self.phase = Closed(reason);
                vec![]
            }
            (Connecting | Identifying | Authorized, EventBusInput::UserClose) => {
                self.phase = Closed(USER_CLOSE_REASON.to_string());
                vec![EventBusEffect::CloseTransport]
            }
            (Connecting | Identifying | Authorized, EventBusInput::TransportError(reason)) => {
                self.phase = Failed(reason);
                vec![]
            }
            (phase, input) => {
                debug!("Ignoring {:?} in phase {:?}", input, phase);
                vec![]
            }
        }
    }

    fn handle_event(&mut self, name: &str, data: Value) -> Vec<EventBusEffect> {
        match name {
            EVENT_PRINTER_CONNECTED => {
                let payload: PrinterConnectedPayload = match serde_json::from_value(data) {
                    Ok(payload) => payload,
                    Err(e) => return vec![processing_error(name, &e)],
                };
                if payload.status {
                    if self.phase == EventBusPhase::Identifying {
                        self.phase = EventBusPhase::Authorized;
                    }
                    vec![]
                } else {
                    let reason = payload
                        .error
                        .filter(|e| !e.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_REJECT_REASON.to_string());
                    self.phase = EventBusPhase::Failed(reason);
                    vec![EventBusEffect::CloseTransport]
                }
            }
            EVENT_PRINT_MESSAGE => {
                let payload: PrintMessagePayload = match serde_json::from_value(data) {
                    Ok(payload) => payload,
                    Err(e) => return vec![processing_error(name, &e)],
                };
                if self.phase != EventBusPhase::Authorized {
                    warn!("Received print_message before printer was accepted");
                    return vec![];
                }
                if payload.message.is_empty() {
                    debug!("Ignoring empty print_message");
                    return vec![];
                }
                vec![EventBusEffect::Deliver(payload.message)]
            }
            other => {
                debug!("Ignoring event '{}'", other);
                vec![]
            }
        }
    }
}

fn processing_error(event: &str, error: &serde_json::Error) -> EventBusEffect {
    warn!("Malformed '{}' payload: {}", event, error);
    EventBusEffect::Notice(format!("Processing error: {}", error))
}

/// Gateway client for the event-bus protocol.
pub struct EventBusClient {
    events: mpsc::Sender<GatewayEvent>,
    phase: Arc<RwLock<SessionPhase>>,
    slot: SessionSlot,
}

impl EventBusClient {
    /// Create a client that reports to `events`.
    pub fn new(events: mpsc::Sender<GatewayEvent>) -> Self {
        Self {
            events,
            phase: Arc::new(RwLock::new(SessionPhase::Idle)),
            slot: SessionSlot::default(),
        }
    }
}

#[async_trait]
impl GatewayClient for EventBusClient {
    fn protocol(&self) -> Protocol {
        Protocol::EventBus
    }

    async fn connect(&self, address: &str, credential: &str) -> Result<(), GatewayError> {
        validate(address, credential)?;

        let url = socketio::endpoint(address);
        let machine = EventBusMachine::new(credential.trim());
        let reporter = Reporter::new(self.events.clone(), self.phase.clone());
        self.slot
            .replace(move |cancel| tokio::spawn(run_session(url, machine, reporter, cancel)))
            .await;
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.slot.close().await {
            debug!("Disconnect requested with no active session");
        }
    }

    fn phase(&self) -> SessionPhase {
        self.phase.read().clone()
    }
}

/// Drive one event-bus session until it closes, fails, or is cancelled.
async fn run_session(
    url: String,
    mut machine: EventBusMachine,
    reporter: Reporter,
    cancel: CancellationToken,
) {
    machine.step(EventBusInput::Dial);
    reporter.phase(machine.phase().clone().into()).await;
    info!("Connecting to {}", url);

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            machine.step(EventBusInput::UserClose);
            reporter.phase(machine.phase().clone().into()).await;
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!("Gateway connect failed: {}", e);
            machine.step(EventBusInput::TransportError(e.to_string()));
            reporter.phase(machine.phase().clone().into()).await;
            return;
        }
    };

    let (mut write, mut read) = ws.split();

    // Any inbound frame resets the deadline; the window grows to the
    // server's ping interval + timeout once the handshake arrives.
    let mut liveness = HANDSHAKE_TIMEOUT;
    let deadline = tokio::time::sleep(liveness);
    tokio::pin!(deadline);

    while !machine.phase().is_terminal() {
        let input = tokio::select! {
            _ = cancel.cancelled() => EventBusInput::UserClose,
            () = &mut deadline => EventBusInput::TransportError("ping timeout".to_string()),
            msg = read.next() => {
                deadline.as_mut().reset(tokio::time::Instant::now() + liveness);
                match msg {
                    Some(Ok(Message::Text(text))) => match socketio::decode(text.as_str()) {
                        Ok(Packet::Open(info)) => {
                            debug!("Engine.IO session {}", info.sid);
                            liveness = info.liveness_window();
                            deadline.as_mut().reset(tokio::time::Instant::now() + liveness);
                            if let Err(e) = write.send(Message::Text(socketio::encode_connect().into())).await {
                                EventBusInput::TransportError(e.to_string())
                            } else {
                                continue;
                            }
                        }
                        Ok(Packet::Ping) => {
                            if let Err(e) = write.send(Message::Text(socketio::encode_pong().into())).await {
                                EventBusInput::TransportError(e.to_string())
                            } else {
                                continue;
                            }
                        }
                        Ok(Packet::Connect(_)) => EventBusInput::TransportConnected,
                        Ok(Packet::ConnectError(data)) => EventBusInput::ConnectError(connect_error_reason(&data)),
                        Ok(Packet::Disconnect) | Ok(Packet::Close) => {
                            EventBusInput::Disconnected("Server disconnected".to_string())
                        }
                        Ok(Packet::Event { name, data }) => EventBusInput::Event { name, data },
                        Ok(Packet::Pong) | Ok(Packet::Other) => continue,
                        Err(e) => {
                            warn!("Undecodable frame: {}", e);
                            reporter.notice(format!("Processing error: {}", e)).await;
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => EventBusInput::Disconnected(
                        frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "Server disconnected".to_string()),
                    ),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => EventBusInput::TransportError(e.to_string()),
                    None => EventBusInput::Disconnected("Transport closed".to_string()),
                }
            }
        };

        for effect in machine.step(input) {
            match effect {
                EventBusEffect::Emit { name, data } => {
                    debug!("Emitting '{}'", name);
                    let frame = socketio::encode_event(name, &data);
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        warn!("Failed to emit '{}': {}", name, e);
                    }
                }
                EventBusEffect::Deliver(text) => {
                    debug!("Inbound print_message: {} bytes", text.len());
                    reporter.payload(text).await;
                }
                EventBusEffect::Notice(text) => reporter.notice(text).await,
                EventBusEffect::CloseTransport => {
                    let close = async {
                        write.send(Message::Text(socketio::encode_disconnect().into())).await?;
                        write.send(Message::Close(None)).await
                    };
                    match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
                        Ok(Ok(())) => debug!("Transport closed by client"),
                        Ok(Err(e)) => debug!("Transport close failed: {}", e),
                        Err(_) => debug!("Transport close timed out"),
                    }
                }
            }
        }
        reporter.phase(machine.phase().clone().into()).await;
    }

    info!("Gateway session ended: {}", SessionPhase::from(machine.phase().clone()));
}

/// Pull a human-readable reason out of a connect error packet.
fn connect_error_reason(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .or_else(|| data.as_str())
        .unwrap_or("Connection refused by server")
        .to_string()
}
