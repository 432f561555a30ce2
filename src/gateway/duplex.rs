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

//! Duplex WebSocket gateway.
//!
//! The challenge code travels as an `id` query parameter; the session is
//! considered authenticated as soon as the socket opens, and every text
//! frame is a complete print job.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{Reporter, SessionSlot};
use super::{validate, GatewayClient, GatewayError, GatewayEvent, Protocol, SessionPhase};

/// Close reason sent when the user disconnects.
const USER_CLOSE_REASON: &str = "User disconnected";

/// How long to wait for the close frame to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Build the connection target: `base?id=code`, or `base&id=code` when
/// `base` already carries a query.
pub fn target_url(base: &str, credential: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}id={}", base, separator, credential)
}

/// Session phase of the duplex protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DuplexPhase {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed(String),
    Failed(String),
}

impl DuplexPhase {
    fn is_terminal(&self) -> bool {
        matches!(self, DuplexPhase::Closed(_) | DuplexPhase::Failed(_))
    }
}

impl From<DuplexPhase> for SessionPhase {
    fn from(phase: DuplexPhase) -> Self {
        match phase {
            DuplexPhase::Idle => SessionPhase::Idle,
            DuplexPhase::Connecting => SessionPhase::Connecting,
            DuplexPhase::Open => SessionPhase::Ready,
            DuplexPhase::Closed(reason) => SessionPhase::Closed(reason),
            DuplexPhase::Failed(reason) => SessionPhase::Failed(reason),
        }
    }
}

/// Inputs to the duplex state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplexInput {
    /// User asked to connect.
    Dial,
    /// Transport handshake completed.
    Opened,
    /// A text frame arrived.
    Text(String),
    /// Server sent a closing frame.
    ServerClosing { reason: String },
    /// User asked to disconnect.
    UserClose,
    /// Transport failed.
    TransportError(String),
}

/// Side effects requested by the duplex state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplexEffect {
    /// Hand a print payload to the dispatcher.
    Deliver(String),
    /// Close gracefully with the given code and reason.
    Close { code: u16, reason: String },
}

/// Duplex protocol state machine. Holds no I/O.
#[derive(Debug, Default)]
pub struct DuplexMachine {
    phase: DuplexPhase,
}

impl DuplexMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &DuplexPhase {
        &self.phase
    }

    /// Apply one input and return the effects to perform.
    pub fn step(&mut self, input: DuplexInput) -> Vec<DuplexEffect> {
        use DuplexInput::*;
        use DuplexPhase::*;

        let (next, effects) = match (&self.phase, input) {
            (Idle | Closed(_) | Failed(_), Dial) => (Connecting, vec![]),
            (Connecting, Opened) => (Open, vec![]),
            (Open, Text(text)) => (Open, vec![DuplexEffect::Deliver(text)]),
            (Connecting | Open, ServerClosing { reason }) => (Closed(reason), vec![]),
            (Connecting | Open, UserClose) => (
                Closed(USER_CLOSE_REASON.to_string()),
                vec![DuplexEffect::Close {
                    code: 1000,
                    reason: USER_CLOSE_REASON.to_string(),
                }],
            ),
            (Connecting | Open, TransportError(reason)) => (Failed(reason), vec![]),
            (phase, input) => {
                debug!("Ignoring {:?} in phase {:?}", input, phase);
                (phase.clone(), vec![])
            }
        };

        self.phase = next;
        effects
    }
}

/// Gateway client for the duplex WebSocket protocol.
pub struct DuplexClient {
    events: mpsc::Sender<GatewayEvent>,
    phase: Arc<RwLock<SessionPhase>>,
    slot: SessionSlot,
}

impl DuplexClient {
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
impl GatewayClient for DuplexClient {
    fn protocol(&self) -> Protocol {
        Protocol::Duplex
    }

    async fn connect(&self, address: &str, credential: &str) -> Result<(), GatewayError> {
        validate(address, credential)?;

        let target = target_url(address.trim(), credential.trim());
        let reporter = Reporter::new(self.events.clone(), self.phase.clone());
        self.slot
            .replace(move |cancel| tokio::spawn(run_session(target, reporter, cancel)))
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

/// Drive one duplex session until it closes, fails, or is cancelled.
async fn run_session(target: String, reporter: Reporter, cancel: CancellationToken) {
    let mut machine = DuplexMachine::new();
    machine.step(DuplexInput::Dial);
    reporter.phase(machine.phase().clone().into()).await;
    info!("Connecting to {}", target);

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            machine.step(DuplexInput::UserClose);
            reporter.phase(machine.phase().clone().into()).await;
            return;
        }
        result = tokio_tungstenite::connect_async(target.as_str()) => result,
    };

    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!("Gateway connect failed: {}", e);
            machine.step(DuplexInput::TransportError(e.to_string()));
            reporter.phase(machine.phase().clone().into()).await;
            return;
        }
    };

    machine.step(DuplexInput::Opened);
    reporter.phase(machine.phase().clone().into()).await;
    info!("Gateway socket open");

    let (mut write, mut read) = ws.split();

    while !machine.phase().is_terminal() {
        let input = tokio::select! {
            _ = cancel.cancelled() => DuplexInput::UserClose,
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => DuplexInput::Text(text.as_str().to_owned()),
                Some(Ok(Message::Close(frame))) => DuplexInput::ServerClosing {
                    reason: frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default(),
                },
                Some(Ok(_)) => continue,
                Some(Err(e)) => DuplexInput::TransportError(e.to_string()),
                None => DuplexInput::TransportError("connection reset by server".to_string()),
            },
        };

        for effect in machine.step(input) {
            match effect {
                DuplexEffect::Deliver(text) => {
                    debug!("Inbound frame: {} bytes", text.len());
                    reporter.payload(text).await;
                }
                DuplexEffect::Close { code, reason } => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    match tokio::time::timeout(CLOSE_TIMEOUT, write.send(Message::Close(Some(frame)))).await {
                        Ok(Ok(())) => debug!("Close frame sent"),
                        Ok(Err(e)) => debug!("Close frame not sent: {}", e),
                        Err(_) => debug!("Close frame timed out"),
                    }
                }
            }
        }
        reporter.phase(machine.phase().clone().into()).await;
    }

    info!("Gateway session ended: {}", SessionPhase::from(machine.phase().clone()));
}
