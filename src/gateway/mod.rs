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

//! Gateway client module.
//!
//! Keeps one logical connection to the remote print-dispatch server and
//! turns inbound print requests into [`GatewayEvent`]s. Two wire
//! protocols are supported behind the [`GatewayClient`] trait.

mod duplex;
mod event_bus;
mod session;
pub mod socketio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use duplex::{target_url, DuplexClient, DuplexEffect, DuplexInput, DuplexMachine, DuplexPhase};
pub use event_bus::{
    EventBusClient, EventBusEffect, EventBusInput, EventBusMachine, EventBusPhase,
    EVENT_IDENTIFY, EVENT_PRINTER_CONNECTED, EVENT_PRINT_MESSAGE,
};

/// Wire protocol used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Plain WebSocket, credential in the query string, text frames are jobs.
    Duplex,
    /// Socket.IO events with an explicit `identify_printer` handshake.
    EventBus,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Duplex => "duplex",
            Protocol::EventBus => "event_bus",
        }
    }
}

/// Protocol-independent session phase, as seen by the rest of the app.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    /// Transport is up, waiting for the server to accept the printer.
    Identifying,
    /// Jobs are being accepted.
    Ready,
    Closed(String),
    Failed(String),
}

impl SessionPhase {
    /// Whether a session in this phase is still alive.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionPhase::Connecting | SessionPhase::Identifying | SessionPhase::Ready
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Connecting => write!(f, "connecting"),
            SessionPhase::Identifying => write!(f, "identifying"),
            SessionPhase::Ready => write!(f, "ready"),
            SessionPhase::Closed(reason) => write!(f, "closed ({})", reason),
            SessionPhase::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Events emitted by a gateway client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// The session moved to a new phase.
    PhaseChanged(SessionPhase),
    /// A print request arrived.
    PayloadReceived(String),
    /// Something went wrong that does not affect the session phase.
    Notice(String),
}

/// Rejected connect request. No network attempt was made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Enter the server URL")]
    MissingAddress,

    #[error("Enter the challenge code")]
    MissingCredential,
}

/// Check connect preconditions: both fields must be non-blank.
pub fn validate(address: &str, credential: &str) -> Result<(), GatewayError> {
    if address.trim().is_empty() {
        return Err(GatewayError::MissingAddress);
    }
    if credential.trim().is_empty() {
        return Err(GatewayError::MissingCredential);
    }
    Ok(())
}

/// A connection to the print-dispatch server.
///
/// At most one session is active per client: `connect` tears down the
/// previous session and waits for it to stop before dialing again.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Which wire protocol this client speaks.
    fn protocol(&self) -> Protocol;

    /// Start a new session. Progress is reported through events.
    async fn connect(&self, address: &str, credential: &str) -> Result<(), GatewayError>;

    /// Close the current session, if any.
    async fn disconnect(&self);

    /// Current session phase.
    fn phase(&self) -> SessionPhase;
}

/// Create the client for the configured protocol.
pub fn create_client(
    protocol: Protocol,
    events: mpsc::Sender<GatewayEvent>,
) -> Arc<dyn GatewayClient> {
    match protocol {
        Protocol::Duplex => Arc::new(DuplexClient::new(events)),
        Protocol::EventBus => Arc::new(EventBusClient::new(events)),
    }
}
