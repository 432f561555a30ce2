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

//! Event processing and message dispatch.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bluetooth::SerialConnector;
use crate::dispatch::Dispatcher;
use crate::gateway::{GatewayEvent, SessionPhase};
use crate::state::{AppState, Status};

/// Close reason used by the gateway clients for a user-initiated disconnect.
const USER_CLOSE_REASON: &str = "User disconnected";

/// Status line for a session phase.
pub fn phase_status(phase: &SessionPhase, challenge_code: &str) -> Status {
    match phase {
        SessionPhase::Idle => Status::neutral("Ready"),
        SessionPhase::Connecting => Status::neutral("Connecting..."),
        SessionPhase::Identifying => Status::neutral("Identifying printer..."),
        SessionPhase::Ready => Status::success(format!("Connected! ID: {}", challenge_code)),
        SessionPhase::Closed(reason) if reason == USER_CLOSE_REASON => {
            Status::neutral("Disconnected from server")
        }
        SessionPhase::Closed(reason) => Status::neutral(format!("Server closing: {}", reason)),
        SessionPhase::Failed(reason) => Status::error(format!("Connection Error: {}", reason)),
    }
}

/// Process events from the gateway client.
pub struct EventProcessor<C> {
    state: Arc<AppState>,
    dispatcher: Dispatcher<C>,
}

impl<C: SerialConnector + 'static> EventProcessor<C> {
    /// Create a new event processor.
    pub fn new(state: Arc<AppState>, dispatcher: Dispatcher<C>) -> Self {
        Self { state, dispatcher }
    }

    /// Process a single event. Returns the print task if one was started.
    pub fn process_event(&self, event: GatewayEvent) -> Option<JoinHandle<bool>> {
        match event {
            GatewayEvent::PhaseChanged(phase) => {
                info!("Gateway {}", phase);
                let status = phase_status(&phase, &self.state.get_challenge_code());
                self.state.set_phase(phase);
                self.state.set_status(status);
                None
            }
            GatewayEvent::PayloadReceived(text) => self.dispatcher.handle_payload(text),
            GatewayEvent::Notice(text) => {
                warn!("Gateway notice: {}", text);
                self.state.set_status(Status::error(text));
                None
            }
        }
    }

    /// Process events until the channel closes.
    pub async fn run(self, mut events: mpsc::Receiver<GatewayEvent>) {
        while let Some(event) = events.recv().await {
            // Print tasks report their own outcome through the status line.
            let _ = self.process_event(event);
        }
        debug!("Gateway event channel closed");
    }
}
