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

//! Single-session supervision shared by both gateway clients.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{GatewayEvent, SessionPhase};

struct ActiveSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Holds the one running session driver.
#[derive(Default)]
pub(crate) struct SessionSlot {
    current: Mutex<Option<ActiveSession>>,
}

impl SessionSlot {
    /// Stop any running session, then start a new one.
    pub(crate) async fn replace<F>(&self, start: F)
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            info!("Replacing active gateway session");
            Self::stop(old).await;
        }

        let cancel = CancellationToken::new();
        let task = start(cancel.clone());
        *current = Some(ActiveSession { cancel, task });
    }

    /// Stop the running session. Returns `false` if there was none.
    pub(crate) async fn close(&self) -> bool {
        let old = self.current.lock().await.take();
        match old {
            Some(old) => {
                Self::stop(old).await;
                true
            }
            None => false,
        }
    }

    async fn stop(session: ActiveSession) {
        session.cancel.cancel();
        if let Err(e) = session.task.await {
            debug!("Session task ended abnormally: {}", e);
        }
    }
}

/// Publishes phase changes and payloads for one session.
#[derive(Clone)]
pub(crate) struct Reporter {
    events: mpsc::Sender<GatewayEvent>,
    phase: Arc<RwLock<SessionPhase>>,
}

impl Reporter {
    pub(crate) fn new(events: mpsc::Sender<GatewayEvent>, phase: Arc<RwLock<SessionPhase>>) -> Self {
        Self { events, phase }
    }

    /// Record `phase`, emitting an event only when it differs from the last one.
    pub(crate) async fn phase(&self, phase: SessionPhase) {
        {
            let mut current = self.phase.write();
            if *current == phase {
                return;
            }
            *current = phase.clone();
        }
        debug!("Gateway phase: {}", phase);
        self.emit(GatewayEvent::PhaseChanged(phase)).await;
    }

    pub(crate) async fn payload(&self, text: String) {
        self.emit(GatewayEvent::PayloadReceived(text)).await;
    }

    pub(crate) async fn notice(&self, text: String) {
        self.emit(GatewayEvent::Notice(text)).await;
    }

    async fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event).await;
    }
}
