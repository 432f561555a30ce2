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

//! Application state management.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

use crate::bluetooth::PairedDevice;
use crate::gateway::SessionPhase;

/// How a status message should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Neutral,
    Success,
    Error,
}

/// The single human-readable status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub tone: StatusTone,
    pub message: String,
}

impl Status {
    pub fn neutral(message: impl Into<String>) -> Self {
        Self {
            tone: StatusTone::Neutral,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            tone: StatusTone::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            tone: StatusTone::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Receipt paper width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaperWidth {
    #[default]
    #[serde(rename = "58mm")]
    Mm58,
    #[serde(rename = "80mm")]
    Mm80,
}

impl PaperWidth {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperWidth::Mm58 => "58mm",
            PaperWidth::Mm80 => "80mm",
        }
    }
}

impl fmt::Display for PaperWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaperWidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().trim_end_matches("mm") {
            "58" => Ok(PaperWidth::Mm58),
            "80" => Ok(PaperWidth::Mm80),
            other => Err(format!("unsupported paper width '{}'", other)),
        }
    }
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Current status line; subscribers are woken on every change.
    status: watch::Sender<Status>,

    /// Phase of the gateway session.
    phase: RwLock<SessionPhase>,

    /// Challenge code of the most recent connect.
    challenge_code: RwLock<String>,

    /// Paired devices as last enumerated.
    paired_devices: RwLock<Vec<PairedDevice>>,

    /// Printer that receives jobs.
    selected_device: RwLock<Option<PairedDevice>>,

    paper_width: RwLock<PaperWidth>,
}

impl Default for AppState {
    fn default() -> Self {
        let (status, _) = watch::channel(Status::neutral("Ready"));
        Self {
            status,
            phase: RwLock::new(SessionPhase::Idle),
            challenge_code: RwLock::new(String::new()),
            paired_devices: RwLock::new(Vec::new()),
            selected_device: RwLock::new(None),
            paper_width: RwLock::new(PaperWidth::default()),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, status: Status) {
        self.status.send_replace(status);
    }

    pub fn get_status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        *self.phase.write() = phase;
    }

    pub fn get_phase(&self) -> SessionPhase {
        self.phase.read().clone()
    }

    pub fn set_challenge_code(&self, code: impl Into<String>) {
        *self.challenge_code.write() = code.into();
    }

    pub fn get_challenge_code(&self) -> String {
        self.challenge_code.read().clone()
    }

    /// Replace the device list. The selection is left untouched.
    pub fn set_paired_devices(&self, devices: Vec<PairedDevice>) {
        *self.paired_devices.write() = devices;
    }

    pub fn get_paired_devices(&self) -> Vec<PairedDevice> {
        self.paired_devices.read().clone()
    }

    /// Select a device by list index or by address.
    pub fn select_device(&self, key: &str) -> Option<PairedDevice> {
        let key = key.trim();
        let device = {
            let devices = self.paired_devices.read();
            match key.parse::<usize>() {
                Ok(index) => devices.get(index).cloned(),
                Err(_) => devices
                    .iter()
                    .find(|d| d.address.to_string().eq_ignore_ascii_case(key))
                    .cloned(),
            }
        }?;
        *self.selected_device.write() = Some(device.clone());
        Some(device)
    }

    pub fn get_selected_device(&self) -> Option<PairedDevice> {
        self.selected_device.read().clone()
    }

    pub fn set_paper_width(&self, width: PaperWidth) {
        *self.paper_width.write() = width;
    }

    pub fn get_paper_width(&self) -> PaperWidth {
        *self.paper_width.read()
    }
}
