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

//! Print dispatch.
//!
//! Routes inbound payloads and manual prints to the selected printer.
//! Printing always happens on a spawned task so callers never wait on
//! Bluetooth I/O unless they ask to.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bluetooth::{PrintSink, SerialConnector};
use crate::state::{AppState, PaperWidth, Status};

/// Status shown when a job arrives with no printer selected.
pub const NO_PRINTER_SELECTED: &str = "Data received but no printer selected!";

/// One print job. Lives only for the duration of a dispatch.
#[derive(Debug, Clone)]
struct PrintJob {
    text: String,
    paper_width: PaperWidth,
}

/// Dispatches print jobs to the selected printer.
pub struct Dispatcher<C> {
    state: Arc<AppState>,
    sink: Arc<PrintSink<C>>,
}

impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<C: SerialConnector + 'static> Dispatcher<C> {
    /// Create a new dispatcher.
    pub fn new(state: Arc<AppState>, sink: Arc<PrintSink<C>>) -> Self {
        Self { state, sink }
    }

    /// Print a payload received from the gateway.
    ///
    /// Returns the print task, or `None` when no printer is selected and
    /// the payload was dropped.
    pub fn handle_payload(&self, text: String) -> Option<JoinHandle<bool>> {
        info!("Inbound payload: {} chars", text.chars().count());
        self.state
            .set_status(Status::neutral(format!("Incoming message: {}", text)));

        let Some(device) = self.state.get_selected_device() else {
            warn!("Dropping payload: no printer selected");
            self.state.set_status(Status::error(NO_PRINTER_SELECTED));
            return None;
        };

        let job = PrintJob {
            text,
            paper_width: self.state.get_paper_width(),
        };
        let state = self.state.clone();
        let sink = self.sink.clone();

        Some(tokio::spawn(async move {
            let success = sink.print(&device, &job.text).await;
            state.set_status(if success {
                Status::success(format!("Auto print succeeded ({})", job.paper_width))
            } else {
                Status::error("Print failed")
            });
            success
        }))
    }

    /// Print text typed by the operator and wait for the result.
    pub async fn print_manual(&self, text: &str) -> bool {
        let Some(device) = self.state.get_selected_device() else {
            self.state.set_status(Status::error("No printer selected"));
            return false;
        };

        let width = self.state.get_paper_width();
        self.state
            .set_status(Status::neutral(format!("Printing ({})...", width)));

        let sink = self.sink.clone();
        let text = text.to_string();
        let success = match tokio::spawn(async move { sink.print(&device, &text).await }).await {
            Ok(success) => success,
            Err(e) => {
                error!("Print task failed: {}", e);
                false
            }
        };

        self.state.set_status(if success {
            Status::success("Done")
        } else {
            Status::error("Print failed")
        });
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::protocol::job_bytes;
    use crate::bluetooth::testing::{printer, FakeConnector};
    use crate::state::StatusTone;
    use std::sync::atomic::Ordering;

    fn setup(connector: FakeConnector) -> (Arc<AppState>, Dispatcher<FakeConnector>) {
        let state = AppState::new();
        let sink = Arc::new(PrintSink::new(connector));
        (state.clone(), Dispatcher::new(state, sink))
    }

    #[tokio::test]
    async fn test_payload_without_printer_is_dropped() {
        let (state, dispatcher) = setup(FakeConnector::new());
        let recorder = dispatcher.sink.connector().recorder.clone();

        assert!(dispatcher.handle_payload("Receipt".into()).is_none());

        assert_eq!(recorder.opens.load(Ordering::SeqCst), 0);
        let status = state.get_status();
        assert_eq!(status.message, NO_PRINTER_SELECTED);
        assert_eq!(status.tone, StatusTone::Error);
    }

    #[tokio::test]
    async fn test_payload_prints_on_selected_device() {
        let (state, dispatcher) = setup(FakeConnector::new());
        let recorder = dispatcher.sink.connector().recorder.clone();
        state.set_paired_devices(vec![printer()]);
        state.select_device("0");
        state.set_paper_width(PaperWidth::Mm80);

        let task = dispatcher.handle_payload("Receipt".into()).unwrap();
        assert!(task.await.unwrap());

        assert_eq!(*recorder.bytes.lock(), job_bytes("Receipt"));
        assert_eq!(
            state.get_status(),
            Status::success("Auto print succeeded (80mm)")
        );
    }

    #[tokio::test]
    async fn test_failed_print_reports_failure() {
        let connector = FakeConnector::new();
        connector.fail_open.store(true, Ordering::SeqCst);
        let (state, dispatcher) = setup(connector);
        state.set_paired_devices(vec![printer()]);
        state.select_device("0");

        let task = dispatcher.handle_payload("Receipt".into()).unwrap();
        assert!(!task.await.unwrap());
        assert_eq!(state.get_status(), Status::error("Print failed"));
    }

    #[tokio::test]
    async fn test_manual_print() {
        let (state, dispatcher) = setup(FakeConnector::new());
        assert!(!dispatcher.print_manual("Hello Printer!").await);
        assert_eq!(state.get_status().tone, StatusTone::Error);

        state.set_paired_devices(vec![printer()]);
        state.select_device("0");
        assert!(dispatcher.print_manual("Hello Printer!").await);
        assert_eq!(state.get_status(), Status::success("Done"));
        assert_eq!(
            *dispatcher.sink.connector().recorder.bytes.lock(),
            job_bytes("Hello Printer!")
        );
    }

    #[tokio::test]
    async fn test_unauthorized_manual_print_fails() {
        let connector = FakeConnector::new();
        connector.authorized.store(false, Ordering::SeqCst);
        let (state, dispatcher) = setup(connector);
        state.set_paired_devices(vec![printer()]);
        state.select_device("0");

        assert!(!dispatcher.print_manual("x").await);
        assert_eq!(dispatcher.sink.connector().recorder.opens.load(Ordering::SeqCst), 0);
        assert_eq!(state.get_status(), Status::error("Print failed"));
    }
}
