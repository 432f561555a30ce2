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

//! BtPrint Gateway

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use btprint_gateway::bluetooth::{PrintSink, RfcommConnector, SerialConnector};
use btprint_gateway::config::Config;
use btprint_gateway::console::{self, ConsoleAction};
use btprint_gateway::dispatch::Dispatcher;
use btprint_gateway::events::EventProcessor;
use btprint_gateway::gateway::{self, GatewayClient};
use btprint_gateway::state::{AppState, Status};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("btprint_gateway=info".parse()?),
        )
        .init();

    info!("Starting BtPrint Gateway v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded from {}", Config::path().display());

    let state = AppState::new();
    state.set_paper_width(config.printer.paper_width);

    // Initialize Bluetooth
    let connector = RfcommConnector::new(config.printer.rfcomm_channel).await?;
    let mut sink = PrintSink::new(connector);
    if let Some(timeout) = config.printer.connect_timeout() {
        sink = sink.with_connect_timeout(timeout);
    }
    let sink = Arc::new(sink);

    refresh_devices(&state, &sink).await;
    if !config.printer.device.is_empty() {
        select_device(&state, &config.printer.device);
    }

    // Gateway client and event processing
    let dispatcher = Dispatcher::new(state.clone(), sink.clone());
    let (event_tx, event_rx) = tokio::sync::mpsc::channel(32);
    let gateway = gateway::create_client(config.gateway.protocol, event_tx);
    info!("Gateway protocol: {}", gateway.protocol().as_str());

    let processor = EventProcessor::new(state.clone(), dispatcher.clone());
    tokio::spawn(processor.run(event_rx));

    console::spawn_status_printer(state.clone());
    let mut action_rx = console::run_console();
    println!("{}", console::HELP);

    let mut server_url = config.gateway.server_url.clone();
    let mut challenge_code = config.gateway.challenge_code.clone();
    if config.gateway.auto_connect {
        connect(&state, gateway.as_ref(), &server_url, &challenge_code).await;
    }

    info!("Ready.");

    loop {
        tokio::select! {
            Some(action) = action_rx.recv() => {
                match action {
                    ConsoleAction::Connect { url, code } => {
                        if let Some(url) = url {
                            server_url = url;
                        }
                        if let Some(code) = code {
                            challenge_code = code;
                        }
                        connect(&state, gateway.as_ref(), &server_url, &challenge_code).await;
                    }
                    ConsoleAction::Disconnect => {
                        gateway.disconnect().await;
                    }
                    ConsoleAction::RefreshDevices => {
                        refresh_devices(&state, &sink).await;
                        for (index, device) in state.get_paired_devices().iter().enumerate() {
                            println!("  {}: {} ({})", index, device.name, device.address);
                        }
                    }
                    ConsoleAction::Select(key) => select_device(&state, &key),
                    ConsoleAction::SetWidth(width) => {
                        state.set_paper_width(width);
                        info!("Paper width set to {}", width);
                    }
                    ConsoleAction::ShowStatus => {
                        let device = state
                            .get_selected_device()
                            .map(|d| d.name)
                            .unwrap_or_else(|| "none".to_string());
                        println!(
                            "Status: {}\nGateway: {}\nPrinter: {} ({})",
                            state.get_status(),
                            state.get_phase(),
                            device,
                            state.get_paper_width()
                        );
                    }
                    ConsoleAction::Print(text) => {
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            dispatcher.print_manual(&text).await;
                        });
                    }
                    ConsoleAction::Help => println!("{}", console::HELP),
                    ConsoleAction::Quit => {
                        info!("Quit requested");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    gateway.disconnect().await;
    info!("BtPrint Gateway stopped");
    Ok(())
}

async fn connect(state: &AppState, gateway: &dyn GatewayClient, url: &str, code: &str) {
    state.set_challenge_code(code.trim());
    if let Err(e) = gateway.connect(url, code).await {
        warn!("Connect rejected: {}", e);
        state.set_status(Status::error(e.to_string()));
    }
}

async fn refresh_devices(state: &AppState, sink: &PrintSink<RfcommConnector>) {
    match sink.connector().paired_devices().await {
        Ok(devices) => {
            info!("Found {} paired device(s)", devices.len());
            if devices.is_empty() && !sink.connector().is_authorized() {
                state.set_status(Status::error("Bluetooth is off"));
            }
            state.set_paired_devices(devices);
        }
        Err(e) => {
            warn!("Failed to list paired devices: {}", e);
            state.set_status(Status::error(format!("Error: {}", e)));
        }
    }
}

fn select_device(state: &AppState, key: &str) {
    match state.select_device(key) {
        Some(device) => {
            info!("Printer selected: {} ({})", device.name, device.address);
            state.set_status(Status::neutral(format!("Printer selected: {}", device.name)));
        }
        None => {
            warn!("No paired device matches '{}'", key);
            state.set_status(Status::error(format!("No paired device '{}'", key)));
        }
    }
}
