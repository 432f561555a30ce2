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

//! Operator console on stdin/stdout.
//!
//! Lines starting with `/` are commands; anything else is printed.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::{AppState, PaperWidth, StatusTone};

pub const HELP: &str = "\
Commands:
  /connect [url] [code]  connect to the print server
  /disconnect            close the server connection
  /devices               list paired printers
  /select <n|address>    choose the printer
  /width 58|80           set paper width
  /status                show current status
  /quit                  exit
Any other line is printed on the selected printer.";

/// Actions the operator can trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    Connect {
        url: Option<String>,
        code: Option<String>,
    },
    Disconnect,
    RefreshDevices,
    Select(String),
    SetWidth(PaperWidth),
    ShowStatus,
    Print(String),
    Help,
    Quit,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleAction>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(ConsoleAction::Print(line.to_string())));
    }

    let mut parts = line[1..].split_whitespace();
    let command = parts.next().unwrap_or_default().to_lowercase();
    let action = match command.as_str() {
        "connect" => ConsoleAction::Connect {
            url: parts.next().map(str::to_string),
            code: parts.next().map(str::to_string),
        },
        "disconnect" => ConsoleAction::Disconnect,
        "devices" => ConsoleAction::RefreshDevices,
        "select" => match parts.next() {
            Some(key) => ConsoleAction::Select(key.to_string()),
            None => return Err("usage: /select <n|address>".to_string()),
        },
        "width" => {
            let width = parts.next().ok_or("usage: /width 58|80")?;
            ConsoleAction::SetWidth(width.parse()?)
        }
        "status" => ConsoleAction::ShowStatus,
        "help" | "?" => ConsoleAction::Help,
        "quit" | "exit" => ConsoleAction::Quit,
        other => return Err(format!("unknown command '/{}', try /help", other)),
    };
    Ok(Some(action))
}

/// Read console actions from stdin.
pub fn run_console() -> mpsc::UnboundedReceiver<ConsoleAction> {
    let (action_tx, action_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(action)) => {
                        if action_tx.send(action).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                },
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("stdin read error: {}", e);
                    break;
                }
            }
        }
    });

    action_rx
}

/// Echo every status change to stdout.
pub fn spawn_status_printer(state: Arc<AppState>) {
    let mut status_rx = state.subscribe_status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            let marker = match status.tone {
                StatusTone::Neutral => ' ',
                StatusTone::Success => '+',
                StatusTone::Error => '!',
            };
            println!("[{}] Status: {}", marker, status.message);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_print() {
        assert_eq!(
            parse_line("Hello Printer!").unwrap(),
            Some(ConsoleAction::Print("Hello Printer!".into()))
        );
        assert_eq!(parse_line("   \n").unwrap(), None);
    }

    #[test]
    fn test_commands() {
        assert_eq!(
            parse_line("/connect ws://h:1/ 42").unwrap(),
            Some(ConsoleAction::Connect {
                url: Some("ws://h:1/".into()),
                code: Some("42".into()),
            })
        );
        assert_eq!(
            parse_line("/connect").unwrap(),
            Some(ConsoleAction::Connect { url: None, code: None })
        );
        assert_eq!(parse_line("/select 2").unwrap(), Some(ConsoleAction::Select("2".into())));
        assert_eq!(
            parse_line("/width 80").unwrap(),
            Some(ConsoleAction::SetWidth(PaperWidth::Mm80))
        );
        assert_eq!(parse_line("/QUIT").unwrap(), Some(ConsoleAction::Quit));
    }

    #[test]
    fn test_bad_commands() {
        assert!(parse_line("/select").is_err());
        assert!(parse_line("/width 76").is_err());
        assert!(parse_line("/frobnicate").is_err());
    }
}
