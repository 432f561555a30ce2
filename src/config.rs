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

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gateway::Protocol;
use crate::state::PaperWidth;

/// Environment variable pointing at an alternate config file.
pub const CONFIG_ENV: &str = "BTPRINT_CONFIG";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway server settings.
    pub gateway: GatewayConfig,

    /// Printer settings.
    pub printer: PrinterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Wire protocol: "duplex" or "event_bus".
    pub protocol: Protocol,

    /// Server address, e.g. `ws://192.168.1.5:8080`.
    pub server_url: String,

    /// Challenge code identifying this printer to the server.
    pub challenge_code: String,

    /// Connect on startup when both fields are set.
    pub auto_connect: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Duplex,
            server_url: "ws://192.168.1.5:8080".to_string(),
            challenge_code: String::new(),
            auto_connect: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    /// Address of the printer to select on startup.
    pub device: String,

    /// Receipt paper width.
    pub paper_width: PaperWidth,

    /// Seconds to wait for the RFCOMM channel to open. 0 disables the limit.
    pub connect_timeout_secs: u64,

    /// Dial this RFCOMM channel directly instead of resolving the SPP service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rfcomm_channel: Option<u8>,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            paper_width: PaperWidth::Mm58,
            connect_timeout_secs: 10,
            rfcomm_channel: None,
        }
    }
}

impl PrinterConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("btprint-gateway")
            .join("config.toml")
    }

    /// Config file location, honouring the override variable.
    pub fn path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path)
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Load from `path`, writing the defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.gateway.protocol, Protocol::Duplex);
        assert_eq!(config.gateway.server_url, "ws://192.168.1.5:8080");
        assert_eq!(config.printer.paper_width, PaperWidth::Mm58);
        assert_eq!(config.printer.connect_timeout(), Some(Duration::from_secs(10)));

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.gateway.server_url, config.gateway.server_url);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[gateway]
protocol = "event_bus"
challenge_code = "42"

[printer]
paper_width = "80mm"
connect_timeout_secs = 0
rfcomm_channel = 1
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.gateway.protocol, Protocol::EventBus);
        assert_eq!(config.gateway.challenge_code, "42");
        assert_eq!(config.gateway.server_url, "ws://192.168.1.5:8080");
        assert_eq!(config.printer.paper_width, PaperWidth::Mm80);
        assert_eq!(config.printer.connect_timeout(), None);
        assert_eq!(config.printer.rfcomm_channel, Some(1));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nprotocol = \"carrier-pigeon\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
