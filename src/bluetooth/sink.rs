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

//! Serial print sink.
//!
//! Opens a serial channel to a paired printer, writes one job, and
//! always closes the channel again before returning.

use async_trait::async_trait;
use bluer::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use super::protocol::{text_line, CUT_FULL, FEED_BEFORE_CUT};

/// A paired Bluetooth device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    pub address: Address,
    pub name: String,
}

impl PairedDevice {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
        }
    }
}

/// Opens serial channels to paired peripherals.
#[async_trait]
pub trait SerialConnector: Send + Sync {
    /// Writable channel to one peripheral. Dropping it releases the channel.
    type Link: AsyncWrite + Unpin + Send;

    /// Whether the process currently holds peripheral-connect authorization.
    fn is_authorized(&self) -> bool;

    /// Open a channel to the device.
    async fn open(&self, device: &PairedDevice) -> io::Result<Self::Link>;
}

/// Why a print failed. Only logged; callers see a plain success flag.
#[derive(Debug, thiserror::Error)]
pub enum PrintError {
    #[error("Bluetooth connect permission not granted")]
    Unauthorized,

    #[error("timed out opening serial channel")]
    Timeout,

    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Writes print jobs to paired printers.
pub struct PrintSink<C> {
    connector: C,
    connect_timeout: Option<Duration>,
    /// One lock per peripheral so concurrent jobs for the same printer
    /// run one after another instead of racing for the channel.
    device_locks: Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C: SerialConnector> PrintSink<C> {
    /// Create a new sink over the given connector.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            connect_timeout: None,
            device_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Bound the time spent opening the channel.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Get the underlying connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Print `text` on `device`. Returns `true` on success.
    pub async fn print(&self, device: &PairedDevice, text: &str) -> bool {
        match self.try_print(device, text).await {
            Ok(()) => {
                info!("Printed {} bytes on {}", text.len(), device.address);
                true
            }
            Err(e) => {
                error!("Print on {} failed: {}", device.address, e);
                false
            }
        }
    }

    /// Print `text` on `device`, keeping the failure cause.
    pub async fn try_print(&self, device: &PairedDevice, text: &str) -> Result<(), PrintError> {
        if !self.connector.is_authorized() {
            return Err(PrintError::Unauthorized);
        }

        let lock = self.device_lock(device.address);
        let _guard = lock.lock().await;

        let mut link = self.open(device).await?;
        debug!("Serial channel open to {}", device.address);

        let written = write_job(&mut link, text).await;

        // A failed close is only logged; the outcome is that of the write and flush.
        if let Err(e) = link.shutdown().await {
            warn!("Failed to close serial channel to {}: {}", device.address, e);
        }
        drop(link);
        debug!("Serial channel to {} closed", device.address);

        written.map_err(PrintError::from)
    }

    async fn open(&self, device: &PairedDevice) -> Result<C::Link, PrintError> {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, self.connector.open(device))
                .await
                .map_err(|_| PrintError::Timeout)?
                .map_err(PrintError::from),
            None => Ok(self.connector.open(device).await?),
        }
    }

    fn device_lock(&self, address: Address) -> Arc<tokio::sync::Mutex<()>> {
        self.device_locks
            .lock()
            .entry(address)
            .or_default()
            .clone()
    }
}

/// Write text, spacing and cut command in order, then flush.
async fn write_job<W: AsyncWrite + Unpin>(link: &mut W, text: &str) -> io::Result<()> {
    link.write_all(&text_line(text)).await?;
    link.write_all(&FEED_BEFORE_CUT).await?;
    link.write_all(&CUT_FULL).await?;
    link.flush().await
}
