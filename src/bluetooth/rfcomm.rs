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

//! BlueZ RFCOMM connector.
//!
//! Enumerates paired devices and opens SPP channels to them. Pairing
//! itself is left to the host (bluetoothctl, desktop settings).

use anyhow::Result;
use async_trait::async_trait;
use bluer::rfcomm::{ConnectRequest, Profile, ProfileHandle, ReqError, Role, SocketAddr, Stream};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::SPP_UUID;
use super::sink::{PairedDevice, SerialConnector};

/// Hands each incoming connection request to whoever is waiting on that
/// device.
struct RequestRouter<R> {
    waiting: parking_lot::Mutex<HashMap<Address, oneshot::Sender<R>>>,
}

impl<R> Default for RequestRouter<R> {
    fn default() -> Self {
        Self {
            waiting: parking_lot::Mutex::new(HashMap::new()),
        }
    }
}

impl<R> RequestRouter<R> {
    /// Wait for the next request from `address`. Replaces an earlier waiter.
    fn wait_for(&self, address: Address) -> oneshot::Receiver<R> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(address, tx);
        rx
    }

    /// Deliver a request. Gives it back when nobody is waiting.
    fn route(&self, address: Address, request: R) -> Result<(), R> {
        let waiter = self.waiting.lock().remove(&address);
        match waiter {
            Some(tx) => tx.send(request),
            None => Err(request),
        }
    }

    fn forget(&self, address: Address) {
        self.waiting.lock().remove(&address);
    }

    /// Drop every waiter; their receivers see the channel closed.
    fn close(&self) {
        self.waiting.lock().clear();
    }
}

/// Run the profile connect and the request accept together. The first
/// error ends both.
async fn establish<T>(
    connect: impl Future<Output = io::Result<()>>,
    accept: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    let ((), link) = tokio::try_join!(connect, accept)?;
    Ok(link)
}

/// Opens RFCOMM channels through the default BlueZ adapter.
pub struct RfcommConnector {
    session: Session,
    adapter: Adapter,
    /// Fixed channel to dial instead of resolving the SPP service.
    channel: Option<u8>,
    authorized: AtomicBool,
    requests: Arc<RequestRouter<ConnectRequest>>,
    /// Task draining the registered SPP profile.
    profile: Mutex<Option<JoinHandle<()>>>,
}

impl RfcommConnector {
    /// Connect to BlueZ and pick the default adapter.
    pub async fn new(channel: Option<u8>) -> Result<Self> {
        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        let connector = Self {
            session,
            adapter,
            channel,
            authorized: AtomicBool::new(false),
            requests: Arc::new(RequestRouter::default()),
            profile: Mutex::new(None),
        };
        connector.refresh_authorization().await;
        Ok(connector)
    }

    /// Re-check whether the adapter can be used for outgoing connections.
    pub async fn refresh_authorization(&self) -> bool {
        let powered = match self.adapter.is_powered().await {
            Ok(powered) => powered,
            Err(e) => {
                warn!("Cannot query adapter power state: {}", e);
                false
            }
        };
        if !powered {
            warn!("Bluetooth adapter {} is off", self.adapter.name());
        }
        self.authorized.store(powered, Ordering::SeqCst);
        powered
    }

    /// Get paired devices. Empty when the adapter is off.
    pub async fn paired_devices(&self) -> Result<Vec<PairedDevice>> {
        if !self.refresh_authorization().await {
            return Ok(Vec::new());
        }

        let mut devices = Vec::new();
        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
                devices.push(PairedDevice::new(addr, name));
            }
        }
        devices.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(devices)
    }

    async fn open_channel(&self, address: Address, channel: u8) -> io::Result<Stream> {
        debug!("Dialing {} on RFCOMM channel {}", address, channel);
        Stream::connect(SocketAddr::new(address, channel)).await
    }

    /// Register the SPP client profile once, and again if BlueZ dropped it.
    async fn ensure_profile(&self) -> io::Result<()> {
        let mut profile = self.profile.lock().await;
        if profile.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }

        let spp = Profile {
            uuid: SPP_UUID,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let handle = self
            .session
            .register_profile(spp)
            .await
            .map_err(io::Error::other)?;
        info!("SPP client profile registered (UUID: {})", SPP_UUID);

        *profile = Some(tokio::spawn(route_requests(handle, self.requests.clone())));
        Ok(())
    }

    /// Open by SPP service UUID through a BlueZ client profile.
    async fn open_service(&self, address: Address) -> io::Result<Stream> {
        self.ensure_profile().await?;

        let device = self.adapter.device(address).map_err(io::Error::other)?;
        debug!("Connecting SPP service on {}", address);

        let request = self.requests.wait_for(address);
        let connect = async {
            device
                .connect_profile(&SPP_UUID)
                .await
                .map_err(io::Error::other)
        };
        let accept = async {
            let request = request.await.map_err(|_| {
                io::Error::new(io::ErrorKind::ConnectionAborted, "SPP profile unregistered")
            })?;
            request.accept().map_err(io::Error::other)
        };

        let result = establish(connect, accept).await;
        self.requests.forget(address);
        result
    }
}

/// Pass each SPP connection request to the open call waiting on its device.
async fn route_requests(mut handle: ProfileHandle, requests: Arc<RequestRouter<ConnectRequest>>) {
    while let Some(request) = handle.next().await {
        let address = request.device();
        if let Err(request) = requests.route(address, request) {
            debug!("Rejecting unexpected SPP connection from {}", address);
            request.reject(ReqError::Rejected);
        }
    }
    warn!("SPP profile handle closed");
    requests.close();
}

#[async_trait]
impl SerialConnector for RfcommConnector {
    type Link = Stream;

    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn open(&self, device: &PairedDevice) -> io::Result<Stream> {
        match self.channel {
            Some(channel) => self.open_channel(device.address, channel).await,
            None => self.open_service(device.address).await,
        }
    }
}
