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

//! Outgoing RFCOMM connection to the robot.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::{Adapter, Device};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{LinkError, Result};
use super::manager::LinkEvent;
use super::session::SessionGuard;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Byte stream a connector can hand to the link manager.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxTransport = Box<dyn Transport>;

/// Two-step connection to a known device.
///
/// The link manager checks between steps that the attempt has not been
/// superseded, so implementations only perform the I/O.
pub trait Connector: Send + Sync + 'static {
    type Device: Send + 'static;
    type Stream: Transport;

    /// Find the bonded device to connect to.
    fn resolve(&self) -> impl Future<Output = Result<Self::Device>> + Send;

    /// Open the serial stream to a resolved device.
    fn open(&self, device: Self::Device) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Run one connection attempt for the guarded session and report the outcome.
///
/// Nothing is reported once the session has been superseded.
pub(crate) async fn run_attempt<C: Connector>(
    connector: Arc<C>,
    guard: SessionGuard,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let session = guard.session();
    debug!("Connector started, session {}", session);

    let outcome = match connector.resolve().await {
        Ok(device) if guard.is_current() => connector.open(device).await,
        Ok(_) => {
            debug!("Session {} superseded before connecting", session);
            return;
        }
        Err(e) => Err(e),
    };

    if !guard.is_current() {
        debug!("Dropping result of superseded session {}", session);
        return;
    }

    let event = match outcome {
        Ok(stream) => LinkEvent::Connected(session, Box::new(stream)),
        Err(e) => {
            warn!("Connection attempt {} failed: {}", session, e);
            LinkEvent::ConnectFailed(session, e)
        }
    };
    let _ = events.send(event);
}

/// Connector for a bonded device over BlueZ.
pub struct BluezConnector {
    device_name: String,
    service_uuid: Uuid,
}

/// Device resolved by [`BluezConnector`].
pub struct BluezDevice {
    session: bluer::Session,
    device: Device,
}

impl BluezConnector {
    pub fn new(device_name: impl Into<String>, service_uuid: Uuid) -> Self {
        Self {
            device_name: device_name.into(),
            service_uuid,
        }
    }

    async fn adapter(session: &bluer::Session) -> Result<Adapter> {
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }
        Ok(adapter)
    }

    /// Display name of a device, falling back to its alias.
    async fn display_name(device: &Device) -> Result<String> {
        match device.name().await? {
            Some(name) => Ok(name),
            None => Ok(device.alias().await?),
        }
    }
}

impl Connector for BluezConnector {
    type Device = BluezDevice;
    type Stream = BluezStream;

    async fn resolve(&self) -> Result<BluezDevice> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?;
        let adapter = Self::adapter(&session).await?;

        for addr in adapter.device_addresses().await? {
            let device = adapter.device(addr)?;
            if !device.is_paired().await? {
                continue;
            }

            let name = Self::display_name(&device).await?;
            debug!("Paired device: {} ({})", name, addr);
            if name == self.device_name {
                info!("Found robot '{}' at {}", name, addr);
                return Ok(BluezDevice { session, device });
            }
        }

        Err(LinkError::DeviceNotPaired {
            name: self.device_name.clone(),
        })
    }

    async fn open(&self, target: BluezDevice) -> Result<BluezStream> {
        let profile = Profile {
            uuid: self.service_uuid,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut profile = target.session.register_profile(profile).await?;
        debug!("RFCOMM client profile registered (UUID: {})", self.service_uuid);

        let (connected, request) = tokio::join!(
            target.device.connect_profile(&self.service_uuid),
            profile.next()
        );
        connected?;
        let request = request
            .ok_or_else(|| LinkError::ConnectFailed("profile closed before connecting".into()))?;
        let stream = request.accept()?;
        info!("RFCOMM stream open to {}", target.device.address());

        Ok(BluezStream {
            stream,
            _profile: Box::new(profile),
            _session: target.session,
        })
    }
}

/// RFCOMM stream kept together with the profile registration that produced it.
pub struct BluezStream {
    stream: Stream,
    _profile: Box<ProfileHandle>,
    _session: bluer::Session,
}

impl AsyncRead for BluezStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for BluezStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::session::{Input, LinkMachine, RetryPolicy, Session};
    use parking_lot::Mutex;

    struct Scripted {
        paired: bool,
    }

    impl Connector for Scripted {
        type Device = ();
        type Stream = tokio::io::DuplexStream;

        async fn resolve(&self) -> Result<()> {
            if self.paired {
                Ok(())
            } else {
                Err(LinkError::DeviceNotPaired {
                    name: "HC-06".into(),
                })
            }
        }

        async fn open(&self, _device: ()) -> Result<Self::Stream> {
            Ok(tokio::io::duplex(16).0)
        }
    }

    fn started_machine() -> Arc<Mutex<LinkMachine>> {
        let machine = Arc::new(Mutex::new(LinkMachine::new(RetryPolicy::default())));
        machine.lock().handle(Input::Start);
        machine
    }

    #[test]
    fn test_spp_uuid() {
        assert_eq!(
            SPP_UUID.to_string(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
    }

    #[tokio::test]
    async fn test_reports_connected() {
        let machine = started_machine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = SessionGuard::new(Session::from_id(0), machine);

        run_attempt(Arc::new(Scripted { paired: true }), guard, tx).await;
        assert!(matches!(rx.recv().await, Some(LinkEvent::Connected(s, _)) if s.id() == 0));
    }

    #[tokio::test]
    async fn test_reports_not_paired() {
        let machine = started_machine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = SessionGuard::new(Session::from_id(0), machine);

        run_attempt(Arc::new(Scripted { paired: false }), guard, tx).await;
        assert!(matches!(
            rx.recv().await,
            Some(LinkEvent::ConnectFailed(_, LinkError::DeviceNotPaired { .. }))
        ));
    }

    #[tokio::test]
    async fn test_superseded_attempt_is_silent() {
        let machine = started_machine();
        machine.lock().handle(Input::Stop);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = SessionGuard::new(Session::from_id(0), machine);

        run_attempt(Arc::new(Scripted { paired: true }), guard, tx).await;
        assert!(rx.try_recv().is_err());
    }
}
