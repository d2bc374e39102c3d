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

//! Outbound half of a connected link.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use super::connector::BoxTransport;
use super::error::{LinkError, Result};
use super::manager::LinkEvent;
use super::protocol::Command;
use super::session::Session;

/// Serialized, flush-per-message writer bound to one session.
pub struct OutboundWriter {
    session: Session,
    half: Mutex<Option<WriteHalf<BoxTransport>>>,
    closed: watch::Sender<bool>,
    reported: AtomicBool,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl OutboundWriter {
    pub(crate) fn new(
        session: Session,
        half: WriteHalf<BoxTransport>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            session,
            half: Mutex::new(Some(half)),
            closed: watch::Sender::new(false),
            reported: AtomicBool::new(false),
            events,
        }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    /// Write `text` and flush it before returning.
    ///
    /// A failure is also reported to the link manager, once per session.
    /// A send still pending when the writer is closed fails with `NotConnected`.
    pub async fn send(&self, text: &str) -> Result<()> {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => {
                debug!("Send on session {} cancelled by close", self.session);
                Err(LinkError::NotConnected)
            }
            result = self.write(text) => result,
        }
    }

    async fn write(&self, text: &str) -> Result<()> {
        let mut half = self.half.lock().await;
        let Some(stream) = half.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        let written = match stream.write_all(text.as_bytes()).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                debug!("Sent {} on session {}", text, self.session);
                Ok(())
            }
            Err(e) => {
                warn!("Write failed on session {}: {}", self.session, e);
                self.report(&e);
                Err(LinkError::TransportIo(e))
            }
        }
    }

    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.send(&command.encode()).await
    }

    /// Send commands in order, stopping at the first failure.
    pub async fn send_all(&self, commands: &[Command]) -> Result<()> {
        for command in commands {
            self.send_command(*command).await?;
        }
        Ok(())
    }

    /// Fail pending and later sends with `NotConnected`.
    pub(crate) fn cancel(&self) {
        self.closed.send_replace(true);
    }

    /// Cancel sends, then shut down and release the write half.
    pub(crate) async fn close(&self) {
        self.cancel();
        if let Some(mut stream) = self.half.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Write half shutdown on session {}: {}", self.session, e);
            }
        }
    }

    fn report(&self, error: &io::Error) {
        if self.reported.swap(true, Ordering::SeqCst) {
            return;
        }
        let error = io::Error::new(error.kind(), error.to_string());
        let _ = self
            .events
            .send(LinkEvent::IoFailure(self.session, LinkError::TransportIo(error)));
    }
}
