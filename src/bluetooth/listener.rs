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

//! Inbound read loop for a connected link.

use std::sync::Arc;

use tokio::io::ReadHalf;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::connector::BoxTransport;
use super::error::LinkError;
use super::manager::LinkEvent;
use super::protocol::{decode_one, Command, InboundFrame};
use super::session::Session;
use super::writer::OutboundWriter;
use crate::consumer::LinkConsumer;

/// Reads frames for one session and dispatches them to the consumer.
pub(crate) struct Listener<K> {
    session: Session,
    reader: ReadHalf<BoxTransport>,
    writer: Arc<OutboundWriter>,
    consumer: Arc<K>,
    events: mpsc::UnboundedSender<LinkEvent>,
    stop: oneshot::Receiver<()>,
}

impl<K: LinkConsumer> Listener<K> {
    pub(crate) fn new(
        session: Session,
        reader: ReadHalf<BoxTransport>,
        writer: Arc<OutboundWriter>,
        consumer: Arc<K>,
        events: mpsc::UnboundedSender<LinkEvent>,
        stop: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            session,
            reader,
            writer,
            consumer,
            events,
            stop,
        }
    }

    /// Run until the transport fails or a stop is signalled.
    ///
    /// A transport failure is reported exactly once; a stop is not reported.
    /// Replies are written under the same stop signal, so a stop never waits
    /// on a blocked write.
    pub(crate) async fn run(mut self) {
        info!("Listener started, session {}", self.session);

        loop {
            let frame = tokio::select! {
                biased;
                _ = &mut self.stop => {
                    debug!("Listener for session {} stopped", self.session);
                    return;
                }
                frame = decode_one(&mut self.reader) => frame,
            };

            let commands = match frame {
                Ok(frame) => self.dispatch(frame),
                Err(e) => {
                    // A close racing the read is a stop, not a failure.
                    if !matches!(self.stop.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                        debug!("Listener for session {} stopped during read", self.session);
                        return;
                    }
                    warn!("Input stream lost on session {}: {}", self.session, e);
                    let _ = self
                        .events
                        .send(LinkEvent::IoFailure(self.session, LinkError::TransportIo(e)));
                    return;
                }
            };

            if commands.is_empty() {
                continue;
            }
            let writer = self.writer.clone();
            tokio::select! {
                biased;
                _ = &mut self.stop => {
                    debug!("Listener for session {} stopped while replying", self.session);
                    return;
                }
                sent = writer.send_all(&commands) => {
                    if let Err(e) = sent {
                        warn!("Reply to robot failed on session {}: {}", self.session, e);
                    }
                }
            }
        }
    }

    /// Hand a frame to the consumer and collect the commands to send back.
    fn dispatch(&self, frame: InboundFrame) -> Vec<Command> {
        debug!("Robot frame on session {}: {:?}", self.session, frame);

        match frame {
            InboundFrame::Location(location) => self.consumer.on_location(self.session, location),
            InboundFrame::Warning(remaining) => self.consumer.on_warning(self.session, remaining),
            InboundFrame::Done => self.consumer.on_done(self.session),
            InboundFrame::Movement(_) | InboundFrame::StateChange(_) | InboundFrame::End => {
                Vec::new()
            }
            InboundFrame::Malformed { tag, payload } => {
                warn!(
                    "Malformed '{}' payload from robot: {:?}",
                    tag.as_byte() as char,
                    String::from_utf8_lossy(&payload)
                );
                Vec::new()
            }
            InboundFrame::Unrecognized(byte) => {
                let error = LinkError::UnrecognizedFrame(byte);
                warn!("{}", error);
                self.consumer.on_status("Unknown message from robot.", false);
                Vec::new()
            }
        }
    }
}
