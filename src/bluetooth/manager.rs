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

//! Link manager task.
//!
//! Owns the transport and drives [`LinkMachine`]. Connector, listener and
//! writer report back through a single event channel; the current session
//! and link state live behind one lock shared with [`LinkHandle`].

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connector::{self, BoxTransport, Connector};
use super::error::{LinkError, Result};
use super::listener::Listener;
use super::protocol::Command;
use super::session::{
    Action, Input, LinkMachine, LinkSnapshot, Notice, RetryPolicy, Session, SessionGuard,
};
use super::writer::OutboundWriter;
use crate::consumer::LinkConsumer;

/// Messages into the link manager task.
pub enum LinkEvent {
    Start,
    Stop,
    Reset,
    Shutdown,
    Connected(Session, BoxTransport),
    ConnectFailed(Session, LinkError),
    IoFailure(Session, LinkError),
    BackoffElapsed(Session),
}

type WriterSlot = Arc<RwLock<Option<Arc<OutboundWriter>>>>;

/// Listener and writer of the attached session.
struct ActiveLink {
    writer: Arc<OutboundWriter>,
    stop: oneshot::Sender<()>,
    listener: JoinHandle<()>,
}

/// Drives one link from start to shutdown.
pub struct LinkManager<C, K> {
    machine: Arc<Mutex<LinkMachine>>,
    connector: Arc<C>,
    consumer: Arc<K>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    writer: WriterSlot,
    active: Option<ActiveLink>,
    connect_task: Option<JoinHandle<()>>,
    backoff_task: Option<JoinHandle<()>>,
}

impl<C: Connector, K: LinkConsumer> LinkManager<C, K> {
    /// Spawn the manager task. The link stays idle until [`LinkHandle::start`].
    pub fn spawn(connector: C, consumer: Arc<K>, policy: RetryPolicy) -> (LinkHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let machine = Arc::new(Mutex::new(LinkMachine::new(policy)));
        let writer: WriterSlot = Arc::new(RwLock::new(None));

        let handle = LinkHandle {
            events: events_tx.clone(),
            machine: machine.clone(),
            writer: writer.clone(),
        };

        let manager = Self {
            machine,
            connector: Arc::new(connector),
            consumer,
            events_tx,
            events_rx,
            writer,
            active: None,
            connect_task: None,
            backoff_task: None,
        };

        (handle, tokio::spawn(manager.run()))
    }

    async fn run(mut self) {
        info!("Link manager started");

        while let Some(event) = self.events_rx.recv().await {
            let mut transport = None;
            let input = match event {
                LinkEvent::Start => Input::Start,
                LinkEvent::Stop => Input::Stop,
                LinkEvent::Reset => Input::Reset,
                LinkEvent::Shutdown => {
                    self.apply(Input::Stop, None);
                    break;
                }
                LinkEvent::Connected(session, stream) => {
                    transport = Some(stream);
                    Input::Connected(session)
                }
                LinkEvent::ConnectFailed(session, error) => Input::ConnectFailed(session, error),
                LinkEvent::IoFailure(session, error) => Input::IoFailure(session, error),
                LinkEvent::BackoffElapsed(session) => Input::BackoffElapsed(session),
            };
            self.apply(input, transport);
        }

        info!("Link manager stopped");
    }

    /// Feed one input to the machine and carry out its actions.
    ///
    /// A transport that is not attached is dropped here, which closes it.
    fn apply(&mut self, input: Input, mut transport: Option<BoxTransport>) {
        let actions = self.machine.lock().handle(input);

        for action in actions {
            match action {
                Action::LaunchConnector(session) => self.launch(session),
                Action::Attach(session) => match transport.take() {
                    Some(stream) => self.attach(session, stream),
                    None => warn!("No transport to attach for session {}", session),
                },
                Action::CloseTransport => self.close(),
                Action::CancelPending => self.cancel_pending(),
                Action::ScheduleBackoff(session, delay) => {
                    let events = self.events_tx.clone();
                    if let Some(old) = self.backoff_task.replace(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = events.send(LinkEvent::BackoffElapsed(session));
                    })) {
                        old.abort();
                    }
                }
                Action::Notify(notice) => self.notify(notice),
            }
        }

        if transport.is_some() {
            debug!("Dropping transport of a superseded connection");
        }
    }

    fn launch(&mut self, session: Session) {
        let guard = SessionGuard::new(session, self.machine.clone());
        let task = tokio::spawn(connector::run_attempt(
            self.connector.clone(),
            guard,
            self.events_tx.clone(),
        ));
        self.connect_task = Some(task);
    }

    fn attach(&mut self, session: Session, stream: BoxTransport) {
        let (reader, half) = tokio::io::split(stream);
        let writer = Arc::new(OutboundWriter::new(session, half, self.events_tx.clone()));
        let (stop, stop_rx) = oneshot::channel();

        let listener = Listener::new(
            session,
            reader,
            writer.clone(),
            self.consumer.clone(),
            self.events_tx.clone(),
            stop_rx,
        );
        let listener = tokio::spawn(listener.run());

        *self.writer.write() = Some(writer.clone());
        self.active = Some(ActiveLink {
            writer,
            stop,
            listener,
        });
        debug!("Listener and writer attached to session {}", session);
    }

    /// Stop the listener and release the write half. The stream closes once both halves are gone.
    ///
    /// Sends in flight are cancelled first, so nothing blocked on the transport
    /// keeps it open.
    fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        *self.writer.write() = None;

        let session = active.writer.session();
        active.writer.cancel();
        let _ = active.stop.send(());
        active.listener.abort();
        let writer = active.writer;
        tokio::spawn(async move { writer.close().await });
        info!("Transport of session {} closed", session);
    }

    fn cancel_pending(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.backoff_task.take() {
            task.abort();
        }
    }

    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Connected => self.consumer.on_connected(),
            Notice::Status {
                message,
                user_visible,
            } => self.consumer.on_status(&message, user_visible),
            Notice::TerminalFailure(error) => self.consumer.on_terminal_failure(&error),
        }
    }
}

/// Cloneable control surface for a running link manager.
#[derive(Clone)]
pub struct LinkHandle {
    events: mpsc::UnboundedSender<LinkEvent>,
    machine: Arc<Mutex<LinkMachine>>,
    writer: WriterSlot,
}

impl LinkHandle {
    /// Begin connecting. Ignored unless the link is idle.
    pub fn start(&self) {
        self.post(LinkEvent::Start);
    }

    /// Close the link without any reconnection attempt. A failed link stays
    /// failed until [`LinkHandle::reset`].
    pub fn stop(&self) {
        self.post(LinkEvent::Stop);
    }

    /// Leave the failed state so the link can be started again.
    pub fn reset(&self) {
        self.post(LinkEvent::Reset);
    }

    /// Stop the link and end the manager task.
    pub fn shutdown(&self) {
        self.post(LinkEvent::Shutdown);
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.machine.lock().snapshot()
    }

    /// Send one command on the current session.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.current_writer()?.send_command(command).await
    }

    /// Send commands in order on the current session.
    pub async fn send_all(&self, commands: &[Command]) -> Result<()> {
        self.current_writer()?.send_all(commands).await
    }

    fn current_writer(&self) -> Result<Arc<OutboundWriter>> {
        self.writer.read().clone().ok_or(LinkError::NotConnected)
    }

    fn post(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!("Link manager is gone");
        }
    }
}
