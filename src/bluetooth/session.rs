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

//! Link sessions and the connection state machine.
//!
//! [`LinkMachine`] holds no I/O. It consumes [`Input`]s and returns the
//! [`Action`]s the link manager must carry out, which keeps every transition
//! testable without a transport.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::error::LinkError;

/// Identifier of one connection attempt and the link it produces.
///
/// Minted in strictly increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Session(u64);

impl Session {
    pub fn id(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_id(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Recovering,
    Failed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Idle => "Idle",
            LinkState::Connecting => "Connecting",
            LinkState::Connected => "Connected",
            LinkState::Recovering => "Recovering",
            LinkState::Failed => "Failed",
        }
    }
}

/// Bounded retries with a fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(1500),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug)]
pub enum Input {
    Start,
    Stop,
    Reset,
    Connected(Session),
    ConnectFailed(Session, LinkError),
    IoFailure(Session, LinkError),
    BackoffElapsed(Session),
}

/// Side effects requested by the state machine.
#[derive(Debug)]
pub enum Action {
    /// Start a connector bound to the session.
    LaunchConnector(Session),
    /// Install the freshly connected transport and start its listener and writer.
    Attach(Session),
    /// Close the transport and stop the listener, if any.
    CloseTransport,
    /// Abort an in-flight connector and any pending backoff timer.
    CancelPending,
    /// Feed `BackoffElapsed(session)` back after the delay.
    ScheduleBackoff(Session, Duration),
    Notify(Notice),
}

/// Notifications for the consumer.
#[derive(Debug)]
pub enum Notice {
    Connected,
    Status { message: String, user_visible: bool },
    TerminalFailure(LinkError),
}

impl Notice {
    fn status(message: impl Into<String>, user_visible: bool) -> Self {
        Self::Status {
            message: message.into(),
            user_visible,
        }
    }
}

/// Point-in-time view of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub state: LinkState,
    pub session: Option<Session>,
    pub retries: u32,
}

/// Connection/reconnection state machine.
#[derive(Debug)]
pub struct LinkMachine {
    policy: RetryPolicy,
    state: LinkState,
    current: Option<Session>,
    next_session: u64,
    retries: u32,
}

impl LinkMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: LinkState::Idle,
            current: None,
            next_session: 0,
            retries: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn current(&self) -> Option<Session> {
        self.current
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: self.state,
            session: self.current,
            retries: self.retries,
        }
    }

    /// Whether `session` is the one the machine currently acts on.
    pub fn is_current(&self, session: Session) -> bool {
        self.current == Some(session)
    }

    /// Apply one input and return the resulting actions in order.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        match input {
            Input::Start => self.start(),
            Input::Stop => self.stop(),
            Input::Reset => self.reset(),
            Input::Connected(session) => self.connected(session),
            Input::ConnectFailed(session, error) => self.connect_failed(session, error),
            Input::IoFailure(session, error) => self.io_failure(session, error),
            Input::BackoffElapsed(session) => self.backoff_elapsed(session),
        }
    }

    fn mint(&mut self) -> Session {
        let session = Session(self.next_session);
        self.next_session += 1;
        self.current = Some(session);
        session
    }

    fn start(&mut self) -> Vec<Action> {
        if self.state != LinkState::Idle {
            debug!("Start ignored in state {}", self.state.as_str());
            return Vec::new();
        }

        self.retries = 0;
        let session = self.mint();
        self.state = LinkState::Connecting;
        info!("Connecting, session {}", session);

        vec![
            Action::Notify(Notice::status("Connecting...", false)),
            Action::LaunchConnector(session),
        ]
    }

    /// Close down from any state. `Failed` is kept so that only `reset` clears it.
    fn stop(&mut self) -> Vec<Action> {
        info!("Link stop requested in state {}", self.state.as_str());
        self.current = None;
        if self.state != LinkState::Failed {
            self.state = LinkState::Idle;
        }

        vec![
            Action::CancelPending,
            Action::CloseTransport,
            Action::Notify(Notice::status("Disconnected.", false)),
        ]
    }

    fn reset(&mut self) -> Vec<Action> {
        if self.state != LinkState::Failed {
            debug!("Reset ignored in state {}", self.state.as_str());
            return Vec::new();
        }

        self.retries = 0;
        self.state = LinkState::Idle;
        info!("Link reset");
        Vec::new()
    }

    fn connected(&mut self, session: Session) -> Vec<Action> {
        if !self.is_current(session) || self.state != LinkState::Connecting {
            debug!("Discarding connection of stale session {}", session);
            return Vec::new();
        }

        self.state = LinkState::Connected;
        self.retries = 0;
        info!("Connected, session {}", session);

        vec![
            Action::Attach(session),
            Action::Notify(Notice::Connected),
            Action::Notify(Notice::status("Connected.", true)),
        ]
    }

    fn connect_failed(&mut self, session: Session, error: LinkError) -> Vec<Action> {
        if !self.is_current(session) || self.state != LinkState::Connecting {
            debug!("Discarding connect failure of stale session {}: {}", session, error);
            return Vec::new();
        }

        if !error.is_retryable() {
            warn!("Connect failed permanently: {}", error);
            return self.fail(Vec::new(), error);
        }

        warn!("Connect failed, session {}: {}", session, error);
        self.recover(session, error)
    }

    fn io_failure(&mut self, session: Session, error: LinkError) -> Vec<Action> {
        if !self.is_current(session) || self.state != LinkState::Connected {
            debug!("Discarding I/O failure of session {}: {}", session, error);
            return Vec::new();
        }

        warn!("Link I/O failure, session {}: {}", session, error);
        self.recover(session, error)
    }

    fn backoff_elapsed(&mut self, session: Session) -> Vec<Action> {
        if !self.is_current(session) || self.state != LinkState::Recovering {
            debug!("Discarding backoff of session {}", session);
            return Vec::new();
        }

        let session = self.mint();
        self.state = LinkState::Connecting;
        info!("Reconnecting, session {}", session);
        vec![Action::LaunchConnector(session)]
    }

    fn recover(&mut self, session: Session, error: LinkError) -> Vec<Action> {
        self.retries = self.retries.saturating_add(1);
        let mut actions = vec![Action::CloseTransport];

        if self.retries > self.policy.max_retries {
            let attempts = self.retries;
            return self.fail(actions, LinkError::MaxRetriesExceeded { attempts });
        }

        self.state = LinkState::Recovering;
        debug!(
            "Retry {}/{} after {:?}",
            self.retries, self.policy.max_retries, self.policy.backoff
        );

        actions.push(Action::Notify(Notice::status(
            format!("Link error ({}), reconnecting...", error),
            true,
        )));
        actions.push(Action::ScheduleBackoff(session, self.policy.backoff));
        actions
    }

    fn fail(&mut self, mut actions: Vec<Action>, error: LinkError) -> Vec<Action> {
        self.state = LinkState::Failed;
        self.current = None;

        let message = match &error {
            LinkError::MaxRetriesExceeded { .. } => "Reconnection failed.".to_string(),
            LinkError::DeviceNotPaired { name } => {
                format!("Pair with '{}' before connecting.", name)
            }
            LinkError::AdapterUnavailable(_) => "Bluetooth is not available.".to_string(),
            other => other.to_string(),
        };
        actions.push(Action::Notify(Notice::status(message, true)));
        actions.push(Action::Notify(Notice::TerminalFailure(error)));
        actions
    }
}

/// Handle for asking whether a session is still current from another task.
#[derive(Debug, Clone)]
pub struct SessionGuard {
    session: Session,
    machine: Arc<Mutex<LinkMachine>>,
}

impl SessionGuard {
    pub fn new(session: Session, machine: Arc<Mutex<LinkMachine>>) -> Self {
        Self { session, machine }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn is_current(&self) -> bool {
        self.machine.lock().is_current(self.session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_error() -> LinkError {
        LinkError::ConnectFailed("host is down".into())
    }

    fn io_error() -> LinkError {
        LinkError::TransportIo(std::io::ErrorKind::ConnectionReset.into())
    }

    fn launched(actions: &[Action]) -> Option<Session> {
        actions.iter().find_map(|a| match a {
            Action::LaunchConnector(s) => Some(*s),
            _ => None,
        })
    }

    fn terminal_count(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, Action::Notify(Notice::TerminalFailure(_))))
            .count()
    }

    /// Drive a failed attempt through its backoff to the next connector launch.
    fn fail_and_relaunch(machine: &mut LinkMachine, session: Session) -> Session {
        let actions = machine.handle(Input::ConnectFailed(session, connect_error()));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ScheduleBackoff(s, _) if *s == session)));
        launched(&machine.handle(Input::BackoffElapsed(session))).unwrap()
    }

    #[test]
    fn test_start_mints_first_session() {
        let mut machine = LinkMachine::new(RetryPolicy::default());
        let actions = machine.handle(Input::Start);

        assert_eq!(launched(&actions), Some(Session(0)));
        assert_eq!(machine.state(), LinkState::Connecting);
        assert!(machine.is_current(Session(0)));

        // A second start while connecting does nothing.
        assert!(machine.handle(Input::Start).is_empty());
    }

    #[test]
    fn test_max_retries_scenario() {
        let mut machine = LinkMachine::new(RetryPolicy::default());
        let mut session = launched(&machine.handle(Input::Start)).unwrap();
        let mut terminals = 0;

        for expected in 0..3 {
            assert_eq!(session, Session(expected));
            session = fail_and_relaunch(&mut machine, session);
            assert_eq!(machine.retries(), expected as u32 + 1);
        }

        assert_eq!(session, Session(3));
        let actions = machine.handle(Input::ConnectFailed(session, connect_error()));
        terminals += terminal_count(&actions);
        assert_eq!(machine.state(), LinkState::Failed);
        assert!(launched(&actions).is_none());

        // Redundant reports after tipping into Failed are ignored.
        for s in 0..4 {
            let actions = machine.handle(Input::ConnectFailed(Session(s), connect_error()));
            terminals += terminal_count(&actions);
            assert!(actions.is_empty());
        }
        assert!(machine.handle(Input::IoFailure(Session(3), io_error())).is_empty());
        assert_eq!(terminals, 1);
    }

    #[test]
    fn test_failed_is_terminal_until_reset() {
        let mut machine = LinkMachine::new(RetryPolicy {
            max_retries: 0,
            backoff: Duration::ZERO,
        });
        machine.handle(Input::Start);
        machine.handle(Input::ConnectFailed(Session(0), connect_error()));
        assert_eq!(machine.state(), LinkState::Failed);

        assert!(machine.handle(Input::Start).is_empty());
        assert!(machine.handle(Input::BackoffElapsed(Session(0))).is_empty());
        assert_eq!(machine.state(), LinkState::Failed);

        machine.handle(Input::Reset);
        assert_eq!(machine.state(), LinkState::Idle);
        assert_eq!(machine.retries(), 0);

        // Sessions are never reused across a reset.
        assert_eq!(launched(&machine.handle(Input::Start)), Some(Session(1)));
    }

    #[test]
    fn test_connected_resets_retries() {
        let mut machine = LinkMachine::new(RetryPolicy::default());
        let session = launched(&machine.handle(Input::Start)).unwrap();
        let session = fail_and_relaunch(&mut machine, session);
        let session = fail_and_relaunch(&mut machine, session);
        assert_eq!(machine.retries(), 2);

        let actions = machine.handle(Input::Connected(session));
        assert!(matches!(actions[0], Action::Attach(s) if s == session));
        assert_eq!(machine.state(), LinkState::Connected);
        assert_eq!(machine.retries(), 0);
    }

    #[test]
    fn test_stale_reports_leave_state_unchanged() {
        let mut machine = LinkMachine::new(RetryPolicy::default());
        let first = launched(&machine.handle(Input::Start)).unwrap();
        let second = fail_and_relaunch(&mut machine, first);
        machine.handle(Input::Connected(second));
        let before = machine.snapshot();

        let stale = [
            Input::ConnectFailed(first, connect_error()),
            Input::IoFailure(first, io_error()),
            Input::Connected(first),
            Input::BackoffElapsed(first),
            Input::IoFailure(first, io_error()),
        ];
        for input in stale {
            assert!(machine.handle(input).is_empty());
            assert_eq!(machine.snapshot(), before);
        }
    }

    #[test]
    fn test_io_failure_reported_once_per_session() {
        let mut machine = LinkMachine::new(RetryPolicy::default());
        let session = launched(&machine.handle(Input::Start)).unwrap();
        machine.handle(Input::Connected(session));

        let actions = machine.handle(Input::IoFailure(session, io_error()));
        assert!(matches!(actions[0], Action::CloseTransport));
        assert_eq!(machine.state(), LinkState::Recovering);
        assert_eq!(machine.retries(), 1);

        // The writer noticing the same close must not count twice.
        assert!(machine.handle(Input::IoFailure(session, io_error())).is_empty());
        assert_eq!(machine.retries(), 1);
    }

    #[test]
    fn test_guard_tracks_supersession() {
        let machine = Arc::new(Mutex::new(LinkMachine::new(RetryPolicy::default())));
        machine.lock().handle(Input::Start);

        let guard = SessionGuard::new(Session(0), machine.clone());
        assert!(guard.is_current());

        machine.lock().handle(Input::Stop);
        assert!(!guard.is_current());
    }

    #[test]
    fn test_stop_from_any_state() {
        let build: [fn(&mut LinkMachine); 5] = [
            |_| {},
            |m| {
                m.handle(Input::Start);
            },
            |m| {
                m.handle(Input::Start);
                m.handle(Input::Connected(Session(0)));
            },
            |m| {
                m.handle(Input::Start);
                m.handle(Input::ConnectFailed(Session(0), connect_error()));
            },
            |m| {
                m.handle(Input::Start);
                for s in 0..4 {
                    m.handle(Input::ConnectFailed(Session(s), connect_error()));
                    m.handle(Input::BackoffElapsed(Session(s)));
                }
            },
        ];

        for setup in build {
            let mut machine = LinkMachine::new(RetryPolicy::default());
            setup(&mut machine);
            let retries = machine.retries();
            let previous = machine.current();
            let expected = match machine.state() {
                LinkState::Failed => LinkState::Failed,
                _ => LinkState::Idle,
            };

            let actions = machine.handle(Input::Stop);
            assert!(launched(&actions).is_none());
            assert!(matches!(actions[0], Action::CancelPending));
            assert_eq!(machine.state(), expected);
            assert_eq!(machine.retries(), retries);
            assert_eq!(machine.current(), None);

            // A connector racing the stop cannot install its transport.
            if let Some(session) = previous {
                assert!(machine.handle(Input::Connected(session)).is_empty());
                assert!(machine.handle(Input::BackoffElapsed(session)).is_empty());
            }
            assert_eq!(machine.state(), expected);
        }
    }

    #[test]
    fn test_stop_does_not_clear_failed() {
        let mut machine = LinkMachine::new(RetryPolicy {
            max_retries: 0,
            backoff: Duration::ZERO,
        });
        machine.handle(Input::Start);
        machine.handle(Input::ConnectFailed(Session(0), connect_error()));
        assert_eq!(machine.state(), LinkState::Failed);

        machine.handle(Input::Stop);
        assert_eq!(machine.state(), LinkState::Failed);
        assert_eq!(machine.retries(), 1);
        assert!(machine.handle(Input::Start).is_empty());

        machine.handle(Input::Reset);
        assert_eq!(launched(&machine.handle(Input::Start)), Some(Session(1)));
    }

    #[test]
    fn test_non_retryable_error_fails_at_once() {
        let mut machine = LinkMachine::new(RetryPolicy::default());
        machine.handle(Input::Start);

        let actions = machine.handle(Input::ConnectFailed(
            Session(0),
            LinkError::AdapterUnavailable("no adapter".into()),
        ));
        assert_eq!(machine.state(), LinkState::Failed);
        assert_eq!(terminal_count(&actions), 1);
    }

    #[test]
    fn test_unpaired_device_fails_without_retry() {
        let mut machine = LinkMachine::new(RetryPolicy::default());
        machine.handle(Input::Start);

        let actions = machine.handle(Input::ConnectFailed(
            Session(0),
            LinkError::DeviceNotPaired {
                name: "HC-06".into(),
            },
        ));
        assert_eq!(machine.state(), LinkState::Failed);
        assert_eq!(machine.retries(), 0);
        assert_eq!(terminal_count(&actions), 1);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::ScheduleBackoff(..))));
    }
}
