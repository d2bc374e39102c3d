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

//! Event processing for robot link events.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bluetooth::{Command, LinkError, Location, Session};
use crate::consumer::LinkConsumer;
use crate::plan::BatchFeeder;
use crate::state::{AppState, ConnectionStatus};

/// Tracks robot progress and feeds it the loaded plan.
pub struct EventProcessor {
    state: Arc<AppState>,
    feeder: Mutex<Option<BatchFeeder>>,
}

impl EventProcessor {
    /// Create a new event processor.
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            feeder: Mutex::new(None),
        }
    }

    /// Create an event processor that drives `feeder`.
    pub fn with_plan(state: Arc<AppState>, feeder: BatchFeeder) -> Self {
        info!("Plan loaded: {} steps", feeder.len());
        Self {
            state,
            feeder: Mutex::new(Some(feeder)),
        }
    }

    /// First batch of the plan, sent once the link is up.
    pub fn first_batch(&self) -> Vec<Command> {
        self.feeder
            .lock()
            .as_mut()
            .map(BatchFeeder::next_batch)
            .unwrap_or_default()
    }

    fn with_feeder(&self, f: impl FnOnce(&mut BatchFeeder) -> Vec<Command>) -> Vec<Command> {
        self.feeder.lock().as_mut().map(f).unwrap_or_default()
    }
}

impl LinkConsumer for EventProcessor {
    fn on_location(&self, session: Session, location: Location) -> Vec<Command> {
        let (x, y) = location.robot;
        self.state.set_robot(location.robot);

        match location.block {
            Some(block) => {
                if self.state.add_block(block) {
                    info!("Block found at {:?}, robot at ({}, {})", block, x, y);
                }
            }
            None => info!("Robot at ({}, {}) on session {}", x, y, session),
        }
        Vec::new()
    }

    fn on_warning(&self, _session: Session, remaining: u8) -> Vec<Command> {
        warn!("Robot reports {} instructions remaining", remaining);
        self.with_feeder(|feeder| feeder.on_warning(remaining))
    }

    fn on_done(&self, _session: Session) -> Vec<Command> {
        let batch = self.with_feeder(BatchFeeder::on_done);
        if batch.is_empty() {
            info!("Robot idle, nothing left to send");
        }
        batch
    }

    fn on_connected(&self) {
        self.state.set_status(ConnectionStatus::Connected);
    }

    fn on_status(&self, message: &str, user_visible: bool) {
        if !user_visible {
            return;
        }
        info!("{}", message);
        self.state.set_last_status(message.to_string());
    }

    fn on_terminal_failure(&self, error: &LinkError) {
        error!("Robot link failed: {}", error);
        self.state.set_status(ConnectionStatus::Failed);
    }
}
