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

//! Application state management.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bluetooth::LinkState;

/// Link status as shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Reconnecting => "Reconnecting...",
            ConnectionStatus::Failed => "Failed",
        }
    }
}

impl From<LinkState> for ConnectionStatus {
    fn from(state: LinkState) -> Self {
        match state {
            LinkState::Idle => ConnectionStatus::Disconnected,
            LinkState::Connecting => ConnectionStatus::Connecting,
            LinkState::Connected => ConnectionStatus::Connected,
            LinkState::Recovering => ConnectionStatus::Reconnecting,
            LinkState::Failed => ConnectionStatus::Failed,
        }
    }
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Last reported robot cell.
    pub robot: RwLock<Option<(u8, u8)>>,

    /// Blocks found so far, in report order.
    pub blocks: RwLock<Vec<(u8, u8)>>,

    /// Last user-visible status line.
    pub last_status: RwLock<Option<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            robot: RwLock::new(None),
            blocks: RwLock::new(Vec::new()),
            last_status: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        *self.connection_status.write() = status;
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn set_robot(&self, cell: (u8, u8)) {
        *self.robot.write() = Some(cell);
    }

    pub fn get_robot(&self) -> Option<(u8, u8)> {
        *self.robot.read()
    }

    /// Record a block. Returns `false` if it was already known.
    pub fn add_block(&self, cell: (u8, u8)) -> bool {
        let mut blocks = self.blocks.write();
        if blocks.contains(&cell) {
            return false;
        }
        blocks.push(cell);
        true
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn set_last_status(&self, text: String) {
        *self.last_status.write() = Some(text);
    }

    pub fn get_last_status(&self) -> Option<String> {
        self.last_status.read().clone()
    }
}
