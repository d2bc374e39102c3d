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

//! Receiver of decoded link events.

use crate::bluetooth::{Command, LinkError, Location, Session};

/// Interprets robot events and decides what to send next.
///
/// Inbound handlers run on the listener task and return the commands to
/// write back, in order. They must not block.
pub trait LinkConsumer: Send + Sync + 'static {
    /// Robot position report, with the block ahead if one was found.
    fn on_location(&self, session: Session, location: Location) -> Vec<Command>;

    /// The robot has `remaining` instructions left in its queue.
    fn on_warning(&self, session: Session, remaining: u8) -> Vec<Command>;

    /// The robot finished its batch.
    fn on_done(&self, session: Session) -> Vec<Command>;

    fn on_connected(&self) {}

    /// Progress message. `user_visible` marks lines meant for the operator.
    fn on_status(&self, message: &str, user_visible: bool);

    /// Automatic recovery has ended. Called once per failure.
    fn on_terminal_failure(&self, error: &LinkError);
}
