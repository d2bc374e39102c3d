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

//! Bluetooth communication module.
//!
//! Keeps a single RFCOMM serial link to the robot alive: connects as a client,
//! decodes robot frames, writes commands, and reconnects on failure.

mod connector;
mod error;
mod listener;
mod manager;
pub mod protocol;
mod session;
mod writer;

pub use connector::{BluezConnector, BoxTransport, Connector, Transport, SPP_UUID};
pub use error::{LinkError, Result};
pub use manager::{LinkHandle, LinkManager};
pub use protocol::{Command, CommandTag, Direction, InboundFrame, Location, MoveKind};
pub use session::{LinkSnapshot, LinkState, RetryPolicy, Session};
pub use writer::OutboundWriter;
