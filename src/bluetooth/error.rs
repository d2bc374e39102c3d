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

//! Link error taxonomy.

/// Errors produced by the Bluetooth link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No usable Bluetooth adapter on this host.
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The robot has never been bonded with this host.
    #[error("device '{name}' is not paired")]
    DeviceNotPaired { name: String },

    /// Opening the RFCOMM socket failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Read or write on an open transport failed.
    #[error("transport I/O failure: {0}")]
    TransportIo(#[from] std::io::Error),

    /// Too many consecutive failures without a successful connection.
    #[error("reconnection failed after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    /// Inbound command byte with no known tag.
    #[error("unrecognized frame tag 0x{0:02x}")]
    UnrecognizedFrame(u8),

    /// No session is attached to a writer.
    #[error("link is not connected")]
    NotConnected,
}

impl LinkError {
    /// Whether the link manager may retry after this error. Anything else ends
    /// automatic recovery outright.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectFailed(_) | Self::TransportIo(_))
    }
}

impl From<bluer::Error> for LinkError {
    fn from(err: bluer::Error) -> Self {
        Self::ConnectFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
