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

//! Robot wire protocol: inbound frame decoding and outbound command encoding.
//!
//! Inbound frames are `<tag><separator><payload>` where the payload width is a
//! fixed function of the tag. Numeric fields are single ASCII digits.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

/// Separator between the command tag and its payload.
pub const SEPARATOR: u8 = b'#';

/// Command tags shared by both directions of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    Movement,
    Location,
    StateChange,
    End,
    Warning,
    Done,
}

impl CommandTag {
    /// Look up a tag from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'M' => Some(Self::Movement),
            b'L' => Some(Self::Location),
            b'S' => Some(Self::StateChange),
            b'E' => Some(Self::End),
            b'W' => Some(Self::Warning),
            b'D' => Some(Self::Done),
            _ => None,
        }
    }

    /// Wire byte for this tag.
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Movement => b'M',
            Self::Location => b'L',
            Self::StateChange => b'S',
            Self::End => b'E',
            Self::Warning => b'W',
            Self::Done => b'D',
        }
    }

    /// Inbound payload width in bytes, not counting the separator.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Movement => 2,
            Self::Location => 4,
            Self::StateChange => 1,
            Self::End => 0,
            Self::Warning => 1,
            Self::Done => 0,
        }
    }
}

/// Robot heading for a movement command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
    Unknown,
}

impl Direction {
    /// Parse a solver direction such as `dir-up`.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "dir-up" => Self::Up,
            "dir-right" => Self::Right,
            "dir-down" => Self::Down,
            "dir-left" => Self::Left,
            _ => Self::Unknown,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::Up => '0',
            Self::Right => '1',
            Self::Down => '2',
            Self::Left => '3',
            Self::Unknown => 'h',
        }
    }
}

/// Whether a movement pushes a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Move,
    Push,
}

impl MoveKind {
    pub fn as_char(&self) -> char {
        match self {
            Self::Move => '0',
            Self::Push => '1',
        }
    }
}

/// Outbound command line sent to the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `M#<dir><type>`
    Movement { direction: Direction, kind: MoveKind },
    /// `E#`
    EndOfBatch,
    /// `S#E`
    StateChange,
}

impl Command {
    /// Plain move in the given direction.
    pub fn step(direction: Direction) -> Self {
        Self::Movement {
            direction,
            kind: MoveKind::Move,
        }
    }

    /// Encode to the text line written on the wire.
    pub fn encode(&self) -> String {
        let sep = SEPARATOR as char;
        match self {
            Self::Movement { direction, kind } => format!(
                "{}{}{}{}",
                CommandTag::Movement.as_byte() as char,
                sep,
                direction.as_char(),
                kind.as_char()
            ),
            Self::EndOfBatch => format!("{}{}", CommandTag::End.as_byte() as char, sep),
            Self::StateChange => format!("{}{}E", CommandTag::StateChange.as_byte() as char, sep),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Position report from the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Block detected ahead of the robot, if any.
    pub block: Option<(u8, u8)>,
    pub robot: (u8, u8),
}

/// One decoded inbound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Movement echo. Unused inbound.
    Movement([u8; 2]),
    Location(Location),
    /// State-change acknowledgement.
    StateChange(u8),
    /// End-of-batch acknowledgement.
    End,
    /// Remaining instruction count on the robot.
    Warning(u8),
    /// Batch done / heartbeat.
    Done,
    /// Known tag whose payload could not be interpreted.
    Malformed { tag: CommandTag, payload: Vec<u8> },
    /// Unknown command byte. Only that byte was consumed.
    Unrecognized(u8),
}

fn digit(byte: u8) -> Option<u8> {
    byte.is_ascii_digit().then(|| byte - b'0')
}

/// Read exactly one frame from `reader`.
///
/// Any short read surfaces as an I/O error; the codec never buffers or
/// resynchronizes beyond the current frame.
pub async fn decode_one<R>(reader: &mut R) -> io::Result<InboundFrame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let byte = reader.read_u8().await?;
    let Some(tag) = CommandTag::from_byte(byte) else {
        return Ok(InboundFrame::Unrecognized(byte));
    };

    let separator = reader.read_u8().await?;
    if separator != SEPARATOR {
        warn!(
            "Unexpected separator 0x{:02x} after tag '{}'",
            separator, byte as char
        );
    }

    let mut payload = vec![0u8; tag.payload_len()];
    reader.read_exact(&mut payload).await?;

    Ok(parse_payload(tag, payload))
}

fn parse_payload(tag: CommandTag, payload: Vec<u8>) -> InboundFrame {
    let frame = match tag {
        CommandTag::Movement => Some(InboundFrame::Movement([payload[0], payload[1]])),
        CommandTag::Location => parse_location(&payload).map(InboundFrame::Location),
        CommandTag::StateChange => Some(InboundFrame::StateChange(payload[0])),
        CommandTag::End => Some(InboundFrame::End),
        CommandTag::Warning => digit(payload[0]).map(InboundFrame::Warning),
        CommandTag::Done => Some(InboundFrame::Done),
    };
    frame.unwrap_or(InboundFrame::Malformed { tag, payload })
}

/// Payload is `blockX blockY robotX robotY`. A non-digit block field means no block.
fn parse_location(payload: &[u8]) -> Option<Location> {
    let robot = (digit(payload[2])?, digit(payload[3])?);
    let block = digit(payload[0]).zip(digit(payload[1]));
    Some(Location { block, robot })
}
