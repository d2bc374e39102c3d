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

//! Solver plans and the batches of movement commands fed to the robot.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::bluetooth::{Command, Direction, MoveKind};

/// Default number of commands per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// One step of a solver plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAction {
    /// `dir-up`, `dir-right`, `dir-down` or `dir-left`.
    pub direction: String,

    /// `move` or `push`.
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_action() -> String {
    "move".to_string()
}

/// Solver reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
}

impl Plan {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let plan = Self::from_json(&content)?;
        info!("Loaded plan with {} actions from {}", plan.actions.len(), path.display());
        Ok(plan)
    }
}

/// Task the plan belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Every step is a plain move.
    Exploration,
    /// Steps may push blocks.
    Sokoban,
}

/// Walks a plan in fixed-size batches.
#[derive(Debug)]
pub struct BatchFeeder {
    steps: Vec<Command>,
    phase: Phase,
    cursor: usize,
    batch_size: usize,
}

impl BatchFeeder {
    pub fn new(plan: &Plan, phase: Phase, batch_size: usize) -> Self {
        let steps = plan
            .actions
            .iter()
            .map(|step| {
                let kind = match phase {
                    Phase::Sokoban if step.action != "move" => MoveKind::Push,
                    _ => MoveKind::Move,
                };
                Command::Movement {
                    direction: Direction::parse(&step.direction),
                    kind,
                }
            })
            .collect();

        Self {
            steps,
            phase,
            cursor: 0,
            batch_size: batch_size.max(1),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Next `batch_size` commands, padded with end-of-batch markers.
    pub fn next_batch(&mut self) -> Vec<Command> {
        let end = (self.cursor + self.batch_size).min(self.steps.len());
        let mut batch = self.steps[self.cursor.min(end)..end].to_vec();
        self.cursor = end;
        batch.resize(self.batch_size, Command::EndOfBatch);
        debug!("Batch up to step {}/{}", self.cursor, self.steps.len());
        batch
    }

    /// The robot finished a batch.
    pub fn on_done(&mut self) -> Vec<Command> {
        if self.is_finished() {
            Vec::new()
        } else {
            self.next_batch()
        }
    }

    /// The robot reports `remaining` queued instructions; resend from the rewind point.
    pub fn on_warning(&mut self, remaining: u8) -> Vec<Command> {
        let rewind = self.batch_size.saturating_sub(remaining as usize);
        match (self.phase, self.cursor.checked_sub(rewind)) {
            (Phase::Sokoban, None) => self.state_change(),
            (_, Some(cursor)) => {
                self.cursor = cursor;
                self.next_batch()
            }
            (Phase::Exploration, None) => {
                self.cursor = 0;
                self.next_batch()
            }
        }
    }

    /// Batch returning the robot to its idle state.
    pub fn state_change(&self) -> Vec<Command> {
        vec![Command::StateChange; self.batch_size]
    }
}
