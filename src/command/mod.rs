//! # Command Sequence Engine
//!
//! A sequence is an ordered list of steps. Each step waits for a condition on
//! the target device's latest reading and then issues one command.
//!
//! States: `Idle -> Armed(step) -> Completed | Aborted`.
//!
//! - An automatic sequence watches step 0 while `Idle`, without a deadline.
//!   An on-request sequence stays `Idle` until `request` arms it.
//! - A satisfied step's command is pending until the runner reports the write
//!   with `acknowledge`, which advances the sequence. A failed write leaves it
//!   pending and sends it to the back of the queue.
//! - A step with `max_wait` aborts the sequence if its command has not been
//!   written in time, whether the condition never held or the writes failed.
//! - At most one command is released per cycle, in queue order: commands keep
//!   the place they took when they became pending, simultaneous ones in
//!   registration order.

pub mod sequence;

use crate::device::Command;
use crate::error::SolarError;
use crate::packet::PacketCollection;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

pub use sequence::{Condition, SequenceConfig, StartMode, StepConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SequenceStatus {
    Idle,
    Armed { step: usize },
    Completed,
    Aborted,
}

/// Mutable progress of one sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSequenceState {
    pub status: SequenceStatus,
    /// When the current step became active.
    pub step_entered: Option<DateTime<Utc>>,
    /// Start of the current uninterrupted run of the step's condition.
    pub held_since: Option<DateTime<Utc>>,
    pub pending: Option<Command>,
}

impl CommandSequenceState {
    fn idle() -> Self {
        CommandSequenceState {
            status: SequenceStatus::Idle,
            step_entered: None,
            held_since: None,
            pending: None,
        }
    }

    fn enter_step(&mut self, step: usize, now: DateTime<Utc>) {
        self.status = SequenceStatus::Armed { step };
        self.step_entered = Some(now);
        self.held_since = None;
        self.pending = None;
    }
}

/// A command the runner should write this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub sequence_id: String,
    pub target: u8,
    pub command: Command,
}

struct Sequence {
    config: SequenceConfig,
    state: CommandSequenceState,
    /// Queue position of the pending command. Lower goes first.
    ticket: u64,
}

impl Sequence {
    /// Index of the step being watched, if any.
    fn watched_step(&self) -> Option<usize> {
        match self.state.status {
            SequenceStatus::Idle if self.config.start == StartMode::Automatic => Some(0),
            SequenceStatus::Armed { step } => Some(step),
            _ => None,
        }
    }

    /// Advances timers against `collection`. Returns true when a step became
    /// satisfied this cycle.
    fn observe(&mut self, collection: &PacketCollection) -> bool {
        let Some(index) = self.watched_step() else {
            return false;
        };
        let now = collection.timestamp;
        let step = &self.config.steps[index];

        if self.state.pending.is_none() {
            match collection
                .reading_for(self.config.target)
                .and_then(|reading| step.when.holds(reading))
            {
                Some(true) => {
                    let since = *self.state.held_since.get_or_insert(now);
                    if now - since >= step.hold_duration() {
                        debug!("{}: step {index} satisfied", self.config.id);
                        self.state.status = SequenceStatus::Armed { step: index };
                        // an automatic trigger starts its wait when it fires
                        self.state.step_entered.get_or_insert(now);
                        self.state.pending = Some(step.command);
                        return true;
                    }
                }
                Some(false) => self.state.held_since = None,
                // no reading this cycle, keep the timer running
                None => {}
            }
        }

        if let (SequenceStatus::Armed { .. }, Some(entered), Some(max_wait)) =
            (self.state.status, self.state.step_entered, step.max_wait_duration())
        {
            if now - entered > max_wait {
                let reason = match self.state.pending {
                    Some(command) => format!("{command} not written"),
                    None => "not satisfied".to_string(),
                };
                warn!(
                    "{}: step {index} {reason} within {}s, aborting",
                    self.config.id,
                    max_wait.num_seconds()
                );
                self.state.status = SequenceStatus::Aborted;
                self.state.held_since = None;
                self.state.pending = None;
            }
        }
        false
    }

    fn request(&self) -> Option<CommandRequest> {
        self.state.pending.map(|command| CommandRequest {
            sequence_id: self.config.id.clone(),
            target: self.config.target,
            command,
        })
    }
}

#[derive(Default)]
pub struct CommandEngine {
    sequences: Vec<Sequence>,
    next_ticket: u64,
}

impl CommandEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers sequences in order. Registration order breaks ties.
    pub fn from_configs(configs: &[SequenceConfig]) -> Result<Self, SolarError> {
        let mut engine = CommandEngine::new();
        for config in configs {
            engine.register(config.clone())?;
        }
        Ok(engine)
    }

    pub fn register(&mut self, config: SequenceConfig) -> Result<(), SolarError> {
        config.validate()?;
        if self.sequences.iter().any(|s| s.config.id == config.id) {
            return Err(SolarError::Config(format!(
                "duplicate command sequence id {}",
                config.id
            )));
        }
        self.sequences.push(Sequence {
            config,
            state: CommandSequenceState::idle(),
            ticket: 0,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn status(&self, id: &str) -> Option<SequenceStatus> {
        self.find(id).map(|s| s.state.status)
    }

    pub fn state(&self, id: &str) -> Option<&CommandSequenceState> {
        self.find(id).map(|s| &s.state)
    }

    /// Arms an on-request sequence at step 0. A sequence that already finished
    /// is started over; one that is running is left alone.
    pub fn request(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), SolarError> {
        let sequence = self.find_mut(id)?;
        match sequence.state.status {
            SequenceStatus::Armed { step } => {
                debug!("{id}: already running at step {step}, request ignored");
            }
            SequenceStatus::Idle | SequenceStatus::Completed | SequenceStatus::Aborted => {
                info!("{id}: requested");
                sequence.state.enter_step(0, now);
            }
        }
        Ok(())
    }

    pub fn abort(&mut self, id: &str) -> Result<(), SolarError> {
        let sequence = self.find_mut(id)?;
        info!("{id}: aborted");
        sequence.state.status = SequenceStatus::Aborted;
        sequence.state.pending = None;
        sequence.state.held_since = None;
        Ok(())
    }

    /// Feeds the latest collection to every sequence and returns the single
    /// command to write this cycle, if any.
    pub fn evaluate(&mut self, collection: &PacketCollection) -> Option<CommandRequest> {
        for sequence in &mut self.sequences {
            if sequence.observe(collection) {
                sequence.ticket = self.next_ticket;
                self.next_ticket += 1;
            }
        }

        let (chosen, _) = self
            .sequences
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state.pending.is_some())
            .min_by_key(|(index, s)| (s.ticket, *index))?;
        for (index, sequence) in self.sequences.iter().enumerate() {
            if index != chosen && sequence.state.pending.is_some() {
                debug!("{}: command deferred to a later cycle", sequence.config.id);
            }
        }
        self.sequences[chosen].request()
    }

    /// The pending command of `id` was written. Moves to the next step or completes.
    pub fn acknowledge(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), SolarError> {
        let sequence = self.find_mut(id)?;
        let (Some(command), SequenceStatus::Armed { step }) =
            (sequence.state.pending, sequence.state.status)
        else {
            return Err(SolarError::Config(format!("{id} has no pending command")));
        };

        info!("{id}: sent {command} (step {step})");
        if step + 1 < sequence.config.steps.len() {
            sequence.state.enter_step(step + 1, now);
        } else {
            info!("{id}: completed");
            sequence.state.status = SequenceStatus::Completed;
            sequence.state.pending = None;
            sequence.state.held_since = None;
        }
        Ok(())
    }

    /// The pending command of `id` could not be written. It stays pending behind
    /// every other pending command.
    pub fn write_failed(&mut self, id: &str, error: &SolarError) {
        let ticket = self.next_ticket;
        if let Ok(sequence) = self.find_mut(id) {
            warn!("{id}: writing {:?} failed, retrying later: {error}", sequence.state.pending);
            sequence.ticket = ticket;
            self.next_ticket += 1;
        }
    }

    fn find(&self, id: &str) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.config.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Sequence, SolarError> {
        self.sequences
            .iter_mut()
            .find(|s| s.config.id == id)
            .ok_or_else(|| SolarError::UnknownSequence(id.to_string()))
    }
}
