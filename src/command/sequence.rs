//! Command sequence definitions as they appear in the configuration file.

use crate::device::{Command, Reading};
use crate::error::SolarError;
use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Step 0 is watched from startup.
    #[default]
    Automatic,
    /// Nothing happens until the sequence is requested.
    OnRequest,
}

/// A threshold on one numeric reading field. With both bounds set the value
/// must lie strictly between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(default)]
    pub above: Option<f64>,
    #[serde(default)]
    pub below: Option<f64>,
}

impl Condition {
    pub fn above(field: &str, threshold: f64) -> Self {
        Condition {
            field: field.to_string(),
            above: Some(threshold),
            below: None,
        }
    }

    pub fn below(field: &str, threshold: f64) -> Self {
        Condition {
            field: field.to_string(),
            above: None,
            below: Some(threshold),
        }
    }

    /// `None` when the reading has no such field.
    pub fn holds(&self, reading: &Reading) -> Option<bool> {
        let value = reading.field(&self.field)?;
        let above = self.above.map_or(true, |t| value > t);
        let below = self.below.map_or(true, |t| value < t);
        Some(above && below)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub when: Condition,
    /// How long the condition must hold without interruption.
    #[serde(default)]
    pub hold_seconds: u64,
    /// Abort the sequence if this step is not satisfied in time.
    #[serde(default)]
    pub max_wait_seconds: Option<u64>,
    pub command: Command,
}

impl StepConfig {
    pub fn new(when: Condition, command: Command) -> Self {
        StepConfig {
            when,
            hold_seconds: 0,
            max_wait_seconds: None,
            command,
        }
    }

    pub fn hold(mut self, seconds: u64) -> Self {
        self.hold_seconds = seconds;
        self
    }

    pub fn max_wait(mut self, seconds: u64) -> Self {
        self.max_wait_seconds = Some(seconds);
        self
    }

    pub(crate) fn hold_duration(&self) -> Duration {
        Duration::seconds(self.hold_seconds as i64)
    }

    pub(crate) fn max_wait_duration(&self) -> Option<Duration> {
        self.max_wait_seconds.map(|s| Duration::seconds(s as i64))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub id: String,
    /// Slave address whose readings drive the predicates and receive the commands.
    pub target: u8,
    #[serde(default)]
    pub start: StartMode,
    pub steps: Vec<StepConfig>,
}

impl SequenceConfig {
    pub fn validate(&self) -> Result<(), SolarError> {
        if self.id.trim().is_empty() {
            return Err(SolarError::Config("command sequence id must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(SolarError::Config(format!("command sequence {} has no steps", self.id)));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.when.above.is_none() && step.when.below.is_none() {
                return Err(SolarError::Config(format!(
                    "step {i} of {} needs `above` or `below`",
                    self.id
                )));
            }
        }
        Ok(())
    }
}
