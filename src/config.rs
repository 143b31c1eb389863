//! # Configuration
//!
//! The acquisition program is configured by one JSON file:
//!
//! ```json
//! {
//!   "serial": { "port": "/dev/ttyUSB0", "baudrate": 9600 },
//!   "devices": [ { "kind": "rover", "address": 1 } ],
//!   "source_id": "cabin",
//!   "unique_ids_in_one_hour": 720,
//!   "cycle": { "period_ms": 5000, "minimum_wait_ms": 200 },
//!   "handlers": [
//!     { "type": "latest_file", "path": "/run/solarlink/latest.json" },
//!     { "type": "memory", "throttle": { "failure_threshold": 3, "factor": 5 } }
//!   ],
//!   "command_sequences": []
//! }
//! ```

use crate::command::{CommandEngine, SequenceConfig};
use crate::device::Device;
use crate::error::SolarError;
use crate::handler::{
    HandlerChain, LatestFileHandler, LogHandler, MemoryPacketSink, SinkHandler, ThrottlePolicy,
};
use crate::modbus::SerialConfig;
use crate::packet::{HourWindowIdGenerator, IdGenerator, SourceMetadata, UniqueIdGenerator};
use crate::polling::PollOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    pub port: String,
    #[serde(flatten)]
    pub line: SerialConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Target duration of one poll cycle.
    pub period_ms: u64,
    /// Sleep at least this long between cycles, even when a cycle overran.
    pub minimum_wait_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        CycleConfig {
            period_ms: 5000,
            minimum_wait_ms: 200,
        }
    }
}

impl CycleConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn minimum_wait(&self) -> Duration {
        Duration::from_millis(self.minimum_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerKind {
    LatestFile { path: PathBuf },
    Log,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(flatten)]
    pub kind: HandlerKind,
    #[serde(default)]
    pub throttle: Option<ThrottlePolicy>,
}

fn default_source_id() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub serial: PortConfig,
    pub devices: Vec<Device>,
    #[serde(default = "default_source_id")]
    pub source_id: String,
    #[serde(default)]
    pub fragment_id: Option<i32>,
    /// Selects bounded ids, unique for this many collections per hour.
    #[serde(default)]
    pub unique_ids_in_one_hour: Option<u32>,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub send_error_packets: bool,
    #[serde(default)]
    pub debug_modbus_timeout: bool,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
    #[serde(default)]
    pub command_sequences: Vec<SequenceConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, SolarError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SolarError> {
        let config: AppConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SolarError> {
        self.serial.line.validate()?;
        if self.serial.port.trim().is_empty() {
            return Err(SolarError::Config("serial.port must not be empty".into()));
        }
        if self.devices.is_empty() {
            return Err(SolarError::Config("at least one device is required".into()));
        }

        let mut addresses = HashSet::new();
        for device in &self.devices {
            if !(1..=247).contains(&device.address) {
                return Err(SolarError::Config(format!(
                    "device address {} outside 1..=247",
                    device.address
                )));
            }
            if !addresses.insert(device.address) {
                return Err(SolarError::Config(format!(
                    "duplicate device address {}",
                    device.address
                )));
            }
        }

        if self.unique_ids_in_one_hour == Some(0) {
            return Err(SolarError::Config("unique_ids_in_one_hour must be > 0".into()));
        }
        if self.cycle.period_ms == 0 {
            return Err(SolarError::Config("cycle.period_ms must be > 0".into()));
        }

        for handler in &self.handlers {
            if let Some(throttle) = handler.throttle {
                if throttle.failure_threshold == 0 || throttle.factor == 0 {
                    return Err(SolarError::Config(
                        "throttle failure_threshold and factor must be > 0".into(),
                    ));
                }
            }
        }

        for sequence in &self.command_sequences {
            sequence.validate()?;
            let target = self
                .devices
                .iter()
                .find(|d| d.address == sequence.target)
                .ok_or_else(|| {
                    SolarError::Config(format!(
                        "command sequence {} targets unknown address {}",
                        sequence.id, sequence.target
                    ))
                })?;
            for step in &sequence.steps {
                target.command_registers(step.command)?;
            }
        }
        // duplicate sequence ids are rejected here rather than at startup
        CommandEngine::from_configs(&self.command_sequences)?;
        Ok(())
    }

    pub fn id_generator(&self) -> Box<dyn IdGenerator> {
        match self.unique_ids_in_one_hour {
            Some(n) => Box::new(HourWindowIdGenerator::new(n)),
            None => Box::new(UniqueIdGenerator::new()),
        }
    }

    pub fn source_metadata(&self) -> SourceMetadata {
        SourceMetadata {
            source_id: self.source_id.clone(),
            fragment_id: self.fragment_id,
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            send_error_packets: self.send_error_packets,
            debug_modbus_timeout: self.debug_modbus_timeout,
        }
    }

    /// Builds the handler chain. With no handlers configured, collections are logged.
    pub fn handler_chain(&self) -> HandlerChain {
        let mut chain = HandlerChain::new();
        for handler in &self.handlers {
            match &handler.kind {
                HandlerKind::LatestFile { path } => {
                    chain.push(LatestFileHandler::new(path.clone()), handler.throttle)
                }
                HandlerKind::Log => chain.push(LogHandler::new(), handler.throttle),
                HandlerKind::Memory => chain.push(
                    SinkHandler::new("memory", MemoryPacketSink::new()),
                    handler.throttle,
                ),
            }
        }
        if chain.is_empty() {
            chain.push(LogHandler::new(), None);
        }
        chain
    }

    pub fn command_engine(&self) -> Result<CommandEngine, SolarError> {
        CommandEngine::from_configs(&self.command_sequences)
    }
}
