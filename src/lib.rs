//! # solarlink - Solar Charge Controller Acquisition over Modbus RTU
//!
//! solarlink polls solar charge controllers and DC shunts on a shared RS-485
//! line, packages every cycle's readings into a uniquely identified packet
//! collection, fans the collection out to a chain of independently throttled
//! handlers, and runs automated command sequences (for example switching a
//! generator relay on a low battery) against the latest readings.
//!
//! ## Layers
//!
//! - `modbus`: RTU frame codec, slave bus, serial port plumbing
//! - `device`: register tables for the Renogy Rover and the PZEM-017 shunt
//! - `polling`: per-device polling with failure classification
//! - `packet`: packets, collections, id generators and the assembler
//! - `handler`: the packet handler chain and its sinks
//! - `command`: the command sequence engine
//! - `runtime`: the runner tying everything together
//!
//! ## Usage
//!
//! ```rust,no_run
//! use solarlink::{AppConfig, ReloadablePort, Runner};
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), solarlink::SolarError> {
//! let config = AppConfig::load(Path::new("solarlink.json"))?;
//! let port = ReloadablePort::open(&config.serial.port, config.serial.line.clone());
//! let runner = Runner::from_config(&config, port)?;
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! runner.run(config.handler_chain(), shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod handler;
pub mod health;
pub mod logging;
pub mod modbus;
pub mod packet;
pub mod polling;
pub mod runtime;
pub mod util;

pub use crate::error::SolarError;
pub use crate::logging::{init_logger, init_logger_with, log_info};

pub use command::{CommandEngine, CommandRequest, SequenceConfig, SequenceStatus};
pub use config::AppConfig;
pub use device::{Command, Device, DeviceKind, Reading};
pub use handler::{DeliveryStatus, HandlerChain, PacketHandler, PacketSink};
pub use health::HealthReporter;
pub use modbus::{
    decode, decode_response, encode, DecodeError, FailureKind, Frame, ReloadablePort, SerialPort,
    SlaveBus,
};
pub use packet::{Assembler, Packet, PacketCollection};
pub use polling::{DevicePoller, SuccessOutcome, SuccessReporter};
pub use runtime::Runner;
