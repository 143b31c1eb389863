//! # Error Handling
//!
//! This module defines the `SolarError` enum, which represents the different error
//! types that can occur in the solarlink crate. Frame-level decode failures have their
//! own type (`crate::modbus::frame::DecodeError`) and are wrapped here once they leave
//! the codec.

use crate::modbus::frame::{DecodeError, FailureKind};
use thiserror::Error;

/// Represents the different error types that can occur in the crate.
#[derive(Debug, Error)]
pub enum SolarError {
    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// No bytes arrived before the per-call deadline, or the stream is not connected.
    #[error("Timed out waiting for a response from slave {address}")]
    TransportTimeout { address: u8 },

    /// A response frame could not be decoded or the device reported an exception.
    #[error("Error decoding response: {0}")]
    Decode(#[from] DecodeError),

    /// The response decoded but did not match what the register table expected.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The device family has no mapping for the requested command.
    #[error("Command {command} is not supported by {device}")]
    UnsupportedCommand { command: String, device: String },

    /// A packet handler failed to deliver a collection.
    #[error("Sink delivery error: {0}")]
    SinkDelivery(String),

    /// No command sequence is registered under this id.
    #[error("Unknown command sequence: {0}")]
    UnknownSequence(String),

    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SolarError {
    /// Classifies this error into the operator-facing failure taxonomy.
    ///
    /// Returns `None` for errors that do not come from talking to a device.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SolarError::TransportTimeout { .. } => Some(FailureKind::TransportTimeout),
            SolarError::Decode(e) => Some(e.kind()),
            SolarError::UnexpectedResponse(_) => Some(FailureKind::FramingError),
            SolarError::SerialPortError(_) | SolarError::Io(_) => Some(FailureKind::Io),
            _ => None,
        }
    }
}
