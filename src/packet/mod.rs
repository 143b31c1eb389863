//! # Packets and Packet Collections
//!
//! A `Packet` is the unit carried downstream: a device reading, a metadata
//! marker, or an error marker. Every poll cycle produces one
//! `PacketCollection`; collections are immutable once assembled and are shared
//! with the handler chain behind an `Arc`.

pub mod assembler;
pub mod id;

use crate::device::{Command, Reading};
use crate::modbus::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use assembler::{Assembler, SourceMetadata};
pub use id::{HourWindowIdGenerator, IdGenerator, UniqueIdGenerator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "packet_type", rename_all = "snake_case")]
pub enum Packet {
    Reading(Reading),
    /// Names the acquisition process that produced the collection.
    Source { source_id: String },
    /// Distinguishes instances that share a `source_id`.
    Fragment { fragment_id: i32 },
    /// A device could not be read this cycle.
    Error {
        kind: FailureKind,
        message: String,
        catch_location: String,
        device: String,
    },
    /// A command sequence wrote `command` to the slave at `target` during the
    /// previous cycle.
    CommandFeedback {
        sequence_id: String,
        command: Command,
        target: u8,
    },
}

/// All packets from one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketCollection {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub packets: Vec<Packet>,
}

impl PacketCollection {
    pub fn readings(&self) -> impl Iterator<Item = &Reading> {
        self.packets.iter().filter_map(|packet| match packet {
            Packet::Reading(reading) => Some(reading),
            _ => None,
        })
    }

    /// The reading from the slave at `address`, if it answered this cycle.
    pub fn reading_for(&self, address: u8) -> Option<&Reading> {
        self.readings().find(|reading| reading.address() == address)
    }

    /// Commands written since the previous collection.
    pub fn command_feedback(&self) -> impl Iterator<Item = (&str, Command, u8)> {
        self.packets.iter().filter_map(|packet| match packet {
            Packet::CommandFeedback {
                sequence_id,
                command,
                target,
            } => Some((sequence_id.as_str(), *command, *target)),
            _ => None,
        })
    }

    pub fn has_errors(&self) -> bool {
        self.packets
            .iter()
            .any(|packet| matches!(packet, Packet::Error { .. }))
    }
}
