//! Writes a one-line summary of each collection to the log.

use crate::error::SolarError;
use crate::handler::{Delivery, PacketHandler};
use crate::packet::{Packet, PacketCollection};
use async_trait::async_trait;
use log::{debug, info, log_enabled, Level};

#[derive(Debug, Default)]
pub struct LogHandler;

impl LogHandler {
    pub fn new() -> Self {
        LogHandler
    }
}

pub fn summarize(collection: &PacketCollection) -> String {
    let mut parts = Vec::new();
    for packet in &collection.packets {
        match packet {
            Packet::Reading(reading) => {
                let voltage = reading
                    .field("battery_voltage")
                    .map(|v| format!(" {v:.2}V"))
                    .unwrap_or_default();
                parts.push(format!("{}:{}{voltage}", reading.kind(), reading.address()));
            }
            Packet::Error { device, kind, .. } => parts.push(format!("{device} {kind:?}")),
            Packet::CommandFeedback {
                sequence_id,
                command,
                target,
            } => parts.push(format!("{sequence_id} sent {command} to {target}")),
            Packet::Source { .. } | Packet::Fragment { .. } => {}
        }
    }
    format!("collection {} [{}]", collection.id, parts.join(", "))
}

#[async_trait]
impl PacketHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&mut self, collection: &PacketCollection) -> Result<Delivery, SolarError> {
        info!("{}", summarize(collection));
        if log_enabled!(Level::Debug) {
            debug!("{}", serde_json::to_string(collection)?);
        }
        Ok(Delivery::Delivered)
    }
}
