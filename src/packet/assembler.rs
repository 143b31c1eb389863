//! Builds one `PacketCollection` per poll cycle.

use crate::packet::id::IdGenerator;
use crate::packet::{Packet, PacketCollection};
use chrono::{DateTime, Utc};

/// Identity packets appended to every collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMetadata {
    pub source_id: String,
    pub fragment_id: Option<i32>,
}

impl SourceMetadata {
    pub fn packets(&self) -> Vec<Packet> {
        let mut packets = vec![Packet::Source {
            source_id: self.source_id.clone(),
        }];
        if let Some(fragment_id) = self.fragment_id {
            packets.push(Packet::Fragment { fragment_id });
        }
        packets
    }
}

impl Default for SourceMetadata {
    fn default() -> Self {
        SourceMetadata {
            source_id: "default".to_string(),
            fragment_id: None,
        }
    }
}

pub struct Assembler {
    ids: Box<dyn IdGenerator>,
    metadata: SourceMetadata,
}

impl Assembler {
    pub fn new(ids: Box<dyn IdGenerator>, metadata: SourceMetadata) -> Self {
        Assembler { ids, metadata }
    }

    /// Wraps this cycle's packets plus the metadata packets. Performs no I/O.
    pub fn assemble(&mut self, mut packets: Vec<Packet>, now: DateTime<Utc>) -> PacketCollection {
        packets.extend(self.metadata.packets());
        PacketCollection {
            id: self.ids.generate(now),
            timestamp: now,
            packets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::id::{HourWindowIdGenerator, UniqueIdGenerator};

    #[test]
    fn test_assemble_appends_metadata() {
        let metadata = SourceMetadata {
            source_id: "cabin".into(),
            fragment_id: Some(2),
        };
        let mut assembler = Assembler::new(Box::new(UniqueIdGenerator::with_instance(1)), metadata);
        let now = Utc::now();

        let collection = assembler.assemble(Vec::new(), now);
        assert_eq!(collection.timestamp, now);
        assert_eq!(
            collection.packets,
            vec![
                Packet::Source {
                    source_id: "cabin".into()
                },
                Packet::Fragment { fragment_id: 2 },
            ]
        );
    }

    #[test]
    fn test_ids_come_from_generator() {
        let mut assembler = Assembler::new(
            Box::new(HourWindowIdGenerator::with_instance(2, 9)),
            SourceMetadata::default(),
        );
        let now = Utc::now();
        let a = assembler.assemble(Vec::new(), now);
        let b = assembler.assemble(Vec::new(), now);
        assert_ne!(a.id, b.id);
        assert_eq!(a.packets.len(), 1);
    }
}
