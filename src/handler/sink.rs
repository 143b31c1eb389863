//! # Packet Sinks
//!
//! A `PacketSink` is a document store for collections with optimistic
//! concurrency: every stored document has a `RevisionToken`, and replacing a
//! document requires the token of the revision being replaced.
//!
//! `SinkHandler` adapts a sink into a `PacketHandler`. It remembers the latest
//! token per collection id, so when the bounded id generator reuses an id the
//! new collection replaces the old document instead of conflicting with it.

use crate::error::SolarError;
use crate::handler::{Delivery, PacketHandler};
use crate::packet::PacketCollection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

const REMEMBERED_TOKENS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionToken(pub String);

impl fmt::Display for RevisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink unreachable: {0}")]
    Transport(String),

    #[error("Revision conflict for {id}")]
    Conflict { id: String },

    #[error("No document {id}")]
    NotFound { id: String },
}

impl From<SinkError> for SolarError {
    fn from(e: SinkError) -> Self {
        SolarError::SinkDelivery(e.to_string())
    }
}

#[async_trait]
pub trait PacketSink: Send {
    /// Stores `collection`. `previous` must be the current revision when a
    /// document with the same id already exists.
    async fn put(
        &mut self,
        collection: &PacketCollection,
        previous: Option<RevisionToken>,
    ) -> Result<RevisionToken, SinkError>;

    /// Collections with `from <= timestamp < to`, oldest first.
    async fn query(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PacketCollection>, SinkError>;

    async fn delete(&mut self, id: &str, token: &RevisionToken) -> Result<(), SinkError>;
}

pub struct SinkHandler<S> {
    name: String,
    sink: S,
    tokens: HashMap<String, RevisionToken>,
    order: VecDeque<String>,
}

impl<S: PacketSink> SinkHandler<S> {
    pub fn new(name: impl Into<String>, sink: S) -> Self {
        SinkHandler {
            name: name.into(),
            sink,
            tokens: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn remember(&mut self, id: &str, token: RevisionToken) {
        if self.tokens.insert(id.to_string(), token).is_none() {
            self.order.push_back(id.to_string());
            if self.order.len() > REMEMBERED_TOKENS {
                if let Some(oldest) = self.order.pop_front() {
                    self.tokens.remove(&oldest);
                }
            }
        }
    }
}

#[async_trait]
impl<S: PacketSink> PacketHandler for SinkHandler<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&mut self, collection: &PacketCollection) -> Result<Delivery, SolarError> {
        let previous = self.tokens.get(&collection.id).cloned();
        let token = self.sink.put(collection, previous).await?;
        debug!("{}: stored {} at revision {token}", self.name, collection.id);
        self.remember(&collection.id, token);
        Ok(Delivery::Delivered)
    }
}

#[derive(Default)]
struct MemoryStore {
    documents: HashMap<String, (PacketCollection, u64)>,
    next_revision: u64,
    offline: bool,
}

fn lock(store: &Mutex<MemoryStore>) -> MutexGuard<'_, MemoryStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process store. Clones share the same documents.
#[derive(Clone, Default)]
pub struct MemoryPacketSink {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryPacketSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `SinkError::Transport`.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.store).offline = offline;
    }

    pub fn len(&self) -> usize {
        lock(&self.store).documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<PacketCollection> {
        lock(&self.store).documents.get(id).map(|(c, _)| c.clone())
    }
}

fn token_of(revision: u64) -> RevisionToken {
    RevisionToken(format!("{revision}"))
}

#[async_trait]
impl PacketSink for MemoryPacketSink {
    async fn put(
        &mut self,
        collection: &PacketCollection,
        previous: Option<RevisionToken>,
    ) -> Result<RevisionToken, SinkError> {
        let mut store = lock(&self.store);
        if store.offline {
            return Err(SinkError::Transport("memory sink offline".into()));
        }
        let current = store.documents.get(&collection.id).map(|(_, rev)| token_of(*rev));
        if current != previous {
            return Err(SinkError::Conflict {
                id: collection.id.clone(),
            });
        }
        store.next_revision += 1;
        let revision = store.next_revision;
        store
            .documents
            .insert(collection.id.clone(), (collection.clone(), revision));
        Ok(token_of(revision))
    }

    async fn query(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PacketCollection>, SinkError> {
        let store = lock(&self.store);
        if store.offline {
            return Err(SinkError::Transport("memory sink offline".into()));
        }
        let mut found: Vec<PacketCollection> = store
            .documents
            .values()
            .map(|(c, _)| c)
            .filter(|c| c.timestamp >= from && c.timestamp < to)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.timestamp);
        Ok(found)
    }

    async fn delete(&mut self, id: &str, token: &RevisionToken) -> Result<(), SinkError> {
        let mut store = lock(&self.store);
        if store.offline {
            return Err(SinkError::Transport("memory sink offline".into()));
        }
        match store.documents.get(id) {
            None => Err(SinkError::NotFound { id: id.to_string() }),
            Some((_, rev)) if token_of(*rev) != *token => Err(SinkError::Conflict { id: id.to_string() }),
            Some(_) => {
                store.documents.remove(id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::collection;
    use chrono::Duration;

    #[tokio::test]
    async fn test_put_requires_current_token() {
        let mut sink = MemoryPacketSink::new();
        let c = collection("a");

        let first = sink.put(&c, None).await.unwrap();
        assert!(matches!(sink.put(&c, None).await, Err(SinkError::Conflict { .. })));
        let second = sink.put(&c, Some(first.clone())).await.unwrap();
        assert_ne!(first, second);
        assert!(matches!(sink.put(&c, Some(first)).await, Err(SinkError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_delete() {
        let mut sink = MemoryPacketSink::new();
        let token = sink.put(&collection("a"), None).await.unwrap();

        let stale = RevisionToken("999".into());
        assert!(matches!(sink.delete("a", &stale).await, Err(SinkError::Conflict { .. })));
        sink.delete("a", &token).await.unwrap();
        assert!(matches!(sink.delete("a", &token).await, Err(SinkError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_query_range() {
        let mut sink = MemoryPacketSink::new();
        let base = Utc::now();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let mut c = collection(id);
            c.timestamp = base + Duration::seconds(i as i64);
            sink.put(&c, None).await.unwrap();
        }
        let found = sink.query(base, base + Duration::seconds(2)).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_handler_overwrites_reused_id() {
        let sink = MemoryPacketSink::new();
        let mut handler = SinkHandler::new("memory", sink.clone());

        let mut c = collection("reused");
        handler.handle(&c).await.unwrap();
        c.packets.push(crate::packet::Packet::Fragment { fragment_id: 1 });
        handler.handle(&c).await.unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get("reused").unwrap().packets.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_sink_is_delivery_error() {
        let sink = MemoryPacketSink::new();
        sink.set_offline(true);
        let mut handler = SinkHandler::new("memory", sink.clone());

        let err = handler.handle(&collection("a")).await.unwrap_err();
        assert!(matches!(err, SolarError::SinkDelivery(_)));
        assert!(sink.is_empty());
    }
}
