//! # Packet Handler Chain
//!
//! Every collection is offered to each configured handler in order. Handlers are
//! composed from small decorators:
//!
//! - `ThrottledHandler` skips most attempts while its inner handler keeps failing.
//! - `IsolatedHandler` turns a handler's error or panic into a logged
//!   `DeliveryStatus`, so one failing sink never stops delivery to the ones
//!   after it.
//!
//! There is no cross-handler transaction: a later failure never undoes an
//! earlier delivery.

pub mod file;
pub mod log_handler;
pub mod sink;
pub mod throttle;

use crate::error::SolarError;
use crate::packet::PacketCollection;
use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;

pub use file::LatestFileHandler;
pub use log_handler::LogHandler;
pub use sink::{MemoryPacketSink, PacketSink, RevisionToken, SinkError, SinkHandler};
pub use throttle::{ThrottlePolicy, ThrottleState, ThrottledHandler};

/// What a handler did with a collection when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The attempt was skipped by a throttle.
    Skipped,
}

#[async_trait]
pub trait PacketHandler: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn handle(&mut self, collection: &PacketCollection) -> Result<Delivery, SolarError>;

    /// Throttle counters, when this handler is or wraps a throttle.
    fn throttle_state(&self) -> Option<ThrottleState> {
        None
    }
}

/// Per-handler result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
    Throttled,
}

/// Logs a handler's failure instead of passing it on. A panic inside the
/// handler counts as a failed delivery.
pub struct IsolatedHandler {
    inner: Box<dyn PacketHandler>,
}

impl IsolatedHandler {
    pub fn new(inner: Box<dyn PacketHandler>) -> Self {
        IsolatedHandler { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn throttle_state(&self) -> Option<ThrottleState> {
        self.inner.throttle_state()
    }

    pub async fn deliver(&mut self, collection: &PacketCollection) -> DeliveryStatus {
        let attempt = AssertUnwindSafe(self.inner.handle(collection))
            .catch_unwind()
            .await;
        match attempt {
            Ok(Ok(Delivery::Delivered)) => DeliveryStatus::Delivered,
            Ok(Ok(Delivery::Skipped)) => {
                debug!("{}: skipped collection {} (throttled)", self.inner.name(), collection.id);
                DeliveryStatus::Throttled
            }
            Ok(Err(e)) => {
                warn!("{}: failed to deliver collection {}: {e}", self.inner.name(), collection.id);
                DeliveryStatus::Failed
            }
            Err(panic) => {
                error!(
                    "{}: panicked while delivering collection {}: {}",
                    self.inner.name(),
                    collection.id,
                    panic_message(&*panic)
                );
                DeliveryStatus::Failed
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<IsolatedHandler>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler`, throttled when a policy is given.
    pub fn push<H: PacketHandler + 'static>(&mut self, handler: H, throttle: Option<ThrottlePolicy>) {
        let boxed: Box<dyn PacketHandler> = match throttle {
            Some(policy) => Box::new(ThrottledHandler::new(handler, policy)),
            None => Box::new(handler),
        };
        self.handlers.push(IsolatedHandler::new(boxed));
    }

    pub fn with<H: PacketHandler + 'static>(mut self, handler: H, throttle: Option<ThrottlePolicy>) -> Self {
        self.push(handler, throttle);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handlers(&self) -> &[IsolatedHandler] {
        &self.handlers
    }

    /// Offers `collection` to every handler in configured order.
    pub async fn dispatch(&mut self, collection: &PacketCollection) -> Vec<DeliveryStatus> {
        let mut statuses = Vec::with_capacity(self.handlers.len());
        for handler in &mut self.handlers {
            statuses.push(handler.deliver(collection).await);
        }
        statuses
    }
}
