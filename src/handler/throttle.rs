//! Throttled delivery for handlers whose endpoint is down.
//!
//! After `failure_threshold` consecutive failures only every `factor`-th cycle
//! attempts delivery; the others report `Delivery::Skipped`. One success
//! restores normal delivery.

use crate::error::SolarError;
use crate::handler::{Delivery, PacketHandler};
use crate::packet::PacketCollection;
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottlePolicy {
    pub failure_threshold: u32,
    /// Attempt one cycle in `factor` while throttled. 1 never skips.
    pub factor: u32,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        ThrottlePolicy {
            failure_threshold: 3,
            factor: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleState {
    pub consecutive_failures: u32,
    /// Cycles since the last attempt while throttled.
    pub skipped: u32,
}

impl ThrottleState {
    pub fn is_throttled(&self, policy: &ThrottlePolicy) -> bool {
        self.consecutive_failures >= policy.failure_threshold
    }

    /// Decides whether this cycle attempts delivery.
    pub fn begin_cycle(&mut self, policy: &ThrottlePolicy) -> bool {
        if !self.is_throttled(policy) {
            return true;
        }
        self.skipped += 1;
        if self.skipped >= policy.factor.max(1) {
            self.skipped = 0;
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.skipped = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

pub struct ThrottledHandler<H> {
    inner: H,
    policy: ThrottlePolicy,
    state: ThrottleState,
}

impl<H: PacketHandler> ThrottledHandler<H> {
    pub fn new(inner: H, policy: ThrottlePolicy) -> Self {
        ThrottledHandler {
            inner,
            policy,
            state: ThrottleState::default(),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: PacketHandler> PacketHandler for ThrottledHandler<H> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&mut self, collection: &PacketCollection) -> Result<Delivery, SolarError> {
        if !self.state.begin_cycle(&self.policy) {
            return Ok(Delivery::Skipped);
        }
        match self.inner.handle(collection).await {
            Ok(delivery) => {
                if self.state.is_throttled(&self.policy) {
                    info!("{}: delivering again after {} failures", self.inner.name(), self.state.consecutive_failures);
                }
                self.state.record_success();
                Ok(delivery)
            }
            Err(e) => {
                self.state.record_failure();
                if self.state.consecutive_failures == self.policy.failure_threshold {
                    info!(
                        "{}: throttling to one attempt in {} cycles",
                        self.inner.name(),
                        self.policy.factor
                    );
                }
                Err(e)
            }
        }
    }

    fn throttle_state(&self) -> Option<ThrottleState> {
        Some(self.state)
    }
}
