//! # Runner
//!
//! The runner owns the bus and drives every cycle on one task:
//!
//! 1. poll each device in configured order,
//! 2. assemble the cycle's collection and hand it to the dispatch worker,
//! 3. let the command engine pick at most one command and write it,
//! 4. sleep until the next cycle.
//!
//! Reads and writes never overlap because the bus is only touched here. The
//! handler chain runs on its own task and receives collections over a bounded
//! channel. The hand-off never waits: while the worker is behind (a sink that
//! hangs, say) and the queue is full, new collections are dropped with a
//! warning and polling goes on. Shutdown is observed between cycles; the
//! dispatch worker drains whatever is queued before it exits.
//!
//! A command written in one cycle shows up as a `CommandFeedback` packet in the
//! next cycle's collection.

use crate::command::{CommandEngine, CommandRequest};
use crate::config::{AppConfig, CycleConfig};
use crate::device::Device;
use crate::error::SolarError;
use crate::handler::{DeliveryStatus, HandlerChain};
use crate::health::HealthReporter;
use crate::modbus::{SerialPort, SlaveBus};
use crate::packet::{Assembler, Packet, PacketCollection};
use crate::polling::{
    CacheReload, DevicePoller, NoCacheReload, PollOptions, SuccessOutcome, SuccessReporter,
};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const DISPATCH_QUEUE: usize = 16;

/// Sleep between cycles: the rest of the period, but never less than the minimum wait.
pub fn pacing_delay(elapsed: Duration, cycle: &CycleConfig) -> Duration {
    cycle
        .period()
        .saturating_sub(elapsed)
        .max(cycle.minimum_wait())
}

/// Starts the task that feeds collections through `chain`. The task ends once
/// every sender is dropped and the queue is empty, returning the chain.
pub fn spawn_dispatcher(
    mut chain: HandlerChain,
) -> (mpsc::Sender<Arc<PacketCollection>>, JoinHandle<HandlerChain>) {
    let (tx, mut rx) = mpsc::channel::<Arc<PacketCollection>>(DISPATCH_QUEUE);
    let handle = tokio::spawn(async move {
        while let Some(collection) = rx.recv().await {
            let statuses = chain.dispatch(&collection).await;
            let failed = statuses
                .iter()
                .filter(|s| **s == DeliveryStatus::Failed)
                .count();
            debug!(
                "Dispatched {} to {} handlers ({failed} failed)",
                collection.id,
                statuses.len()
            );
        }
        chain
    });
    (tx, handle)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Written(CommandRequest),
    Failed(CommandRequest),
}

#[derive(Debug)]
pub struct CycleSummary {
    pub collection: Arc<PacketCollection>,
    pub outcomes: Vec<SuccessOutcome>,
    pub command: Option<CommandOutcome>,
    /// False when the collection was dropped instead of queued for the handlers.
    pub dispatched: bool,
}

pub struct Runner<P: SerialPort> {
    bus: SlaveBus<P>,
    pollers: Vec<DevicePoller>,
    assembler: Assembler,
    engine: CommandEngine,
    reporter: Box<dyn SuccessReporter>,
    cache_reload: Box<dyn CacheReload>,
    options: PollOptions,
    cycle: CycleConfig,
    feedback: Vec<Packet>,
    dispatch_lost_logged: bool,
}

impl<P: SerialPort> Runner<P> {
    pub fn new(
        bus: SlaveBus<P>,
        devices: Vec<Device>,
        assembler: Assembler,
        engine: CommandEngine,
        options: PollOptions,
        cycle: CycleConfig,
    ) -> Self {
        Runner {
            bus,
            pollers: devices.into_iter().map(DevicePoller::new).collect(),
            assembler,
            engine,
            reporter: Box::new(HealthReporter::new("bus", 3)),
            cache_reload: Box::new(NoCacheReload),
            options,
            cycle,
            feedback: Vec::new(),
            dispatch_lost_logged: false,
        }
    }

    pub fn from_config(config: &AppConfig, port: P) -> Result<Self, SolarError> {
        let bus = SlaveBus::new(port, config.serial.line.response_timeout());
        let assembler = Assembler::new(config.id_generator(), config.source_metadata());
        let runner = Runner::new(
            bus,
            config.devices.clone(),
            assembler,
            config.command_engine()?,
            config.poll_options(),
            config.cycle.clone(),
        );
        Ok(runner.with_reporter(Box::new(HealthReporter::new(config.serial.port.clone(), 3))))
    }

    pub fn with_reporter(mut self, reporter: Box<dyn SuccessReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cache_reload(mut self, cache_reload: Box<dyn CacheReload>) -> Self {
        self.cache_reload = cache_reload;
        self
    }

    pub fn engine_mut(&mut self) -> &mut CommandEngine {
        &mut self.engine
    }

    pub fn pollers(&self) -> &[DevicePoller] {
        &self.pollers
    }

    /// Runs one full cycle. Waits only on the bus.
    pub async fn run_cycle(
        &mut self,
        now: DateTime<Utc>,
        dispatch: &mpsc::Sender<Arc<PacketCollection>>,
    ) -> CycleSummary {
        let mut packets = Vec::new();
        let mut outcomes = Vec::with_capacity(self.pollers.len());
        for poller in &mut self.pollers {
            let report = poller
                .poll(
                    &mut self.bus,
                    self.cache_reload.as_mut(),
                    self.reporter.as_mut(),
                    self.options,
                )
                .await;
            outcomes.push(report.outcome);
            packets.extend(report.into_packets());
        }

        packets.append(&mut self.feedback);

        let collection = Arc::new(self.assembler.assemble(packets, now));
        let dispatched = self.hand_off(&collection, dispatch);

        let command = self.run_command(&collection).await;
        if let Some(CommandOutcome::Written(request)) = &command {
            self.feedback.push(Packet::CommandFeedback {
                sequence_id: request.sequence_id.clone(),
                command: request.command,
                target: request.target,
            });
        }
        CycleSummary {
            collection,
            outcomes,
            command,
            dispatched,
        }
    }

    fn hand_off(
        &mut self,
        collection: &Arc<PacketCollection>,
        dispatch: &mpsc::Sender<Arc<PacketCollection>>,
    ) -> bool {
        match dispatch.try_send(Arc::clone(collection)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Handlers are {DISPATCH_QUEUE} collections behind, dropping {}",
                    collection.id
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                if !self.dispatch_lost_logged {
                    error!("Dispatch worker stopped, collections are no longer delivered");
                    self.dispatch_lost_logged = true;
                }
                false
            }
        }
    }

    async fn run_command(&mut self, collection: &PacketCollection) -> Option<CommandOutcome> {
        let request = self.engine.evaluate(collection)?;
        let device = self
            .pollers
            .iter()
            .map(DevicePoller::device)
            .find(|d| d.address == request.target)
            .cloned();

        let result = match device {
            Some(device) => device.write(&mut self.bus, request.command).await,
            None => Err(SolarError::Config(format!(
                "no device at address {}",
                request.target
            ))),
        };
        match result {
            Ok(()) => {
                if let Err(e) = self.engine.acknowledge(&request.sequence_id, collection.timestamp) {
                    error!("Could not advance {}: {e}", request.sequence_id);
                }
                Some(CommandOutcome::Written(request))
            }
            Err(e) => {
                self.engine.write_failed(&request.sequence_id, &e);
                Some(CommandOutcome::Failed(request))
            }
        }
    }

    /// Cycles until `shutdown` turns true (or its sender is dropped), then waits
    /// for the dispatch worker to drain.
    pub async fn run(
        mut self,
        chain: HandlerChain,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<HandlerChain, SolarError> {
        let (dispatch, worker) = spawn_dispatcher(chain);
        info!("Polling {} devices every {:?}", self.pollers.len(), self.cycle.period());

        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = Instant::now();
            self.run_cycle(Utc::now(), &dispatch).await;

            let delay = pacing_delay(started.elapsed(), &self.cycle);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Shutting down, draining queued collections");
        drop(dispatch);
        worker
            .await
            .map_err(|e| SolarError::SinkDelivery(format!("dispatch worker failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_delay() {
        let cycle = CycleConfig {
            period_ms: 1000,
            minimum_wait_ms: 100,
        };
        assert_eq!(pacing_delay(Duration::from_millis(300), &cycle), Duration::from_millis(700));
        assert_eq!(pacing_delay(Duration::from_millis(950), &cycle), Duration::from_millis(100));
        assert_eq!(pacing_delay(Duration::from_secs(5), &cycle), Duration::from_millis(100));
    }
}
