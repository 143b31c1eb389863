//! # Polling Loop
//!
//! One `DevicePoller` per configured device. Each call to `poll` reads the
//! device once, classifies the result into a `SuccessOutcome`, reports it to the
//! `SuccessReporter` exactly once, and returns a `PollReport`. Bus and decode
//! errors stop here: only a successful `Reading` (and, when enabled, an error
//! packet) travels further.
//!
//! | bus result                      | outcome            |
//! |---------------------------------|--------------------|
//! | reading                         | `Success`          |
//! | no bytes before the deadline    | `Timeout`          |
//! | partial, garbled or bad CRC     | `SuccessWithError` |
//! | exception response              | `SuccessWithError` |
//! | other port error                | `SuccessWithError` |

use crate::constants::MODBUS_READ_CATCH_LOCATION;
use crate::device::{Device, DeviceKind, Reading};
use crate::error::SolarError;
use crate::modbus::{DecodeError, ExceptionCode, FailureKind, SerialPort, SlaveBus};
use crate::packet::Packet;
use crate::util::hex::split_hex;
use log::{debug, error, info, warn, Level};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessOutcome {
    Success,
    /// The device answered, but not with a usable reading.
    SuccessWithError,
    Timeout,
}

/// Receives exactly one call per poll.
pub trait SuccessReporter: Send {
    fn report_success(&mut self);
    fn report_success_with_error(&mut self);
    fn report_timeout(&mut self);

    fn report(&mut self, outcome: SuccessOutcome) {
        match outcome {
            SuccessOutcome::Success => self.report_success(),
            SuccessOutcome::SuccessWithError => self.report_success_with_error(),
            SuccessOutcome::Timeout => self.report_timeout(),
        }
    }
}

/// Discards every report.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl SuccessReporter for NoopReporter {
    fn report_success(&mut self) {}
    fn report_success_with_error(&mut self) {}
    fn report_timeout(&mut self) {}
}

/// Runs before every read attempt. A failure is logged and the read goes ahead.
pub trait CacheReload: Send {
    fn reload(&mut self) -> Result<(), SolarError>;
}

/// Reload hook that does nothing.
#[derive(Debug, Default)]
pub struct NoCacheReload;

impl CacheReload for NoCacheReload {
    fn reload(&mut self) -> Result<(), SolarError> {
        Ok(())
    }
}

impl<F> CacheReload for F
where
    F: FnMut() -> Result<(), SolarError> + Send,
{
    fn reload(&mut self) -> Result<(), SolarError> {
        self()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOptions {
    /// Attach an error packet to the collection when a read fails.
    pub send_error_packets: bool,
    /// Log each timeout at debug instead of error.
    pub debug_modbus_timeout: bool,
}

#[derive(Debug)]
pub struct PollReport {
    pub outcome: SuccessOutcome,
    pub reading: Option<Reading>,
    pub error_packet: Option<Packet>,
    /// Level the timeout diagnostic was logged at. `None` unless the outcome is `Timeout`.
    pub timeout_severity: Option<Level>,
    pub elapsed: Duration,
}

impl PollReport {
    /// Packets this poll contributes to the cycle's collection.
    pub fn into_packets(self) -> Vec<Packet> {
        self.reading
            .map(Packet::Reading)
            .into_iter()
            .chain(self.error_packet)
            .collect()
    }
}

pub struct DevicePoller {
    device: Device,
    has_been_successful: bool,
    wiring_hint_logged: bool,
    hinted_exceptions: HashSet<ExceptionCode>,
}

impl DevicePoller {
    pub fn new(device: Device) -> Self {
        DevicePoller {
            device,
            has_been_successful: false,
            wiring_hint_logged: false,
            hinted_exceptions: HashSet::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn has_been_successful(&self) -> bool {
        self.has_been_successful
    }

    pub async fn poll<P: SerialPort>(
        &mut self,
        bus: &mut SlaveBus<P>,
        cache_reload: &mut dyn CacheReload,
        reporter: &mut dyn SuccessReporter,
        options: PollOptions,
    ) -> PollReport {
        if let Err(e) = cache_reload.reload() {
            warn!("Cache reload before reading {} failed: {e}", self.device.identifier());
        }

        let started = Instant::now();
        let result = self.device.read(bus).await;
        let elapsed = started.elapsed();

        let report = match result {
            Ok(reading) => {
                debug!("Read {} in {elapsed:?}", self.device.identifier());
                self.has_been_successful = true;
                PollReport {
                    outcome: SuccessOutcome::Success,
                    reading: Some(reading),
                    error_packet: None,
                    timeout_severity: None,
                    elapsed,
                }
            }
            Err(e) => self.classify_failure(e, elapsed, options),
        };
        reporter.report(report.outcome);
        report
    }

    fn classify_failure(&mut self, e: SolarError, elapsed: Duration, options: PollOptions) -> PollReport {
        let id = self.device.identifier();
        let kind = e.failure_kind().unwrap_or(FailureKind::Io);
        let mut timeout_severity = None;

        let outcome = match kind {
            FailureKind::TransportTimeout => {
                let level = self.log_timeout(&e, options);
                timeout_severity = Some(level);
                SuccessOutcome::Timeout
            }
            FailureKind::FramingError => {
                let raw = match &e {
                    SolarError::Decode(d) => split_hex(d.raw()),
                    _ => String::new(),
                };
                info!("Garbled response from {id}: {e} [{raw}]");
                SuccessOutcome::SuccessWithError
            }
            FailureKind::ProtocolError => {
                self.log_exception(&e);
                SuccessOutcome::SuccessWithError
            }
            FailureKind::Io => {
                error!("Error reading {id}: {e}");
                SuccessOutcome::SuccessWithError
            }
        };

        let error_packet = options.send_error_packets.then(|| Packet::Error {
            kind,
            message: e.to_string(),
            catch_location: MODBUS_READ_CATCH_LOCATION.to_string(),
            device: id,
        });

        PollReport {
            outcome,
            reading: None,
            error_packet,
            timeout_severity,
            elapsed,
        }
    }

    /// Before the first success a timeout is loud: "Got a modbus timeout" goes
    /// out at error (debug with `debug_modbus_timeout`) next to an info line, and
    /// the first one also gets a wiring hint. Once the device has answered, a
    /// timeout is most likely a loose cable and every line about it is debug.
    /// Returns the most severe level logged.
    fn log_timeout(&mut self, e: &SolarError, options: PollOptions) -> Level {
        let id = self.device.identifier();
        if self.has_been_successful {
            debug!("Got a modbus timeout from {id}: {e}");
            debug!("{id} timed out after earlier successful reads, probably transient");
            return Level::Debug;
        }

        if !self.wiring_hint_logged {
            info!(
                "{id} has never answered. Check the cable, the slave address ({}) and the baud rate.",
                self.device.address
            );
            self.wiring_hint_logged = true;
        }
        info!("{id} timed out and has not answered since startup");
        if options.debug_modbus_timeout {
            debug!("Got a modbus timeout from {id}: {e}");
            Level::Info
        } else {
            error!("Got a modbus timeout from {id}: {e}");
            Level::Error
        }
    }

    fn log_exception(&mut self, e: &SolarError) {
        let id = self.device.identifier();
        let SolarError::Decode(DecodeError::ExceptionResponse {
            function,
            code,
            raw,
            ..
        }) = e
        else {
            error!("Protocol error from {id}: {e}");
            return;
        };

        let data = raw.get(2..raw.len().saturating_sub(2)).unwrap_or_default();
        error!(
            "{id} returned exception {code}. function: 0x{function:02X} data: [{}]",
            split_hex(data)
        );
        if self.device.kind == DeviceKind::Rover && self.hinted_exceptions.insert(*code) {
            if let Some(hint) = rover_exception_hint(*code) {
                error!("{id}: {hint}");
            }
        }
    }
}

fn rover_exception_hint(code: ExceptionCode) -> Option<&'static str> {
    match code {
        ExceptionCode::UnsupportedFunction => Some("Unsupported function. This should never happen!"),
        ExceptionCode::UnsupportedRegister => {
            Some("Unsupported register. Your device probably does not support this model's register map.")
        }
        ExceptionCode::TooManyRegisters => {
            Some("Too many registers requested. Please report this as a bug.")
        }
        ExceptionCode::CannotReadMultiple => Some("Cannot read multiple registers. This is unexpected."),
        ExceptionCode::Other(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::rover::tests::sample_registers;
    use crate::modbus::serial_mock::MockSerialPort;

    #[derive(Default)]
    struct CountingReporter {
        outcomes: Vec<SuccessOutcome>,
    }

    impl SuccessReporter for CountingReporter {
        fn report_success(&mut self) {
            self.outcomes.push(SuccessOutcome::Success);
        }
        fn report_success_with_error(&mut self) {
            self.outcomes.push(SuccessOutcome::SuccessWithError);
        }
        fn report_timeout(&mut self) {
            self.outcomes.push(SuccessOutcome::Timeout);
        }
    }

    fn setup() -> (MockSerialPort, SlaveBus<MockSerialPort>, DevicePoller) {
        let port = MockSerialPort::new();
        let bus = SlaveBus::new(port.clone(), Duration::from_millis(20));
        let poller = DevicePoller::new(Device::new(DeviceKind::Rover, 1, 0));
        (port, bus, poller)
    }

    fn no_reload() -> NoCacheReload {
        NoCacheReload
    }

    #[tokio::test]
    async fn test_success() {
        let (port, mut bus, mut poller) = setup();
        port.queue_registers(1, 0x03, &sample_registers());
        let mut reporter = CountingReporter::default();

        let report = poller
            .poll(&mut bus, &mut no_reload(), &mut reporter, PollOptions::default())
            .await;
        assert_eq!(report.outcome, SuccessOutcome::Success);
        assert!(report.reading.is_some());
        assert!(poller.has_been_successful());
        assert_eq!(reporter.outcomes, vec![SuccessOutcome::Success]);
    }

    #[tokio::test]
    async fn test_timeouts_never_downgraded_without_success() {
        let (port, mut bus, mut poller) = setup();
        let mut reporter = CountingReporter::default();
        for _ in 0..4 {
            port.queue_silence();
            let report = poller
                .poll(&mut bus, &mut no_reload(), &mut reporter, PollOptions::default())
                .await;
            assert_eq!(report.outcome, SuccessOutcome::Timeout);
            assert_eq!(report.timeout_severity, Some(Level::Error));
        }
        assert_eq!(reporter.outcomes.len(), 4);
    }

    #[tokio::test]
    async fn test_timeout_after_success_is_downgraded() {
        let (port, mut bus, mut poller) = setup();
        let mut reporter = NoopReporter;
        port.queue_registers(1, 0x03, &sample_registers());
        port.queue_silence();

        poller
            .poll(&mut bus, &mut no_reload(), &mut reporter, PollOptions::default())
            .await;
        let report = poller
            .poll(&mut bus, &mut no_reload(), &mut reporter, PollOptions::default())
            .await;
        assert_eq!(report.outcome, SuccessOutcome::Timeout);
        assert_eq!(report.timeout_severity, Some(Level::Debug));
    }

    #[tokio::test]
    async fn test_garbled_and_exception_are_success_with_error() {
        let (port, mut bus, mut poller) = setup();
        let mut reporter = CountingReporter::default();
        port.queue_response(&[0x01, 0x03, 0x46, 0x00]);
        port.queue_exception(1, 0x03, 0x02);

        for _ in 0..2 {
            let report = poller
                .poll(&mut bus, &mut no_reload(), &mut reporter, PollOptions::default())
                .await;
            assert_eq!(report.outcome, SuccessOutcome::SuccessWithError);
            assert!(report.reading.is_none());
            assert!(report.error_packet.is_none());
        }
        assert!(!poller.has_been_successful());
        assert_eq!(reporter.outcomes, vec![SuccessOutcome::SuccessWithError; 2]);
    }

    #[tokio::test]
    async fn test_error_packet_when_enabled() {
        let (port, mut bus, mut poller) = setup();
        port.queue_silence();
        let options = PollOptions {
            send_error_packets: true,
            debug_modbus_timeout: true,
        };

        let report = poller
            .poll(&mut bus, &mut no_reload(), &mut NoopReporter, options)
            .await;
        match report.into_packets().as_slice() {
            [Packet::Error {
                kind,
                catch_location,
                device,
                ..
            }] => {
                assert_eq!(*kind, FailureKind::TransportTimeout);
                assert_eq!(catch_location, "read.modbus");
                assert_eq!(device, "rover:1");
            }
            other => panic!("unexpected packets {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cache_reload_failure_does_not_abort() {
        let (port, mut bus, mut poller) = setup();
        port.queue_registers(1, 0x03, &sample_registers());
        let mut calls = 0;
        let mut failing_reload = || -> Result<(), SolarError> {
            calls += 1;
            Err(SolarError::Config("cache unavailable".into()))
        };

        let report = poller
            .poll(&mut bus, &mut failing_reload, &mut NoopReporter, PollOptions::default())
            .await;
        assert_eq!(report.outcome, SuccessOutcome::Success);
        assert_eq!(calls, 1);
    }
}
