//! # Slave Bus
//!
//! The slave bus owns the single half-duplex stream shared by every slave on a
//! line. Calls take `&mut self`, so two frames can never be in flight at once.
//! Each call gets exactly one deadline covering the whole response; there is no
//! frame-level resend.

use crate::constants::RTU_MAX_FRAME;
use crate::error::SolarError;
use crate::modbus::frame::{decode_response, encode, expected_response_len};
use crate::modbus::protocol::{Request, Response};
use crate::modbus::serial::SerialPort;
use crate::util::hex::split_hex;
use log::{debug, trace};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};

pub struct SlaveBus<P: SerialPort> {
    port: P,
    response_timeout: Duration,
}

impl<P: SerialPort> SlaveBus<P> {
    pub fn new(port: P, response_timeout: Duration) -> Self {
        SlaveBus {
            port,
            response_timeout,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Sends `request` to the slave at `address` and waits for its answer.
    pub async fn call(&mut self, address: u8, request: &Request) -> Result<Response, SolarError> {
        request.validate()?;
        if let Err(e) = self.port.reload() {
            debug!("Port reload before call to slave {address} failed: {e}");
        }
        self.discard_stale_input().await;

        let bytes = encode(&request.to_frame(address));
        trace!("tx slave {address}: {}", split_hex(&bytes));
        self.port
            .write_all(&bytes)
            .await
            .map_err(|e| io_error(address, e))?;
        self.port.flush().await.map_err(|e| io_error(address, e))?;

        let raw = self.read_response(address).await?;
        trace!("rx slave {address}: {}", split_hex(&raw));
        let frame = decode_response(&raw)?;
        request.parse_response(address, &frame)
    }

    pub async fn read_holding_registers(
        &mut self,
        address: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, SolarError> {
        self.call(address, &Request::ReadHoldingRegisters { start, count })
            .await?
            .into_registers()
    }

    pub async fn read_input_registers(
        &mut self,
        address: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, SolarError> {
        self.call(address, &Request::ReadInputRegisters { start, count })
            .await?
            .into_registers()
    }

    pub async fn write_single_register(
        &mut self,
        address: u8,
        register: u16,
        value: u16,
    ) -> Result<(), SolarError> {
        self.call(address, &Request::WriteSingleRegister { register, value })
            .await
            .map(|_| ())
    }

    /// Reads until the declared frame length is reached, the deadline passes,
    /// or the stream ends. A partial frame is returned for the codec to classify.
    async fn read_response(&mut self, address: u8) -> Result<Vec<u8>, SolarError> {
        let deadline = Instant::now() + self.response_timeout;
        let mut buf = Vec::with_capacity(RTU_MAX_FRAME);
        let mut chunk = [0u8; RTU_MAX_FRAME];

        loop {
            match expected_response_len(&buf) {
                Some(len) if buf.len() >= len => break,
                None if buf.len() >= 3 => break, // unknown function, let the codec reject it
                _ => {}
            }
            if buf.len() >= RTU_MAX_FRAME {
                break;
            }

            match timeout_at(deadline, self.port.read(&mut chunk)).await {
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) if buf.is_empty() => return Err(io_error(address, e)),
                Ok(Err(e)) => {
                    debug!("Read error after partial response from slave {address}: {e}");
                    break;
                }
            }
        }

        if buf.is_empty() {
            return Err(SolarError::TransportTimeout { address });
        }
        Ok(buf)
    }

    /// Drops bytes left over from an earlier, abandoned exchange. Stops after
    /// `RTU_MAX_FRAME` bytes so a line that never goes quiet cannot stall the call.
    async fn discard_stale_input(&mut self) {
        let mut scratch = [0u8; 64];
        let mut discarded = 0usize;
        while discarded < RTU_MAX_FRAME {
            match timeout(Duration::ZERO, self.port.read(&mut scratch)).await {
                Ok(Ok(n)) if n > 0 => discarded += n,
                _ => break,
            }
        }
        if discarded > 0 {
            debug!("Discarded {discarded} stale bytes before request");
        }
    }
}

/// A missing port behaves like a silent device.
fn io_error(address: u8, e: io::Error) -> SolarError {
    match e.kind() {
        io::ErrorKind::NotConnected | io::ErrorKind::TimedOut => {
            SolarError::TransportTimeout { address }
        }
        _ => SolarError::SerialPortError(e.to_string()),
    }
}
