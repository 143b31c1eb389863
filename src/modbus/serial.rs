//! # Serial Communication
//!
//! This module provides the serial side of the bus: the `SerialPort` trait the
//! slave bus is generic over, the line settings, and `ReloadablePort`, a
//! `tokio-serial` stream that survives the adapter being unplugged.
//!
//! While the device is missing every read and write fails with
//! `ErrorKind::NotConnected`, which the bus reports as a transport timeout.
//! The next bus call tries to reopen it.

use crate::constants::DEFAULT_BAUD_RATE;
use crate::error::SolarError;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::SerialPortBuilderExt;

/// Byte stream the slave bus talks through.
pub trait SerialPort: AsyncRead + AsyncWrite + Unpin + Send {
    /// Reopens the underlying device if it was lost. Called before every bus call.
    fn reload(&mut self) -> Result<(), SolarError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Line settings and per-call response timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baudrate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    /// Deadline for a complete response to one request.
    pub response_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baudrate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            response_timeout_ms: 1000,
        }
    }
}

impl SerialConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), SolarError> {
        if !(5..=8).contains(&self.data_bits) {
            return Err(SolarError::Config(format!(
                "data_bits must be 5..=8, got {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(SolarError::Config(format!(
                "stop_bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        if self.response_timeout_ms == 0 {
            return Err(SolarError::Config("response_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    fn open(&self, port_name: &str) -> Result<tokio_serial::SerialStream, SolarError> {
        let data_bits = match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let parity = match self.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };
        let stop_bits = match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };
        tokio_serial::new(port_name, self.baudrate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(self.response_timeout())
            .open_native_async()
            .map_err(|e| SolarError::SerialPortError(format!("{port_name}: {e}")))
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "serial port not initialized")
}

/// A serial stream that can be reopened after the device disappears.
pub struct ReloadablePort {
    port_name: String,
    config: SerialConfig,
    stream: Option<tokio_serial::SerialStream>,
}

impl ReloadablePort {
    /// Opens `port_name`. Failure is logged, not returned: the port starts closed
    /// and is retried on the next bus call.
    pub fn open(port_name: &str, config: SerialConfig) -> Self {
        let mut port = ReloadablePort {
            port_name: port_name.to_string(),
            config,
            stream: None,
        };
        if let Err(e) = port.reload() {
            error!("Could not open serial port: {e}");
        }
        port
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn drop_on_error<T>(&mut self, result: &Poll<io::Result<T>>) {
        if let Poll::Ready(Err(e)) = result {
            if !matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                info!("Closing serial port {} after error: {e}", self.port_name);
                self.stream = None;
            }
        }
    }
}

impl SerialPort for ReloadablePort {
    fn reload(&mut self) -> Result<(), SolarError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.config.open(&self.port_name)?;
        debug!("Successfully opened serial port {}", self.port_name);
        self.stream = Some(stream);
        Ok(())
    }
}

impl AsyncRead for ReloadablePort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = match this.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        };
        this.drop_on_error(&result);
        result
    }
}

impl AsyncWrite for ReloadablePort {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = match this.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        };
        this.drop_on_error(&result);
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = match this.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Err(not_connected())),
        };
        this.drop_on_error(&result);
        result
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SerialConfig::default();
        assert_eq!(config.baudrate, 9600);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.response_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config: SerialConfig =
            serde_json::from_str(r#"{ "baudrate": 19200, "parity": "even" }"#).unwrap();
        assert_eq!(config.baudrate, 19200);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.data_bits, 8);
    }

    #[test]
    fn test_invalid_config() {
        let config = SerialConfig {
            stop_bits: 3,
            ..SerialConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_missing_port_is_not_connected() {
        use tokio::io::AsyncWriteExt;

        let mut port = ReloadablePort::open("/dev/solarlink-does-not-exist", SerialConfig::default());
        assert!(!port.is_open());
        let err = port.write_all(&[0x01]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(port.reload().is_err());
    }
}
