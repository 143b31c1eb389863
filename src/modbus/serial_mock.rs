//! Mock serial port implementation for testing
//!
//! This module provides a mock serial port that can be used to exercise the
//! slave bus, the polling loop and the runner without requiring hardware.
//! Scripted responses are released one per written request, the way a slave
//! only answers after it has been asked.

use crate::modbus::frame::{encode, Frame};
use crate::modbus::serial::SerialPort;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock serial port that simulates a slave answering requests
#[derive(Clone, Default)]
pub struct MockSerialPort {
    /// Data written to the port (outgoing)
    pub tx_buffer: Arc<Mutex<Vec<u8>>>,
    /// Data to be read from the port (incoming)
    pub rx_buffer: Arc<Mutex<VecDeque<u8>>>,
    /// One entry per expected request; an empty entry means the slave stays silent
    pub responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// When set, reads and writes fail with `NotConnected`
    pub disconnected: Arc<Mutex<bool>>,
    /// Number of `reload` calls observed
    pub reloads: Arc<Mutex<usize>>,
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes to be read immediately, regardless of requests
    pub fn queue_rx_data(&self, data: &[u8]) {
        lock(&self.rx_buffer).extend(data);
    }

    /// Queue the bytes the slave sends after the next request
    pub fn queue_response(&self, data: &[u8]) {
        lock(&self.responses).push_back(data.to_vec());
    }

    /// Queue a well-formed response frame
    pub fn queue_frame(&self, frame: &Frame) {
        self.queue_response(&encode(frame));
    }

    /// Queue a read-registers response carrying `values`
    pub fn queue_registers(&self, address: u8, function: u8, values: &[u16]) {
        let mut payload = vec![(values.len() * 2) as u8];
        for value in values {
            payload.extend_from_slice(&value.to_be_bytes());
        }
        self.queue_frame(&Frame::new(address, function, payload));
    }

    /// Queue an exception response
    pub fn queue_exception(&self, address: u8, function: u8, code: u8) {
        self.queue_frame(&Frame::new(address, function | 0x80, vec![code]));
    }

    /// The slave will not answer the next request
    pub fn queue_silence(&self) {
        self.queue_response(&[]);
    }

    /// Get data that was written to the port
    pub fn get_tx_data(&self) -> Vec<u8> {
        lock(&self.tx_buffer).clone()
    }

    pub fn clear_tx(&self) {
        lock(&self.tx_buffer).clear();
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        *lock(&self.disconnected) = disconnected;
    }

    pub fn reload_count(&self) -> usize {
        *lock(&self.reloads)
    }

    pub fn pending_responses(&self) -> usize {
        lock(&self.responses).len()
    }

    fn is_disconnected(&self) -> bool {
        *lock(&self.disconnected)
    }
}

impl SerialPort for MockSerialPort {
    fn reload(&mut self) -> Result<(), crate::error::SolarError> {
        *lock(&self.reloads) += 1;
        Ok(())
    }
}

// Empty input stays pending, so reads end at the bus deadline like a real line.
impl AsyncRead for MockSerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.is_disconnected() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "mock port disconnected",
            )));
        }

        let mut rx = lock(&self.rx_buffer);
        let available = rx.len().min(buf.remaining());
        if available == 0 {
            return Poll::Pending;
        }
        let data: Vec<u8> = rx.drain(..available).collect();
        buf.put_slice(&data);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.is_disconnected() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "mock port disconnected",
            )));
        }

        lock(&self.tx_buffer).extend_from_slice(buf);
        if let Some(response) = lock(&self.responses).pop_front() {
            lock(&self.rx_buffer).extend(response);
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
