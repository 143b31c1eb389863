//! # Modbus Requests and Responses
//!
//! The subset of Modbus function codes needed to poll and command charge
//! controllers: register reads (0x03, 0x04) and register writes (0x06, 0x10).
//! A `Request` knows how to build its frame and how to check that a decoded
//! response actually answers it.

use crate::constants::{
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_REGISTER, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS,
};
use crate::error::SolarError;
use crate::modbus::frame::Frame;

/// A request the master can put on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadHoldingRegisters { start: u16, count: u16 },
    ReadInputRegisters { start: u16, count: u16 },
    WriteSingleRegister { register: u16, value: u16 },
    WriteMultipleRegisters { start: u16, values: Vec<u16> },
}

/// The typed content of a successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Registers(Vec<u16>),
    WriteAck,
}

impl Request {
    pub fn function(&self) -> u8 {
        match self {
            Request::ReadHoldingRegisters { .. } => FC_READ_HOLDING_REGISTERS,
            Request::ReadInputRegisters { .. } => FC_READ_INPUT_REGISTERS,
            Request::WriteSingleRegister { .. } => FC_WRITE_SINGLE_REGISTER,
            Request::WriteMultipleRegisters { .. } => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }

    /// Rejects requests a slave is guaranteed to refuse.
    pub fn validate(&self) -> Result<(), SolarError> {
        match self {
            Request::ReadHoldingRegisters { count, .. } | Request::ReadInputRegisters { count, .. }
                if *count == 0 || *count > MAX_READ_REGISTERS =>
            {
                Err(SolarError::Config(format!(
                    "register count {count} outside 1..={MAX_READ_REGISTERS}"
                )))
            }
            Request::WriteMultipleRegisters { values, .. }
                if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize =>
            {
                Err(SolarError::Config(format!(
                    "write of {} registers outside 1..={MAX_WRITE_REGISTERS}",
                    values.len()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Builds the request frame for the slave at `address`.
    pub fn to_frame(&self, address: u8) -> Frame {
        let mut payload = Vec::with_capacity(6);
        match self {
            Request::ReadHoldingRegisters { start, count }
            | Request::ReadInputRegisters { start, count } => {
                payload.extend_from_slice(&start.to_be_bytes());
                payload.extend_from_slice(&count.to_be_bytes());
            }
            Request::WriteSingleRegister { register, value } => {
                payload.extend_from_slice(&register.to_be_bytes());
                payload.extend_from_slice(&value.to_be_bytes());
            }
            Request::WriteMultipleRegisters { start, values } => {
                payload.extend_from_slice(&start.to_be_bytes());
                payload.extend_from_slice(&(values.len() as u16).to_be_bytes());
                payload.push((values.len() * 2) as u8);
                for value in values {
                    payload.extend_from_slice(&value.to_be_bytes());
                }
            }
        }
        Frame::new(address, self.function(), payload)
    }

    /// Checks that `frame` answers this request from `address` and extracts its content.
    pub fn parse_response(&self, address: u8, frame: &Frame) -> Result<Response, SolarError> {
        if frame.address != address {
            return Err(SolarError::UnexpectedResponse(format!(
                "response from slave {} while talking to slave {address}",
                frame.address
            )));
        }
        if frame.function != self.function() {
            return Err(SolarError::UnexpectedResponse(format!(
                "function 0x{:02X} in response to 0x{:02X}",
                frame.function,
                self.function()
            )));
        }

        match self {
            Request::ReadHoldingRegisters { count, .. } | Request::ReadInputRegisters { count, .. } => {
                let data = frame.payload.get(1..).unwrap_or_default();
                if data.len() != *count as usize * 2 {
                    return Err(SolarError::UnexpectedResponse(format!(
                        "expected {} register bytes, got {}",
                        *count as usize * 2,
                        data.len()
                    )));
                }
                Ok(Response::Registers(
                    data.chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                        .collect(),
                ))
            }
            Request::WriteSingleRegister { .. } => {
                let expected = self.to_frame(address).payload;
                if frame.payload != expected {
                    return Err(SolarError::UnexpectedResponse(
                        "write echo does not match request".into(),
                    ));
                }
                Ok(Response::WriteAck)
            }
            Request::WriteMultipleRegisters { .. } => {
                let expected = self.to_frame(address).payload;
                if frame.payload.get(..4) != expected.get(..4) || frame.payload.len() != 4 {
                    return Err(SolarError::UnexpectedResponse(
                        "write acknowledgement does not match request".into(),
                    ));
                }
                Ok(Response::WriteAck)
            }
        }
    }
}

impl Response {
    pub fn into_registers(self) -> Result<Vec<u16>, SolarError> {
        match self {
            Response::Registers(values) => Ok(values),
            Response::WriteAck => Err(SolarError::UnexpectedResponse(
                "expected registers, got write acknowledgement".into(),
            )),
        }
    }
}
