//! # Device Register Tables
//!
//! Each supported device family maps its register block to a typed status
//! snapshot (`Reading`) and its commands to register writes. The set of families
//! is closed: adding one means adding a variant to `DeviceKind` and `Reading`.

pub mod pzem;
pub mod rover;

use crate::constants::{PZEM_INPUT_COUNT, PZEM_INPUT_START, ROVER_STATUS_COUNT, ROVER_STATUS_START};
use crate::error::SolarError;
use crate::modbus::{Request, SerialPort, SlaveBus};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use pzem::PzemShuntStatus;
pub use rover::{ChargingState, RoverFaults, RoverStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Rover,
    PzemShunt,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Rover => write!(f, "rover"),
            DeviceKind::PzemShunt => write!(f, "pzem_shunt"),
        }
    }
}

/// Commands a command sequence can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "AUX_ON")]
    AuxOn,
    #[serde(rename = "AUX_OFF")]
    AuxOff,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AuxOn => write!(f, "AUX_ON"),
            Command::AuxOff => write!(f, "AUX_OFF"),
        }
    }
}

/// One slave on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub address: u8,
    /// Distinguishes several devices of the same kind downstream.
    #[serde(default)]
    pub number: u32,
}

impl Device {
    pub fn new(kind: DeviceKind, address: u8, number: u32) -> Self {
        Device {
            kind,
            address,
            number,
        }
    }

    /// Stable name used in logs and error packets, e.g. `rover:1`.
    pub fn identifier(&self) -> String {
        format!("{}:{}", self.kind, self.address)
    }

    /// Polls the device's status block.
    pub async fn read<P: SerialPort>(&self, bus: &mut SlaveBus<P>) -> Result<Reading, SolarError> {
        match self.kind {
            DeviceKind::Rover => {
                let registers = bus
                    .read_holding_registers(self.address, ROVER_STATUS_START, ROVER_STATUS_COUNT)
                    .await?;
                RoverStatus::from_registers(self.address, self.number, &registers).map(Reading::Rover)
            }
            DeviceKind::PzemShunt => {
                let registers = bus
                    .read_input_registers(self.address, PZEM_INPUT_START, PZEM_INPUT_COUNT)
                    .await?;
                PzemShuntStatus::from_registers(self.address, self.number, &registers)
                    .map(Reading::PzemShunt)
            }
        }
    }

    /// Registers and values `command` writes on this device.
    pub fn command_registers(&self, command: Command) -> Result<Vec<(u16, u16)>, SolarError> {
        match self.kind {
            DeviceKind::Rover => rover::command_registers(command),
            DeviceKind::PzemShunt => Err(SolarError::UnsupportedCommand {
                command: command.to_string(),
                device: self.identifier(),
            }),
        }
    }

    /// Writes `command`. Contiguous registers go out as one 0x10 request,
    /// a lone register as 0x06.
    pub async fn write<P: SerialPort>(
        &self,
        bus: &mut SlaveBus<P>,
        command: Command,
    ) -> Result<(), SolarError> {
        let registers = self.command_registers(command)?;
        for (start, values) in contiguous_runs(&registers) {
            if let [value] = values[..] {
                bus.write_single_register(self.address, start, value).await?;
            } else {
                bus.call(self.address, &Request::WriteMultipleRegisters { start, values })
                    .await?;
            }
        }
        Ok(())
    }
}

fn contiguous_runs(registers: &[(u16, u16)]) -> Vec<(u16, Vec<u16>)> {
    let mut runs: Vec<(u16, Vec<u16>)> = Vec::new();
    for &(register, value) in registers {
        match runs.last_mut() {
            Some((start, values)) if *start as usize + values.len() == register as usize => {
                values.push(value)
            }
            _ => runs.push((register, vec![value])),
        }
    }
    runs
}

/// Typed snapshot of one successful poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "device_type", rename_all = "snake_case")]
pub enum Reading {
    Rover(RoverStatus),
    PzemShunt(PzemShuntStatus),
}

impl Reading {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Reading::Rover(_) => DeviceKind::Rover,
            Reading::PzemShunt(_) => DeviceKind::PzemShunt,
        }
    }

    pub fn address(&self) -> u8 {
        match self {
            Reading::Rover(s) => s.address,
            Reading::PzemShunt(s) => s.address,
        }
    }

    pub fn number(&self) -> u32 {
        match self {
            Reading::Rover(s) => s.number,
            Reading::PzemShunt(s) => s.number,
        }
    }

    /// Numeric field by name, for command predicates.
    pub fn field(&self, name: &str) -> Option<f64> {
        match self {
            Reading::Rover(s) => s.field(name),
            Reading::PzemShunt(s) => s.field(name),
        }
    }
}
