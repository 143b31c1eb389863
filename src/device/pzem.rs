//! # PZEM-017 Shunt Register Table
//!
//! DC energy meter read through input registers 0x0000..=0x0007. Power and
//! energy are 32-bit values stored low word first.

use crate::constants::{PZEM_ALARM_ON, PZEM_INPUT_COUNT};
use crate::error::SolarError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PzemShuntStatus {
    pub address: u8,
    pub number: u32,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy_wh: u32,
    pub high_voltage_alarm: bool,
    pub low_voltage_alarm: bool,
}

impl PzemShuntStatus {
    pub fn from_registers(address: u8, number: u32, r: &[u16]) -> Result<Self, SolarError> {
        if r.len() != PZEM_INPUT_COUNT as usize {
            return Err(SolarError::UnexpectedResponse(format!(
                "pzem block has {} registers, expected {PZEM_INPUT_COUNT}",
                r.len()
            )));
        }
        let low_first = |low: u16, high: u16| ((high as u32) << 16) | low as u32;

        Ok(PzemShuntStatus {
            address,
            number,
            voltage: r[0] as f64 * 0.01,
            current: r[1] as f64 * 0.01,
            power: low_first(r[2], r[3]) as f64 * 0.1,
            energy_wh: low_first(r[4], r[5]),
            high_voltage_alarm: r[6] == PZEM_ALARM_ON,
            low_voltage_alarm: r[7] == PZEM_ALARM_ON,
        })
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        match name {
            "voltage" | "battery_voltage" => Some(self.voltage),
            "current" => Some(self.current),
            "power" => Some(self.power),
            "energy_wh" => Some(self.energy_wh as f64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_block() {
        let registers = [1312, 250, 0x0CCC, 0x0001, 5000, 0, 0xFFFF, 0x0000];
        let status = PzemShuntStatus::from_registers(2, 1, &registers).unwrap();
        assert!((status.voltage - 13.12).abs() < 1e-9);
        assert!((status.current - 2.5).abs() < 1e-9);
        assert!((status.power - 0x0001_0CCC as f64 * 0.1).abs() < 1e-6);
        assert_eq!(status.energy_wh, 5000);
        assert!(status.high_voltage_alarm);
        assert!(!status.low_voltage_alarm);
        assert_eq!(status.field("battery_voltage"), Some(status.voltage));
    }

    #[test]
    fn test_short_block() {
        assert!(PzemShuntStatus::from_registers(2, 1, &[0; 4]).is_err());
    }
}
