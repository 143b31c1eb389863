//! # Renogy Rover Register Table
//!
//! The Rover family (Rover, Wanderer, Adventurer and rebadged SRNE units) keeps
//! its live status in holding registers 0x0100..=0x0122. The whole block is
//! read in one request. The load output doubles as the AUX output for command
//! sequences and is switched through register 0x010A.

use crate::constants::{ROVER_LOAD_CONTROL, ROVER_STATUS_COUNT};
use crate::device::Command;
use crate::error::SolarError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Fault bits from registers 0x0121 (high word) and 0x0122 (low word).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RoverFaults: u32 {
        const BATTERY_OVER_DISCHARGE = 1 << 16;
        const BATTERY_OVER_VOLTAGE = 1 << 17;
        const BATTERY_UNDER_VOLTAGE_WARNING = 1 << 18;
        const LOAD_SHORT_CIRCUIT = 1 << 19;
        const LOAD_OVER_POWER = 1 << 20;
        const CONTROLLER_TEMPERATURE_HIGH = 1 << 21;
        const AMBIENT_TEMPERATURE_HIGH = 1 << 22;
        const PV_INPUT_OVER_POWER = 1 << 23;
        const PV_INPUT_SHORT_CIRCUIT = 1 << 24;
        const PV_INPUT_OVER_VOLTAGE = 1 << 25;
        const PV_COUNTER_CURRENT = 1 << 26;
        const PV_WORKING_POINT_OVER_VOLTAGE = 1 << 27;
        const PV_REVERSE_CONNECTED = 1 << 28;
        const ANTI_REVERSE_MOS_SHORT = 1 << 29;
        const CHARGE_MOS_SHORT = 1 << 30;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingState {
    Deactivated,
    Activated,
    Mppt,
    Equalizing,
    Boost,
    Floating,
    CurrentLimiting,
    Unknown(u8),
}

impl ChargingState {
    fn from_code(code: u8) -> Self {
        match code {
            0 => ChargingState::Deactivated,
            1 => ChargingState::Activated,
            2 => ChargingState::Mppt,
            3 => ChargingState::Equalizing,
            4 => ChargingState::Boost,
            5 => ChargingState::Floating,
            6 => ChargingState::CurrentLimiting,
            other => ChargingState::Unknown(other),
        }
    }
}

/// One poll of a Rover's status block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoverStatus {
    pub address: u8,
    pub number: u32,
    pub battery_soc: u16,
    pub battery_voltage: f64,
    pub charging_current: f64,
    pub controller_temperature: i16,
    pub battery_temperature: i16,
    pub load_voltage: f64,
    pub load_current: f64,
    pub load_power: u16,
    pub pv_voltage: f64,
    pub pv_current: f64,
    pub pv_power: u16,
    pub daily_min_battery_voltage: f64,
    pub daily_max_battery_voltage: f64,
    pub daily_max_charging_current: f64,
    pub daily_max_discharging_current: f64,
    pub daily_max_charging_power: u16,
    pub daily_max_discharging_power: u16,
    pub daily_charging_ah: u16,
    pub daily_discharging_ah: u16,
    pub daily_generation_kwh: f64,
    pub daily_consumption_kwh: f64,
    pub operating_days: u16,
    pub battery_over_discharges: u16,
    pub battery_full_charges: u16,
    pub total_charging_ah: u32,
    pub total_discharging_ah: u32,
    pub total_generation_kwh: f64,
    pub total_consumption_kwh: f64,
    pub load_on: bool,
    pub street_light_brightness: u8,
    pub charging_state: ChargingState,
    pub faults: RoverFaults,
}

/// Temperatures are sign-magnitude bytes: bit 7 is the sign.
fn signed_byte(raw: u8) -> i16 {
    let magnitude = (raw & 0x7F) as i16;
    if raw & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn long(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

impl RoverStatus {
    /// Decodes the 0x0100..=0x0122 register block.
    pub fn from_registers(address: u8, number: u32, r: &[u16]) -> Result<Self, SolarError> {
        if r.len() != ROVER_STATUS_COUNT as usize {
            return Err(SolarError::UnexpectedResponse(format!(
                "rover status block has {} registers, expected {ROVER_STATUS_COUNT}",
                r.len()
            )));
        }
        let [controller_temp, battery_temp] = r[0x03].to_be_bytes();
        let [load_status, charging_state] = r[0x20].to_be_bytes();

        Ok(RoverStatus {
            address,
            number,
            battery_soc: r[0x00],
            battery_voltage: r[0x01] as f64 * 0.1,
            charging_current: r[0x02] as f64 * 0.01,
            controller_temperature: signed_byte(controller_temp),
            battery_temperature: signed_byte(battery_temp),
            load_voltage: r[0x04] as f64 * 0.1,
            load_current: r[0x05] as f64 * 0.01,
            load_power: r[0x06],
            pv_voltage: r[0x07] as f64 * 0.1,
            pv_current: r[0x08] as f64 * 0.01,
            pv_power: r[0x09],
            daily_min_battery_voltage: r[0x0B] as f64 * 0.1,
            daily_max_battery_voltage: r[0x0C] as f64 * 0.1,
            daily_max_charging_current: r[0x0D] as f64 * 0.01,
            daily_max_discharging_current: r[0x0E] as f64 * 0.01,
            daily_max_charging_power: r[0x0F],
            daily_max_discharging_power: r[0x10],
            daily_charging_ah: r[0x11],
            daily_discharging_ah: r[0x12],
            daily_generation_kwh: r[0x13] as f64 / 10_000.0,
            daily_consumption_kwh: r[0x14] as f64 / 10_000.0,
            operating_days: r[0x15],
            battery_over_discharges: r[0x16],
            battery_full_charges: r[0x17],
            total_charging_ah: long(r[0x18], r[0x19]),
            total_discharging_ah: long(r[0x1A], r[0x1B]),
            total_generation_kwh: long(r[0x1C], r[0x1D]) as f64 / 10_000.0,
            total_consumption_kwh: long(r[0x1E], r[0x1F]) as f64 / 10_000.0,
            load_on: load_status & 0x80 != 0,
            street_light_brightness: load_status & 0x7F,
            charging_state: ChargingState::from_code(charging_state),
            faults: RoverFaults::from_bits_truncate(long(r[0x21], r[0x22])),
        })
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        let value = match name {
            "battery_soc" => self.battery_soc as f64,
            "battery_voltage" => self.battery_voltage,
            "charging_current" => self.charging_current,
            "controller_temperature" => self.controller_temperature as f64,
            "battery_temperature" => self.battery_temperature as f64,
            "load_voltage" => self.load_voltage,
            "load_current" => self.load_current,
            "load_power" => self.load_power as f64,
            "pv_voltage" => self.pv_voltage,
            "pv_current" => self.pv_current,
            "pv_power" => self.pv_power as f64,
            "daily_min_battery_voltage" => self.daily_min_battery_voltage,
            "daily_max_battery_voltage" => self.daily_max_battery_voltage,
            "daily_charging_ah" => self.daily_charging_ah as f64,
            "daily_generation_kwh" => self.daily_generation_kwh,
            "load_on" => f64::from(u8::from(self.load_on)),
            _ => return None,
        };
        Some(value)
    }
}

/// Registers and values a command writes.
pub fn command_registers(command: Command) -> Result<Vec<(u16, u16)>, SolarError> {
    match command {
        Command::AuxOn => Ok(vec![(ROVER_LOAD_CONTROL, 1)]),
        Command::AuxOff => Ok(vec![(ROVER_LOAD_CONTROL, 0)]),
    }
}
