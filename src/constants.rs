//! Modbus and Device Constants
//!
//! Function codes, exception codes and register addresses used by the charge
//! controller and shunt tables.

/// Read holding registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read input registers
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write single coil
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write single register
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write multiple registers
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// High bit of the function code set by a slave reporting an exception
pub const FC_EXCEPTION_MASK: u8 = 0x80;

/// Maximum registers a single read request may ask for
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum registers a single write-multiple request may carry
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Address + function + CRC
pub const RTU_OVERHEAD: usize = 4;

/// Largest RTU frame on the wire
pub const RTU_MAX_FRAME: usize = 256;

/// Exception: function code not supported by the slave
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Exception: register address not supported
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Exception: too many registers requested
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Exception: the slave cannot serve a multi-register read
pub const EXCEPTION_SLAVE_DEVICE_FAILURE: u8 = 0x04;

/// Rover: first register of the dynamic status block
pub const ROVER_STATUS_START: u16 = 0x0100;

/// Rover: number of registers in the status block (0x0100..=0x0122)
pub const ROVER_STATUS_COUNT: u16 = 0x23;

/// Rover: load (street light) on/off register
pub const ROVER_LOAD_CONTROL: u16 = 0x010A;

/// PZEM-017: first measurement input register
pub const PZEM_INPUT_START: u16 = 0x0000;

/// PZEM-017: number of measurement input registers
pub const PZEM_INPUT_COUNT: u16 = 0x08;

/// PZEM alarm register value meaning "alarm"
pub const PZEM_ALARM_ON: u16 = 0xFFFF;

/// Catch location stored on error packets produced by the polling loop
pub const MODBUS_READ_CATCH_LOCATION: &str = "read.modbus";

/// Default baud rate for Rover and PZEM devices
pub const DEFAULT_BAUD_RATE: u32 = 9600;
