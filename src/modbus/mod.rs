//! The modbus module contains the Modbus RTU master: the frame codec, the
//! request/response subset used by the device tables, the serial port layer and
//! the slave bus that serializes calls on a shared line.

pub mod bus;
pub mod frame;
pub mod protocol;
pub mod serial;
pub mod serial_mock;

pub use bus::SlaveBus;
pub use frame::{decode, decode_response, encode, DecodeError, ExceptionCode, FailureKind, Frame};
pub use protocol::{Request, Response};
pub use serial::{ReloadablePort, SerialConfig, SerialPort};
