//! # Modbus RTU Frame Codec
//!
//! This module encodes and decodes Modbus RTU application data units: slave address,
//! function code, payload and a trailing CRC-16/MODBUS (low byte first).
//! Response framing is parsed with `nom` streaming combinators so that a partially
//! received frame is reported as `ShortFrame` rather than as garbage.
//!
//! The codec only classifies. It never retries and never talks to a port.
//!
//! ## Usage
//!
//! ```rust
//! use solarlink::modbus::frame::{decode, encode, Frame};
//!
//! let frame = Frame::new(0x01, 0x03, vec![0x01, 0x00, 0x00, 0x23]);
//! let bytes = encode(&frame);
//! assert_eq!(decode(&bytes).unwrap(), frame);
//! ```

use crate::constants::{
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION,
    EXCEPTION_SLAVE_DEVICE_FAILURE, FC_EXCEPTION_MASK, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER, RTU_OVERHEAD,
};
use crate::util::hex::split_hex;
use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use nom::bytes::streaming::take;
use nom::combinator::peek;
use nom::number::streaming::{be_u8, le_u16};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Smallest well-formed response: address, function, one byte, CRC.
const MIN_RESPONSE_LEN: usize = RTU_OVERHEAD + 1;

/// Represents a decoded RTU frame without its CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub function: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(address: u8, function: u8, payload: Vec<u8>) -> Self {
        Frame {
            address,
            function,
            payload,
        }
    }

    /// True when the slave flagged this frame as an exception response.
    pub fn is_exception(&self) -> bool {
        self.function & FC_EXCEPTION_MASK != 0
    }
}

/// Device-reported fault carried by an exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionCode {
    UnsupportedFunction,
    UnsupportedRegister,
    TooManyRegisters,
    CannotReadMultiple,
    Other(u8),
}

impl ExceptionCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            EXCEPTION_ILLEGAL_FUNCTION => ExceptionCode::UnsupportedFunction,
            EXCEPTION_ILLEGAL_DATA_ADDRESS => ExceptionCode::UnsupportedRegister,
            EXCEPTION_ILLEGAL_DATA_VALUE => ExceptionCode::TooManyRegisters,
            EXCEPTION_SLAVE_DEVICE_FAILURE => ExceptionCode::CannotReadMultiple,
            other => ExceptionCode::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ExceptionCode::UnsupportedFunction => EXCEPTION_ILLEGAL_FUNCTION,
            ExceptionCode::UnsupportedRegister => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            ExceptionCode::TooManyRegisters => EXCEPTION_ILLEGAL_DATA_VALUE,
            ExceptionCode::CannotReadMultiple => EXCEPTION_SLAVE_DEVICE_FAILURE,
            ExceptionCode::Other(code) => *code,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionCode::UnsupportedFunction => "unsupported function",
            ExceptionCode::UnsupportedRegister => "unsupported register",
            ExceptionCode::TooManyRegisters => "too many registers",
            ExceptionCode::CannotReadMultiple => "cannot read multiple registers",
            ExceptionCode::Other(_) => "unknown exception",
        };
        write!(f, "{name} (0x{:02X})", self.code())
    }
}

/// Operator-facing classification of a failed bus call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Nothing (or nothing usable) arrived before the deadline.
    TransportTimeout,
    /// Bytes arrived but CRC or length was wrong.
    FramingError,
    /// Valid frame carrying a device exception code.
    ProtocolError,
    /// Port-level failure other than a timeout.
    Io,
}

/// Errors produced while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("short frame: expected {expected} bytes, got {} [{}]", .raw.len(), split_hex(.raw))]
    ShortFrame { expected: usize, raw: Vec<u8> },

    #[error("malformed frame ({reason}) [{}]", split_hex(.raw))]
    MalformedFrame { reason: String, raw: Vec<u8> },

    #[error("slave {address} reported {code} for function 0x{function:02X}")]
    ExceptionResponse {
        address: u8,
        function: u8,
        code: ExceptionCode,
        raw: Vec<u8>,
    },
}

impl DecodeError {
    /// A short frame with no bytes at all means the device never answered.
    pub fn kind(&self) -> FailureKind {
        match self {
            DecodeError::ShortFrame { raw, .. } if raw.is_empty() => FailureKind::TransportTimeout,
            DecodeError::ShortFrame { .. } | DecodeError::MalformedFrame { .. } => {
                FailureKind::FramingError
            }
            DecodeError::ExceptionResponse { .. } => FailureKind::ProtocolError,
        }
    }

    /// The bytes that were received for this frame.
    pub fn raw(&self) -> &[u8] {
        match self {
            DecodeError::ShortFrame { raw, .. }
            | DecodeError::MalformedFrame { raw, .. }
            | DecodeError::ExceptionResponse { raw, .. } => raw,
        }
    }

    fn malformed(reason: impl Into<String>, raw: &[u8]) -> Self {
        DecodeError::MalformedFrame {
            reason: reason.into(),
            raw: raw.to_vec(),
        }
    }
}

/// Encodes a frame, always appending a freshly computed CRC.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(frame.payload.len() + RTU_OVERHEAD);
    buf.put_u8(frame.address);
    buf.put_u8(frame.function);
    buf.put_slice(&frame.payload);
    let crc = MODBUS_CRC.checksum(&buf);
    buf.put_u16_le(crc);
    buf.to_vec()
}

/// Decodes a complete RTU buffer: the whole slice is one frame.
pub fn decode(input: &[u8]) -> Result<Frame, DecodeError> {
    if input.len() < RTU_OVERHEAD {
        return Err(DecodeError::ShortFrame {
            expected: RTU_OVERHEAD,
            raw: input.to_vec(),
        });
    }
    let (body, crc_bytes) = input.split_at(input.len() - 2);
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let calculated = MODBUS_CRC.checksum(body);
    if received != calculated {
        return Err(DecodeError::malformed(
            format!("crc mismatch: received 0x{received:04X}, calculated 0x{calculated:04X}"),
            input,
        ));
    }

    let frame = Frame::new(body[0], body[1], body[2..].to_vec());
    if frame.is_exception() {
        return match frame.payload.as_slice() {
            [code] => Err(DecodeError::ExceptionResponse {
                address: frame.address,
                function: frame.function & !FC_EXCEPTION_MASK,
                code: ExceptionCode::from_code(*code),
                raw: input.to_vec(),
            }),
            _ => Err(DecodeError::malformed(
                "exception response must carry exactly one code byte",
                input,
            )),
        };
    }
    Ok(frame)
}

/// Splits a response into address, function, body and CRC using the declared length.
fn parse_response(input: &[u8]) -> IResult<&[u8], (u8, u8, &[u8], u16)> {
    let (i, address) = be_u8(input)?;
    let (i, function) = be_u8(i)?;
    let (i, body) = match function {
        f if f & FC_EXCEPTION_MASK != 0 => take(1usize)(i)?,
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            let (_, count) = peek(be_u8)(i)?;
            take(1 + count as usize)(i)?
        }
        FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER | FC_WRITE_MULTIPLE_REGISTERS => {
            take(4usize)(i)?
        }
        _ => {
            return Err(nom::Err::Failure(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Switch,
            )))
        }
    };
    let (i, crc) = le_u16(i)?;
    Ok((i, (address, function, body, crc)))
}

/// Decodes a response, checking its declared length before the CRC.
pub fn decode_response(input: &[u8]) -> Result<Frame, DecodeError> {
    match parse_response(input) {
        Ok((rest, _)) if !rest.is_empty() => Err(DecodeError::malformed(
            format!("{} unexpected trailing bytes", rest.len()),
            input,
        )),
        Ok(_) => decode(input),
        Err(nom::Err::Incomplete(_)) => Err(DecodeError::ShortFrame {
            expected: expected_response_len(input).unwrap_or(MIN_RESPONSE_LEN),
            raw: input.to_vec(),
        }),
        Err(_) => Err(DecodeError::malformed(
            format!("unsupported function code 0x{:02X}", input[1]),
            input,
        )),
    }
}

/// Total length of the response whose first bytes are `header`, once it can be known.
///
/// Returns `None` while more header bytes are needed or for function codes this
/// codec does not frame.
pub fn expected_response_len(header: &[u8]) -> Option<usize> {
    let function = *header.get(1)?;
    if function & FC_EXCEPTION_MASK != 0 {
        return Some(MIN_RESPONSE_LEN);
    }
    match function {
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            header.get(2).map(|count| MIN_RESPONSE_LEN + *count as usize)
        }
        FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER | FC_WRITE_MULTIPLE_REGISTERS => {
            Some(RTU_OVERHEAD + 4)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Read holding registers 0x0100..0x0102 from slave 1, captured from a Rover.
    const READ_REQUEST: [u8; 8] = [0x01, 0x03, 0x01, 0x00, 0x00, 0x02, 0xC5, 0xF7];

    fn registers_response(address: u8, values: &[u16]) -> Vec<u8> {
        let mut payload = vec![(values.len() * 2) as u8];
        for v in values {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        encode(&Frame::new(address, FC_READ_HOLDING_REGISTERS, payload))
    }

    #[test]
    fn test_encode_known_request() {
        let frame = Frame::new(0x01, 0x03, vec![0x01, 0x00, 0x00, 0x02]);
        assert_eq!(encode(&frame), READ_REQUEST);
    }

    #[test]
    fn test_decode_known_request() {
        let frame = decode(&READ_REQUEST).unwrap();
        assert_eq!(frame.address, 0x01);
        assert_eq!(frame.function, 0x03);
        assert_eq!(frame.payload, vec![0x01, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_decode_too_short() {
        let err = decode(&[0x01, 0x03, 0x00]).unwrap_err();
        assert!(matches!(err, DecodeError::ShortFrame { expected: 4, .. }));
        assert_eq!(err.kind(), FailureKind::FramingError);
    }

    #[test]
    fn test_decode_bad_crc() {
        let mut bytes = READ_REQUEST;
        bytes[7] ^= 0xFF;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedFrame { .. }));
    }

    #[test]
    fn test_decode_exception_response() {
        let bytes = encode(&Frame::new(0x01, 0x83, vec![0x02]));
        match decode_response(&bytes).unwrap_err() {
            DecodeError::ExceptionResponse {
                address,
                function,
                code,
                ..
            } => {
                assert_eq!(address, 0x01);
                assert_eq!(function, 0x03);
                assert_eq!(code, ExceptionCode::UnsupportedRegister);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_response_partial() {
        let bytes = registers_response(0x01, &[0x0064, 0x0081]);
        let err = decode_response(&bytes[..5]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::ShortFrame {
                expected: 9,
                raw: bytes[..5].to_vec()
            }
        );
        assert_eq!(err.kind(), FailureKind::FramingError);
    }

    #[test]
    fn test_decode_response_empty_is_timeout_kind() {
        let err = decode_response(&[]).unwrap_err();
        assert_eq!(err.kind(), FailureKind::TransportTimeout);
    }

    #[test]
    fn test_decode_response_trailing_bytes() {
        let mut bytes = registers_response(0x01, &[0x0064]);
        bytes.push(0x00);
        assert!(matches!(
            decode_response(&bytes),
            Err(DecodeError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_decode_response_unknown_function() {
        let bytes = encode(&Frame::new(0x01, 0x2B, vec![0x0E, 0x01]));
        assert!(matches!(
            decode_response(&bytes),
            Err(DecodeError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_expected_response_len() {
        assert_eq!(expected_response_len(&[0x01]), None);
        assert_eq!(expected_response_len(&[0x01, 0x03]), None);
        assert_eq!(expected_response_len(&[0x01, 0x03, 0x46]), Some(75));
        assert_eq!(expected_response_len(&[0x01, 0x06]), Some(8));
        assert_eq!(expected_response_len(&[0x01, 0x84]), Some(5));
        assert_eq!(expected_response_len(&[0x01, 0x2B]), None);
    }

    #[test]
    fn test_exception_code_mapping() {
        for code in 0u8..=0x0B {
            assert_eq!(ExceptionCode::from_code(code).code(), code);
        }
        assert_eq!(ExceptionCode::from_code(1), ExceptionCode::UnsupportedFunction);
        assert_eq!(ExceptionCode::from_code(4), ExceptionCode::CannotReadMultiple);
    }

    proptest! {
        #[test]
        fn prop_round_trip(address in any::<u8>(), function in 1u8..0x80, payload in proptest::collection::vec(any::<u8>(), 0..252)) {
            let frame = Frame::new(address, function, payload);
            prop_assert_eq!(decode(&encode(&frame)).unwrap(), frame);
        }

        #[test]
        fn prop_single_corrupted_byte_is_framing_error(
            values in proptest::collection::vec(any::<u16>(), 1..40),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut bytes = registers_response(0x01, &values);
            let i = index.index(bytes.len());
            bytes[i] ^= flip;
            for result in [decode(&bytes), decode_response(&bytes)] {
                match result {
                    Err(e) => prop_assert_eq!(e.kind(), FailureKind::FramingError),
                    Ok(frame) => prop_assert!(false, "corrupted frame decoded: {:?}", frame),
                }
            }
        }
    }
}
