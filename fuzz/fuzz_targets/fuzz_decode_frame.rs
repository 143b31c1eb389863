#![no_main]

use libfuzzer_sys::fuzz_target;
use solarlink::modbus::frame::{decode, decode_response, encode, expected_response_len};

fuzz_target!(|data: &[u8]| {
    // Neither decoder may panic on arbitrary input
    let _ = decode(data);
    let _ = decode_response(data);

    // A declared length must never be shorter than what was already parsed
    if let Some(len) = expected_response_len(data) {
        assert!(len >= 5);
    }

    // Whatever decodes must re-encode to the same bytes
    if let Ok(frame) = decode(data) {
        assert_eq!(encode(&frame), data);
    }

    // Flipping the last byte breaks the CRC
    if data.len() >= 4 {
        let mut corrupted = data.to_vec();
        if let Some(last) = corrupted.last_mut() {
            *last ^= 0x01;
        }
        assert!(decode(&corrupted).is_err() || decode(data).is_err());
    }
});
