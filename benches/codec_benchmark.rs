use criterion::{black_box, criterion_group, criterion_main, Criterion};
use solarlink::device::RoverStatus;
use solarlink::modbus::frame::{decode, decode_response, encode, Frame};
use solarlink::modbus::Request;

fn rover_response() -> Vec<u8> {
    let values: Vec<u16> = (0..0x23u16).map(|i| i * 7).collect();
    let mut payload = vec![(values.len() * 2) as u8];
    for value in &values {
        payload.extend_from_slice(&value.to_be_bytes());
    }
    encode(&Frame::new(0x01, 0x03, payload))
}

fn benchmark_encode_request(c: &mut Criterion) {
    let request = Request::ReadHoldingRegisters {
        start: 0x0100,
        count: 0x23,
    };
    c.bench_function("encode_read_request", |b| {
        b.iter(|| black_box(encode(&request.to_frame(black_box(0x01)))))
    });
}

fn benchmark_decode_response(c: &mut Criterion) {
    let data = rover_response();

    c.bench_function("decode", |b| b.iter(|| black_box(decode(black_box(&data)))));
    c.bench_function("decode_response", |b| {
        b.iter(|| black_box(decode_response(black_box(&data))))
    });
}

fn benchmark_rover_table(c: &mut Criterion) {
    let data = rover_response();
    let request = Request::ReadHoldingRegisters {
        start: 0x0100,
        count: 0x23,
    };

    c.bench_function("rover_status_from_response", |b| {
        b.iter(|| {
            let frame = decode_response(black_box(&data)).ok()?;
            let registers = request.parse_response(0x01, &frame).ok()?.into_registers().ok()?;
            RoverStatus::from_registers(0x01, 0, &registers).ok()
        })
    });
}

criterion_group!(
    benches,
    benchmark_encode_request,
    benchmark_decode_response,
    benchmark_rover_table
);
criterion_main!(benches);
