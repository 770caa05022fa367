//! Benchmarks for control frame and device transfer encoding
//!
//! Measures encoding/decoding cost for:
//! - Connect frames with a full descriptor
//! - Disconnect frames
//! - Device transfers of increasing size

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::{
    ControlMessage, DeviceDescriptor, DeviceTransfer, TransferKind, decode_control,
    decode_transfer, encode_control, encode_transfer,
};

fn full_descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        device_id: "webusb-0123456789abcdef".to_string(),
        vendor_id: 0x0781,
        product_id: 0x5581,
        name: "Ultra USB 3.0".to_string(),
        serial_number: "4C530001230930111452".to_string(),
        class: 0x08,
        subclass: 0x06,
        protocol: 0x50,
        interface_data: "[{\"number\":0,\"class\":8,\"subclass\":6,\"protocol\":80}]".to_string(),
    }
}

fn benchmark_control_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_frames");

    let connect = ControlMessage::Connect(full_descriptor());
    group.bench_function("encode_connect", |b| {
        b.iter(|| encode_control(black_box(&connect)))
    });

    let connect_frame = encode_control(&connect).unwrap();
    group.bench_function("decode_connect", |b| {
        b.iter(|| decode_control(black_box(&connect_frame)))
    });

    let disconnect = ControlMessage::disconnect("webusb-0123456789abcdef");
    let disconnect_frame = encode_control(&disconnect).unwrap();
    group.bench_function("decode_disconnect", |b| {
        b.iter(|| decode_control(black_box(&disconnect_frame)))
    });

    group.finish();
}

fn benchmark_device_transfers(c: &mut Criterion) {
    let mut group = c.benchmark_group("device_transfers");

    for size in [64usize, 512, 4096, 16384] {
        let transfer = DeviceTransfer {
            device_id: "webusb-0123456789abcdef".to_string(),
            endpoint: 0x81,
            transfer_type: TransferKind::Bulk,
            data: vec![0xAB; size],
        };
        let encoded = encode_transfer(&transfer).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &transfer, |b, t| {
            b.iter(|| encode_transfer(black_box(t)))
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, e| {
            b.iter(|| decode_transfer(black_box(e)))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_control_frames, benchmark_device_transfers);
criterion_main!(benches);
