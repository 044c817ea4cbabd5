//! Throughput benchmarks

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use pcclink_core::core::protocol::{
    crc8_dvb_s2, encode, encode_frame, Direction, FrameDecoder, Opcode,
};
use pcclink_core::CommandRouter;
use tokio_util::codec::Decoder;

fn checksum_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("crc8_dvb_s2", |b| {
        b.iter(|| black_box(crc8_dvb_s2(black_box(&data))))
    });

    group.finish();
}

fn codec_benchmark(c: &mut Criterion) {
    let thermal = encode_frame(Direction::ToHost, Opcode::SendThermalReading, &[42; 64]).unwrap();
    let stream: Vec<u8> = thermal.iter().copied().cycle().take(thermal.len() * 64).collect();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("encode_base_color", |b| {
        b.iter(|| black_box(encode(Opcode::SetBaseColor, black_box(&[10, 20, 30, 40])).unwrap()))
    });

    group.bench_function("decode_push", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::default();
            black_box(decoder.push(black_box(&stream)))
        })
    });

    group.bench_function("decode_codec", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::default();
            let mut buf = BytesMut::from(stream.as_slice());
            let mut frames = 0;
            while let Ok(Some(_)) = decoder.decode(&mut buf) {
                frames += 1;
            }
            black_box(frames)
        })
    });

    group.finish();
}

fn router_benchmark(c: &mut Criterion) {
    let router = CommandRouter::default();
    let body = br#"{"wrgb":[255,128,64,0],"time":1.5}"#;

    let mut group = c.benchmark_group("router");

    group.bench_function("route_temp_color", |b| {
        b.iter(|| black_box(router.route("vrc/pcc/set_temp_color", black_box(body)).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, checksum_benchmark, codec_benchmark, router_benchmark);
criterion_main!(benches);
