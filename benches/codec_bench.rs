//! Criterion benchmark untuk schema codec dan discovery parsing
//!
//! Run dengan: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use wirecall::client::parse_snapshot;
use wirecall::{decode, encode, CommandId, Contract, ContractKind, RecordLayout, Schema, Strictness};

const WEATHER: &str = "u32:date|i32:temp|c16:summary";
const USER: &str = "u32:id|str:name|str:email";

fn bench_codec(c: &mut Criterion) {
    let weather = Schema::parse(WEATHER).unwrap();
    let user = Schema::parse(USER).unwrap();
    let weather_inputs = [("date", "20260120"), ("temp", "22"), ("summary", "Chilly")];
    let user_inputs = [("id", "7"), ("name", "Ann"), ("email", "ann@example.com")];
    let weather_bytes = encode(&weather, &weather_inputs, Strictness::Lenient).unwrap();
    let user_bytes = encode(&user, &user_inputs, Strictness::Lenient).unwrap();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    // Fixed-size record
    group.bench_function("encode_fixed", |b| {
        b.iter(|| encode(black_box(&weather), black_box(&weather_inputs), Strictness::Lenient))
    });
    group.bench_function("decode_fixed", |b| {
        b.iter(|| decode(black_box(&weather_bytes), black_box(&weather)))
    });

    // Length-prefixed strings
    group.bench_function("encode_variable", |b| {
        b.iter(|| encode(black_box(&user), black_box(&user_inputs), Strictness::Lenient))
    });
    group.bench_function("decode_variable", |b| {
        b.iter(|| decode(black_box(&user_bytes), black_box(&user)))
    });

    group.bench_function("schema_parse", |b| b.iter(|| Schema::parse(black_box(WEATHER))));

    group.finish();
}

fn bench_discovery(c: &mut Criterion) {
    let mut payload = Vec::new();
    for i in 0..64u8 {
        let contract = Contract {
            id: CommandId::new(b'A' + (i % 26)),
            name: format!("Command{}", i),
            kind: if i % 4 == 0 { ContractKind::Stream } else { ContractKind::Unary },
            request_schema: Schema::parse("str:email|str:password").unwrap(),
            response_schema: Schema::parse(WEATHER).unwrap(),
            response_size: 24,
        };
        RecordLayout::Current.write(&contract, &mut payload);
    }

    let mut group = c.benchmark_group("discovery");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("parse_snapshot_64", |b| {
        b.iter(|| parse_snapshot(black_box(&payload), RecordLayout::Current))
    });
    group.finish();
}

criterion_group!(benches, bench_codec, bench_discovery);
criterion_main!(benches);
