//! Benchmarks for DNS message decoding and query name checks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use srv_locate::dns::{
    wire::{check_name, decode_message},
    RecordType,
};

const NAME: &str = "orders._sql._tcp.example.com";

/// A response to the query for `NAME`, with `count` SRV answers and a TXT
/// answer, all pointing back at the question name.
fn response(count: u16) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&7u16.to_be_bytes());
    buf.extend_from_slice(&0x8180u16.to_be_bytes()); // QR, RD, RA
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&(count + 1).to_be_bytes());
    buf.extend_from_slice(&[0; 4]);
    push_name(&mut buf, NAME);
    buf.extend_from_slice(&RecordType::Srv.code().to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());

    for i in 0..count {
        let target = format!("db{i}.example.com");
        let mut rdata = Vec::new();
        rdata.extend_from_slice(&(10 + i % 2).to_be_bytes());
        rdata.extend_from_slice(&0u16.to_be_bytes());
        rdata.extend_from_slice(&1433u16.to_be_bytes());
        push_name(&mut rdata, &target);
        record(&mut buf, RecordType::Srv, &rdata);
    }

    let mut txt = Vec::new();
    for s in ["Server={srv:host},{srv:port}", "Database=Orders"] {
        txt.push(s.len() as u8);
        txt.extend_from_slice(s.as_bytes());
    }
    record(&mut buf, RecordType::Txt, &txt);
    buf
}

fn push_name(buf: &mut Vec<u8>, name: &str) {
    for label in name.split('.') {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
}

fn record(buf: &mut Vec<u8>, record_type: RecordType, rdata: &[u8]) {
    buf.extend_from_slice(&[0xc0, 0x0c]);
    buf.extend_from_slice(&record_type.code().to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&300u32.to_be_bytes());
    buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    buf.extend_from_slice(rdata);
}

fn bench_check_name(c: &mut Criterion) {
    c.bench_function("check_name", |b| b.iter(|| check_name(black_box(NAME))));
}

fn bench_decode_small(c: &mut Criterion) {
    let buf = response(2);
    c.bench_function("decode_message_2_srv", |b| {
        b.iter(|| decode_message(black_box(&buf)))
    });
}

fn bench_decode_large(c: &mut Criterion) {
    let buf = response(32);
    c.bench_function("decode_message_32_srv", |b| {
        b.iter(|| decode_message(black_box(&buf)))
    });
}

criterion_group!(
    benches,
    bench_check_name,
    bench_decode_small,
    bench_decode_large
);
criterion_main!(benches);
