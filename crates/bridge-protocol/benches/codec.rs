use bridge_protocol::{codec, ConnectionState, StreamMessage};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_encode(c: &mut Criterion) {
    let event = StreamMessage::event("presence-lobby", "client-message", "x".repeat(256));
    let change =
        StreamMessage::state_change(ConnectionState::Connecting, ConnectionState::Connected);

    c.bench_function("encode_event_256b", |b| {
        b.iter(|| codec::encode(black_box(&event)))
    });

    c.bench_function("encode_state_change", |b| {
        b.iter(|| codec::encode(black_box(&change)))
    });
}

fn bench_decode(c: &mut Criterion) {
    let event = StreamMessage::event("presence-lobby", "client-message", "x".repeat(256));
    let encoded = codec::encode(&event).unwrap();

    c.bench_function("decode_event_256b", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
