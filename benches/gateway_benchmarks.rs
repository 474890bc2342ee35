//! Performance benchmarks for the relay hot paths
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::value::RawValue;
use std::time::Duration;
use voice_relay_gateway::core::audio::{OutboundAudioBuffer, validate_frame};
use voice_relay_gateway::core::upstream::TranscriptRole;
use voice_relay_gateway::handlers::relay::messages::{
    IncomingMessage, MAX_TEXT_SIZE, OutgoingMessage,
};

/// Benchmark control message parsing
fn bench_message_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_parsing");
    group.measurement_time(Duration::from_secs(5));

    let ping = r#"{"type":"ping"}"#.to_string();
    let start_call = r#"{"type":"start_call","clientId":"client-123","sessionId":"session-456"}"#
        .to_string();
    let peer_signal = format!(
        r#"{{"type":"peer_signal","targetClientId":"B","payload":{{"sdp":"{}"}}}}"#,
        "v=0 o=- 4611731400430051336 2 IN IP4 127.0.0.1 ".repeat(40)
    );
    let large_text = format!(r#"{{"type":"text","text":"{}"}}"#, "a".repeat(MAX_TEXT_SIZE - 64));

    for (name, msg) in [
        ("ping", &ping),
        ("start_call", &start_call),
        ("peer_signal", &peer_signal),
        ("large_text", &large_text),
    ] {
        group.throughput(Throughput::Bytes(msg.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, msg.len()), msg, |b, msg| {
            b.iter(|| IncomingMessage::parse(black_box(msg)));
        });
    }

    group.finish();
}

/// Benchmark outgoing message serialization
fn bench_message_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_serialization");
    group.measurement_time(Duration::from_secs(5));

    let transcript = OutgoingMessage::Transcript {
        role: TranscriptRole::Assistant,
        text: "Sure, I can help you with that. ".repeat(8),
    };
    group.bench_function("transcript", |b| {
        b.iter(|| serde_json::to_string(black_box(&transcript)));
    });

    let payload = RawValue::from_string(format!(r#"{{"candidate":"{}"}}"#, "x".repeat(512)))
        .expect("valid raw payload");
    let signal = OutgoingMessage::PeerSignal {
        sender_client_id: "A".to_string(),
        payload,
    };
    group.bench_function("peer_signal", |b| {
        b.iter(|| serde_json::to_string(black_box(&signal)));
    });

    group.finish();
}

/// Benchmark outbound audio batching at typical upstream chunk sizes
fn bench_audio_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_buffer");
    group.measurement_time(Duration::from_secs(5));

    for chunk_size in [480usize, 1920, 4000] {
        let chunk = vec![0u8; chunk_size];
        group.throughput(Throughput::Bytes(chunk_size as u64));
        group.bench_with_input(
            BenchmarkId::new("push", chunk_size),
            &chunk,
            |b, chunk| {
                let buffer = OutboundAudioBuffer::new(9600);
                b.iter(|| black_box(buffer.push(black_box(chunk))));
            },
        );
    }

    group.finish();
}

/// Benchmark inbound frame validation
fn bench_audio_frame_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_frame_validation");

    for size in [320usize, 3200, 32000] {
        let frame = Bytes::from(vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("validate", size), &frame, |b, frame| {
            b.iter(|| validate_frame(black_box(frame), 1024 * 1024));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_message_parsing,
    bench_message_serialization,
    bench_audio_buffer,
    bench_audio_frame_validation
);
criterion_main!(benches);
