#![allow(dead_code)]

use std::sync::Arc;

use bewegt::{Buffer, Context, Encoding, EventKind, Format};
use parking_lot::Mutex;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn mono(rate: u32) -> Format {
    Format::new(rate, 1, Encoding::I16).unwrap()
}

pub fn bytes(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Emulated mono context at 50 Hz.
pub fn context(samples_per_tick: usize) -> Context {
    init_tracing();
    Context::builder()
        .with_format(mono(50))
        .with_samples_per_tick(samples_per_tick)
        .build()
        .unwrap()
}

pub fn ramp(frames: i16) -> Buffer {
    let values: Vec<i16> = (1..=frames).collect();
    Buffer::from_bytes(mono(50), &bytes(&values)).unwrap()
}

/// Record every event kind the context dispatches.
pub fn record(ctx: &Context) -> Arc<Mutex<Vec<EventKind>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    ctx.dispatcher().listen_all(Box::new(move |e| sink.lock().push(e.kind)));
    log
}

/// The frames rendered by the last tick.
pub fn output(ctx: &Context) -> Vec<i16> {
    samples(&ctx.master_buffer().snapshot())
}
