//! Device transports.
//!
//! The mixer hands every encoded tick to a [`Transport`]. Nothing here knows
//! about a particular wire protocol; [`RtrbTransport`] forwards the bytes
//! over a lock-free ring for another thread (or a test) to consume.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::device::{AxisStatus, DeviceDesc, DeviceState};
use crate::error::Error;
use crate::format::Format;
use crate::sample::read_sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The device went away; the engine continues in emulation.
    #[error("motion device disconnected")]
    Disconnected,
    #[error("driver error (code {0})")]
    Driver(i32),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Disconnected => Error::DeviceUnavailable,
            TransportError::Driver(code) => Error::Driver(code),
        }
    }
}

/// Link between the mixer and a motion device.
///
/// `deliver` is called from the mixer thread once per tick and must not
/// block for longer than a tick.
pub trait Transport: Send {
    fn open(&mut self, _desc: &DeviceDesc) -> Result<(), TransportError> {
        Ok(())
    }

    /// Send one tick of encoded, interleaved frames.
    fn deliver(&mut self, format: &Format, frames: &[u8]) -> Result<(), TransportError>;

    /// Drive the device into `state`. Returns once the move is done.
    fn move_to(&mut self, _state: DeviceState) -> Result<(), TransportError> {
        Ok(())
    }

    fn diagnostics(&mut self) -> Result<Vec<AxisStatus>, TransportError>;
}

/// A transport that pushes encoded bytes into an `rtrb` ring.
///
/// Ticks that do not fit are skipped whole, never split.
pub struct RtrbTransport {
    producer: Producer<u8>,
    state: DeviceState,
    last: Vec<i32>,
    skipped: u64,
}

impl RtrbTransport {
    pub fn new(producer: Producer<u8>) -> Self {
        Self {
            producer,
            state: DeviceState::Settled,
            last: Vec::new(),
            skipped: 0,
        }
    }

    /// A transport plus the consumer end of a ring of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> (Self, Consumer<u8>) {
        let (producer, consumer) = RingBuffer::new(capacity);
        (Self::new(producer), consumer)
    }

    /// Returns how many byte slots are available
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    /// Ticks dropped because the ring was full.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl Transport for RtrbTransport {
    fn deliver(&mut self, format: &Format, frames: &[u8]) -> Result<(), TransportError> {
        if self.producer.is_abandoned() {
            return Err(TransportError::Disconnected);
        }
        if self.producer.slots() < frames.len() {
            self.skipped += 1;
            return Ok(());
        }
        for byte in frames {
            let _ = self.producer.push(*byte);
        }

        let align = format.block_align();
        if frames.len() >= align {
            let width = format.encoding().bytes_per_sample();
            let tail = &frames[frames.len() - align..];
            self.last = tail
                .chunks_exact(width)
                .map(|s| read_sample(s, format.encoding()) as i32)
                .collect();
        }
        Ok(())
    }

    fn move_to(&mut self, state: DeviceState) -> Result<(), TransportError> {
        if self.producer.is_abandoned() {
            return Err(TransportError::Disconnected);
        }
        self.state = state;
        if state != DeviceState::Streaming {
            self.last.iter_mut().for_each(|v| *v = 0);
        }
        Ok(())
    }

    fn diagnostics(&mut self) -> Result<Vec<AxisStatus>, TransportError> {
        if self.producer.is_abandoned() {
            return Err(TransportError::Disconnected);
        }
        Ok(self
            .last
            .iter()
            .map(|&position| AxisStatus {
                busy: self.state == DeviceState::Streaming,
                home: self.state == DeviceState::Settled,
                in_position: self.state == DeviceState::Neutral,
                command: position,
                encoder: position,
                current_on: true,
                servo_on: self.state != DeviceState::Settled,
                ..AxisStatus::default()
            })
            .collect())
    }
}
