//! Sample buffers and their FIFO queue discipline.
//!
//! A [`Buffer`] is a cheaply cloneable handle; every clone refers to the same
//! storage. Application threads enqueue and dequeue through the handle while
//! the mixer reads frames under a bounded [`Buffer::lock_for`] wait.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut, Range};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::format::{Format, BUFFERS_DEFAULT, LOOP_INFINITE};
use crate::sample::read_sample;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a buffer for logging and events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// What to do when an enqueue does not fit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EnqueuePolicy {
    /// Fail immediately with [`Error::Capacity`].
    #[default]
    Reject,
    /// Wait up to the given time for the mixer to make room.
    Block(Duration),
}

/// What to do when fewer frames are queued than requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DequeuePolicy {
    /// Fail with [`Error::Capacity`] and consume nothing.
    #[default]
    Exact,
    /// Return what is queued and zero the rest of the output.
    FillSilence,
}

/// Playback region metadata for single-region buffers.
///
/// Lengths of zero mean "to the end". `loop_begin` is an offset from
/// `play_begin`, so a region can be moved without touching its loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Region {
    pub play_begin: usize,
    pub play_length: usize,
    pub loop_begin: usize,
    pub loop_length: usize,
    /// 0 = play once, 1..=254 = loop-backs, 255 = until stopped.
    pub loop_count: u8,
    /// Opaque value handed back with every event for this region.
    pub token: u64,
}

impl Region {
    /// The whole buffer, played once.
    pub fn whole() -> Self {
        Self::default()
    }

    pub fn play(mut self, begin: usize, length: usize) -> Self {
        self.play_begin = begin;
        self.play_length = length;
        self
    }

    pub fn looping(mut self, begin: usize, length: usize) -> Self {
        self.loop_begin = begin;
        self.loop_length = length;
        self
    }

    pub fn loop_count(mut self, count: u8) -> Self {
        self.loop_count = count;
        self
    }

    pub fn token(mut self, token: u64) -> Self {
        self.token = token;
        self
    }

    #[inline]
    pub fn is_infinite(&self) -> bool {
        self.loop_count == LOOP_INFINITE
    }

    /// Resolve the region against `frames` queued frames.
    pub fn resolve(&self, frames: usize) -> Result<Span> {
        if self.play_begin > frames {
            return Err(Error::validation(format!(
                "play begin {} past end of buffer ({frames} frames)",
                self.play_begin
            )));
        }
        let play_len = match self.play_length {
            0 => frames - self.play_begin,
            n => n,
        };
        let play = self.play_begin..self.play_begin + play_len;
        if play.end > frames {
            return Err(Error::validation(format!(
                "play region {play:?} exceeds buffer of {frames} frames"
            )));
        }
        if self.loop_begin > play_len {
            return Err(Error::validation(format!(
                "loop begin {} outside play region of {play_len} frames",
                self.loop_begin
            )));
        }
        let loop_start = play.start + self.loop_begin;
        let loop_len = match self.loop_length {
            0 => play.end - loop_start,
            n => n,
        };
        let looped = loop_start..loop_start + loop_len;
        if looped.end > play.end {
            return Err(Error::validation(format!(
                "loop region {looped:?} exceeds play region {play:?}"
            )));
        }
        if self.loop_count != 0 && looped.is_empty() {
            return Err(Error::validation("looping an empty loop region"));
        }
        Ok(Span {
            play,
            looped,
            loop_count: self.loop_count,
            token: self.token,
        })
    }
}

/// A [`Region`] resolved to absolute frame ranges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span {
    pub play: Range<usize>,
    pub looped: Range<usize>,
    pub loop_count: u8,
    pub token: u64,
}

/// Decoded motion data returned by a [`MotionLoader`].
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedMotion {
    pub format: Format,
    /// Interleaved bytes in `format`.
    pub samples: Vec<u8>,
    /// Number of frames in `samples`.
    pub frames: usize,
}

pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// External reader of motion files (CSV and friends).
pub trait MotionLoader {
    fn load(&mut self, reader: &mut dyn Read, key: Option<&str>) -> Result<LoadedMotion, CollaboratorError>;
}

/// External writer of motion files.
pub trait MotionSaver {
    fn save(
        &mut self,
        format: &Format,
        samples: &[u8],
        key: Option<&str>,
        writer: &mut dyn Write,
    ) -> Result<(), CollaboratorError>;
}

pub(crate) struct Store {
    bytes: VecDeque<u8>,
    region: Region,
}

impl Store {
    #[inline]
    pub(crate) fn frames(&self, format: &Format) -> usize {
        self.bytes.len() / format.block_align()
    }

    pub(crate) fn region(&self) -> Region {
        self.region
    }

    /// Decode frame `index` without consuming it.
    pub(crate) fn read_frame(&self, format: &Format, index: usize, out: &mut [f64]) {
        let align = format.block_align();
        let width = format.encoding().bytes_per_sample();
        let start = index * align;
        let mut scratch = [0u8; 8];
        for (ch, slot) in out.iter_mut().enumerate().take(format.channels()) {
            let at = start + ch * width;
            for (b, dst) in scratch.iter_mut().enumerate().take(width) {
                *dst = self.bytes.get(at + b).copied().unwrap_or(0);
            }
            *slot = read_sample(&scratch[..width], format.encoding());
        }
    }

    /// Decode and consume the oldest frame. Returns `false` when empty.
    pub(crate) fn pop_frame(&mut self, format: &Format, out: &mut [f64]) -> bool {
        if self.frames(format) == 0 {
            return false;
        }
        self.read_frame(format, 0, out);
        self.bytes.drain(..format.block_align());
        true
    }
}

struct Inner {
    id: BufferId,
    format: Format,
    capacity_frames: usize,
    depth: usize,
    store: Mutex<Store>,
    space: Condvar,
    attached: AtomicUsize,
    deleted: AtomicBool,
    /// Buffers that receive a copy of every enqueue into this one.
    mirrors: Mutex<Vec<Weak<Inner>>>,
    /// The buffer this one mirrors, if any.
    shared_from: Mutex<Option<Weak<Inner>>>,
}

/// Shared handle to a block of samples or a queue of sub-buffers.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.inner.id)
            .field("format", &self.inner.format)
            .field("capacity_frames", &self.inner.capacity_frames)
            .field("depth", &self.inner.depth)
            .finish()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Buffer {
    /// Create an empty buffer holding up to `capacity_samples × queue_depth` frames.
    ///
    /// A depth above one makes the buffer queue-backed: sources consume its
    /// frames and report the end of each `capacity_samples` sub-buffer.
    pub fn new(format: Format, capacity_samples: usize, queue_depth: usize) -> Result<Self> {
        if capacity_samples == 0 {
            return Err(Error::validation("buffer capacity must be at least one frame"));
        }
        if queue_depth == 0 {
            return Err(Error::validation("queue depth must be at least one"));
        }
        let bytes = capacity_samples
            .checked_mul(queue_depth)
            .and_then(|frames| frames.checked_mul(format.block_align()))
            .ok_or_else(|| Error::validation("buffer capacity overflows"))?;

        let id = BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed));
        debug!(?id, ?format, capacity_samples, queue_depth, "buffer created");
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                format,
                capacity_frames: capacity_samples,
                depth: queue_depth,
                store: Mutex::new(Store {
                    bytes: VecDeque::with_capacity(bytes),
                    region: Region::whole(),
                }),
                space: Condvar::new(),
                attached: AtomicUsize::new(0),
                deleted: AtomicBool::new(false),
                mirrors: Mutex::new(Vec::new()),
                shared_from: Mutex::new(None),
            }),
        })
    }

    /// A single-region buffer filled with `bytes`.
    pub fn from_bytes(format: Format, bytes: &[u8]) -> Result<Self> {
        let frames = format.frames_in(bytes.len())?;
        let buffer = Self::new(format, frames.max(1), BUFFERS_DEFAULT)?;
        buffer.enqueue(bytes)?;
        Ok(buffer)
    }

    /// Read motion data through an external loader.
    ///
    /// Returns the loaded format, a single-region buffer and the frame count.
    pub fn load<L: MotionLoader + ?Sized>(
        loader: &mut L,
        reader: &mut dyn Read,
        key: Option<&str>,
    ) -> Result<(Format, Buffer, usize)> {
        let loaded = loader
            .load(reader, key)
            .map_err(|e| Error::Load(e.to_string()))?;
        let expected = loaded.frames * loaded.format.block_align();
        if loaded.samples.len() != expected {
            return Err(Error::Load(format!(
                "loader returned {} bytes for {} frames of {} bytes",
                loaded.samples.len(),
                loaded.frames,
                loaded.format.block_align()
            )));
        }
        let buffer = Self::from_bytes(loaded.format, &loaded.samples)
            .map_err(|e| Error::Load(e.to_string()))?;
        Ok((loaded.format, buffer, loaded.frames))
    }

    /// Write every queued frame through an external saver without consuming it.
    pub fn save<S: MotionSaver + ?Sized>(
        &self,
        saver: &mut S,
        writer: &mut dyn Write,
        key: Option<&str>,
    ) -> Result<()> {
        let bytes = self.snapshot();
        saver
            .save(&self.inner.format, &bytes, key, writer)
            .map_err(|e| Error::Save(e.to_string()))
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.inner.format
    }

    /// Frames per sub-buffer.
    #[inline]
    pub fn capacity_samples(&self) -> usize {
        self.inner.capacity_frames
    }

    #[inline]
    pub fn queue_depth(&self) -> usize {
        self.inner.depth
    }

    #[inline]
    pub fn is_queue(&self) -> bool {
        self.inner.depth > 1
    }

    /// Total frames the buffer can hold.
    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.inner.capacity_frames * self.inner.depth
    }

    pub fn queued_samples(&self) -> usize {
        self.inner.store.lock().frames(&self.inner.format)
    }

    pub fn free_samples(&self) -> usize {
        self.capacity_frames() - self.queued_samples()
    }

    /// Queued duration in whole milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.inner.format.frames_to_ms(self.queued_samples() as u64)
    }

    pub fn region(&self) -> Region {
        self.inner.store.lock().region
    }

    /// Replace the playback region. Ranges are checked when a source plays it.
    pub fn set_region(&self, region: Region) -> Result<()> {
        self.check_live()?;
        if region.loop_count != 0 && self.is_queue() {
            return Err(Error::validation("queue-backed buffers cannot loop"));
        }
        self.inner.store.lock().region = region;
        Ok(())
    }

    /// Append whole frames, rejecting when full.
    pub fn enqueue(&self, data: &[u8]) -> Result<()> {
        self.enqueue_with(data, EnqueuePolicy::Reject)
    }

    /// Append whole frames. Nothing is written unless all of `data` fits.
    ///
    /// Buffers sharing this one (see [`set_shared`](Self::set_shared)) get
    /// a copy; a mirror that is full or deleted is skipped with a warning.
    pub fn enqueue_with(&self, data: &[u8], policy: EnqueuePolicy) -> Result<()> {
        self.append(data, policy)?;
        let mirrors: Vec<Buffer> = {
            let mut mirrors = self.inner.mirrors.lock();
            mirrors.retain(|m| m.strong_count() > 0);
            mirrors
                .iter()
                .filter_map(Weak::upgrade)
                .map(|inner| Buffer { inner })
                .collect()
        };
        for mirror in mirrors {
            if let Err(err) = mirror.append(data, EnqueuePolicy::Reject) {
                warn!(id = ?self.inner.id, mirror = ?mirror.inner.id, %err, "shared buffer skipped a mirror");
            }
        }
        Ok(())
    }

    fn append(&self, data: &[u8], policy: EnqueuePolicy) -> Result<()> {
        self.check_live()?;
        let format = self.inner.format;
        let frames = format.frames_in(data.len())?;
        let capacity = self.capacity_frames();
        if frames > capacity {
            return Err(Error::capacity(format!(
                "{frames} frames never fit in a buffer of {capacity}"
            )));
        }

        let mut store = self.inner.store.lock();
        let deadline = match policy {
            EnqueuePolicy::Reject => None,
            EnqueuePolicy::Block(timeout) => Some(Instant::now() + timeout),
        };
        while store.frames(&format) + frames > capacity {
            let Some(deadline) = deadline else {
                return Err(Error::capacity(format!(
                    "queue full: {} of {capacity} frames used, {frames} requested",
                    store.frames(&format)
                )));
            };
            if self.inner.space.wait_until(&mut store, deadline).timed_out()
                && store.frames(&format) + frames > capacity
            {
                return Err(Error::capacity("timed out waiting for queue space"));
            }
            self.check_live()?;
        }
        store.bytes.extend(data.iter().copied());
        trace!(id = ?self.inner.id, frames, queued = store.frames(&format), "enqueued");
        Ok(())
    }

    /// Consume exactly `out.len()` bytes of frames, oldest first.
    pub fn dequeue(&self, out: &mut [u8]) -> Result<usize> {
        self.dequeue_with(out, DequeuePolicy::Exact)
    }

    /// Consume frames into `out`, returning how many real frames were written.
    pub fn dequeue_with(&self, out: &mut [u8], policy: DequeuePolicy) -> Result<usize> {
        self.check_live()?;
        let format = self.inner.format;
        let wanted = format.frames_in(out.len())?;
        let mut store = self.inner.store.lock();
        let queued = store.frames(&format);
        if queued < wanted && policy == DequeuePolicy::Exact {
            return Err(Error::capacity(format!(
                "{wanted} frames requested, {queued} queued"
            )));
        }
        let frames = wanted.min(queued);
        let bytes = frames * format.block_align();
        for (dst, src) in out.iter_mut().zip(store.bytes.drain(..bytes)) {
            *dst = src;
        }
        out[bytes..].iter_mut().for_each(|b| *b = 0);
        drop(store);
        self.inner.space.notify_all();
        Ok(frames)
    }

    /// Discard everything queued. Returns the number of frames dropped.
    pub fn flush(&self) -> usize {
        let mut store = self.inner.store.lock();
        let frames = store.frames(&self.inner.format);
        store.bytes.clear();
        drop(store);
        self.inner.space.notify_all();
        debug!(id = ?self.inner.id, frames, "buffer flushed");
        frames
    }

    /// Number of sources currently bound to this buffer.
    pub fn attachments(&self) -> usize {
        self.inner.attached.load(Ordering::Acquire)
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.load(Ordering::Acquire)
    }

    /// Release the storage. Fails while any source is bound to the buffer.
    pub fn delete(self) -> Result<()> {
        let mut store = self.inner.store.lock();
        let attached = self.attachments();
        if attached > 0 {
            return Err(Error::state(format!(
                "buffer {:?} is bound to {attached} source(s)",
                self.inner.id
            )));
        }
        self.inner.deleted.store(true, Ordering::Release);
        store.bytes = VecDeque::new();
        drop(store);
        self.inner.space.notify_all();
        debug!(id = ?self.inner.id, "buffer deleted");
        Ok(())
    }

    /// Copy of every queued byte, oldest first.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.store.lock().bytes.iter().copied().collect()
    }

    /// Lock the queued bytes for in-place access, oldest frame first.
    ///
    /// Dropping the view unlocks the buffer. The mixer skips this buffer
    /// (counting an under-run) while the view is held.
    pub fn lock_samples(&self) -> Result<SamplesMut<'_>> {
        let mut store = self.inner.store.lock();
        self.check_live()?;
        store.bytes.make_contiguous();
        Ok(SamplesMut { store })
    }

    /// Mirror every enqueue into `shared` into this buffer too, or stop with `None`.
    ///
    /// Only direct enqueues are mirrored; a mirror does not forward copies it receives.
    pub fn set_shared(&self, shared: Option<&Buffer>) -> Result<()> {
        self.check_live()?;
        if let Some(shared) = shared {
            if shared == self {
                return Err(Error::validation("a buffer cannot share itself"));
            }
            if shared.inner.format != self.inner.format {
                return Err(Error::validation(format!(
                    "shared buffer format {:?} differs from {:?}",
                    shared.inner.format, self.inner.format
                )));
            }
            shared.check_live()?;
        }

        let me = Arc::downgrade(&self.inner);
        let mut from = self.inner.shared_from.lock();
        if let Some(old) = from.take().and_then(|w| w.upgrade()) {
            old.mirrors.lock().retain(|m| !m.ptr_eq(&me));
        }
        if let Some(shared) = shared {
            let mut mirrors = shared.inner.mirrors.lock();
            mirrors.retain(|m| m.strong_count() > 0);
            mirrors.push(me);
            *from = Some(Arc::downgrade(&shared.inner));
            debug!(id = ?self.inner.id, shared = ?shared.inner.id, "buffer sharing");
        }
        Ok(())
    }

    /// The buffer whose enqueues this one mirrors.
    pub fn shared(&self) -> Option<Buffer> {
        let from = self.inner.shared_from.lock();
        from.as_ref().and_then(Weak::upgrade).map(|inner| Buffer { inner })
    }

    pub(crate) fn attach(&self) -> Result<()> {
        let _store = self.inner.store.lock();
        self.check_live()?;
        self.inner.attached.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub(crate) fn detach(&self) {
        let _ = self
            .inner
            .attached
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Store> {
        self.inner.store.lock()
    }

    /// Lock the storage, giving up after `budget`.
    pub(crate) fn lock_for(&self, budget: Duration) -> Option<MutexGuard<'_, Store>> {
        self.inner.store.try_lock_for(budget)
    }

    /// Overwrite the contents with `bytes`, keeping the newest frames that
    /// fit. Gives up after `budget`.
    pub(crate) fn replace_within(&self, bytes: &[u8], budget: Duration) -> bool {
        let Some(mut store) = self.lock_for(budget) else {
            return false;
        };
        let align = self.inner.format.block_align();
        let keep = (bytes.len() / align).min(self.capacity_frames()) * align;
        store.bytes.clear();
        store.bytes.extend(bytes[bytes.len() - keep..].iter().copied());
        true
    }

    /// Wake writers blocked in [`EnqueuePolicy::Block`].
    pub(crate) fn notify_space(&self) {
        self.inner.space.notify_all();
    }

    fn check_live(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(Error::state(format!("buffer {:?} was deleted", self.inner.id)));
        }
        Ok(())
    }
}

/// Locked, contiguous view of a buffer's queued bytes.
///
/// Returned by [`Buffer::lock_samples`]; the buffer unlocks on drop.
pub struct SamplesMut<'a> {
    store: MutexGuard<'a, Store>,
}

impl Deref for SamplesMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.store.bytes.as_slices().0
    }
}

impl DerefMut for SamplesMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.store.bytes.as_mut_slices().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::Encoding;
    use std::thread;

    fn frames_i16(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn mono() -> Format {
        Format::new(50, 1, Encoding::I16).unwrap()
    }

    #[test]
    fn enqueue_dequeue_is_fifo() {
        let buffer = Buffer::new(mono(), 4, 2).unwrap();
        buffer.enqueue(&frames_i16(&[1, 2, 3])).unwrap();
        buffer.enqueue(&frames_i16(&[4, 5])).unwrap();

        let mut out = [0u8; 8];
        assert_eq!(buffer.dequeue(&mut out).unwrap(), 4);
        assert_eq!(out.to_vec(), frames_i16(&[1, 2, 3, 4]));
        assert_eq!(buffer.queued_samples(), 1);
    }

    #[test]
    fn full_queue_rejects_without_partial_write() {
        let buffer = Buffer::new(mono(), 2, 1).unwrap();
        buffer.enqueue(&frames_i16(&[1])).unwrap();
        let err = buffer.enqueue(&frames_i16(&[2, 3])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert_eq!(buffer.queued_samples(), 1);
    }

    #[test]
    fn misaligned_enqueue_is_a_validation_error() {
        let buffer = Buffer::new(Format::default(), 8, 1).unwrap();
        let err = buffer.enqueue(&[0u8; 5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(buffer.queued_samples(), 0);
    }

    #[test]
    fn exact_dequeue_fails_when_short_and_fill_silence_pads() {
        let buffer = Buffer::new(mono(), 4, 1).unwrap();
        buffer.enqueue(&frames_i16(&[7])).unwrap();

        let mut out = [0xffu8; 4];
        assert_eq!(buffer.dequeue(&mut out).unwrap_err().kind(), ErrorKind::Capacity);
        assert_eq!(buffer.queued_samples(), 1);

        let got = buffer.dequeue_with(&mut out, DequeuePolicy::FillSilence).unwrap();
        assert_eq!(got, 1);
        assert_eq!(out.to_vec(), frames_i16(&[7, 0]));
    }

    #[test]
    fn blocking_enqueue_waits_for_space() {
        let buffer = Buffer::new(mono(), 1, 1).unwrap();
        buffer.enqueue(&frames_i16(&[1])).unwrap();

        let reader = buffer.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut out = [0u8; 2];
            reader.dequeue(&mut out).unwrap();
        });

        buffer
            .enqueue_with(&frames_i16(&[2]), EnqueuePolicy::Block(Duration::from_secs(5)))
            .unwrap();
        handle.join().unwrap();
        assert_eq!(buffer.snapshot(), frames_i16(&[2]));
    }

    #[test]
    fn blocking_enqueue_times_out() {
        let buffer = Buffer::new(mono(), 1, 1).unwrap();
        buffer.enqueue(&frames_i16(&[1])).unwrap();
        let err = buffer
            .enqueue_with(&frames_i16(&[2]), EnqueuePolicy::Block(Duration::from_millis(5)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capacity);
    }

    #[test]
    fn duration_follows_queued_frames() {
        let buffer = Buffer::new(mono(), 100, 1).unwrap();
        buffer.enqueue(&frames_i16(&[0; 37])).unwrap();
        assert_eq!(buffer.duration_ms(), 37 * 1000 / 50);
    }

    #[test]
    fn delete_fails_while_attached() {
        let buffer = Buffer::new(mono(), 4, 1).unwrap();
        buffer.attach().unwrap();
        let err = buffer.clone().delete().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);

        buffer.detach();
        let other = buffer.clone();
        buffer.delete().unwrap();
        assert!(other.is_deleted());
        assert_eq!(other.enqueue(&frames_i16(&[1])).unwrap_err().kind(), ErrorKind::State);
    }

    #[test]
    fn delete_and_attach_never_both_succeed() {
        for _ in 0..200 {
            let buffer = Buffer::new(mono(), 4, 1).unwrap();
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(2));
            let (a, b) = (buffer.clone(), barrier.clone());
            let binder = thread::spawn(move || {
                b.wait();
                a.attach().is_ok()
            });
            barrier.wait();
            let deleted = buffer.clone().delete().is_ok();
            let attached = binder.join().unwrap();
            assert!(!(deleted && attached), "bound to a deleted buffer");
            assert_eq!(buffer.attachments() == 1, attached);
        }
    }

    #[test]
    fn locked_samples_edit_in_place() {
        let buffer = Buffer::new(mono(), 4, 1).unwrap();
        buffer.enqueue(&frames_i16(&[1, 2])).unwrap();
        let mut out = [0u8; 2];
        buffer.dequeue(&mut out).unwrap();
        buffer.enqueue(&frames_i16(&[3])).unwrap();
        {
            let mut view = buffer.lock_samples().unwrap();
            assert_eq!(&*view, &frames_i16(&[2, 3])[..]);
            view[..2].copy_from_slice(&20i16.to_le_bytes());
            assert!(buffer.lock_for(Duration::from_millis(1)).is_none());
        }
        assert_eq!(buffer.snapshot(), frames_i16(&[20, 3]));

        let other = buffer.clone();
        buffer.delete().unwrap();
        assert_eq!(other.lock_samples().err().map(|e| e.kind()), Some(ErrorKind::State));
    }

    #[test]
    fn shared_buffers_mirror_enqueues() {
        let primary = Buffer::new(mono(), 4, 1).unwrap();
        let mirror = Buffer::new(mono(), 2, 1).unwrap();
        mirror.set_shared(Some(&primary)).unwrap();
        assert_eq!(mirror.shared(), Some(primary.clone()));

        primary.enqueue(&frames_i16(&[1, 2])).unwrap();
        assert_eq!(mirror.snapshot(), frames_i16(&[1, 2]));
        // the mirror is full; the primary still accepts
        primary.enqueue(&frames_i16(&[3])).unwrap();
        assert_eq!(primary.queued_samples(), 3);
        assert_eq!(mirror.queued_samples(), 2);
        // copies are not forwarded back
        mirror.flush();
        mirror.enqueue(&frames_i16(&[9])).unwrap();
        assert_eq!(primary.queued_samples(), 3);

        mirror.set_shared(None).unwrap();
        primary.flush();
        primary.enqueue(&frames_i16(&[4])).unwrap();
        assert_eq!(mirror.snapshot(), frames_i16(&[9]));

        let stereo = Buffer::new(Format::new(50, 2, Encoding::I16).unwrap(), 2, 1).unwrap();
        assert_eq!(stereo.set_shared(Some(&primary)).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(primary.set_shared(Some(&primary)).unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn flush_is_the_only_way_to_drop_samples() {
        let buffer = Buffer::new(mono(), 4, 1).unwrap();
        buffer.enqueue(&frames_i16(&[1, 2, 3])).unwrap();
        assert_eq!(buffer.flush(), 3);
        assert_eq!(buffer.queued_samples(), 0);
    }

    #[test]
    fn region_resolves_relative_loop() {
        let span = Region::whole()
            .play(2, 6)
            .looping(1, 3)
            .loop_count(2)
            .resolve(10)
            .unwrap();
        assert_eq!(span.play, 2..8);
        assert_eq!(span.looped, 3..6);

        let defaults = Region::whole().resolve(10).unwrap();
        assert_eq!(defaults.play, 0..10);
        assert_eq!(defaults.looped, 0..10);

        assert!(Region::whole().play(4, 8).resolve(10).is_err());
        assert!(Region::whole().looping(0, 11).resolve(10).is_err());
    }

    #[test]
    fn queue_buffers_refuse_loops() {
        let buffer = Buffer::new(mono(), 4, 3).unwrap();
        let err = buffer.set_region(Region::whole().loop_count(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    struct Fixed(Vec<u8>, usize);

    impl MotionLoader for Fixed {
        fn load(&mut self, _: &mut dyn Read, _: Option<&str>) -> Result<LoadedMotion, CollaboratorError> {
            Ok(LoadedMotion {
                format: Format::new(50, 1, Encoding::I16)?,
                samples: self.0.clone(),
                frames: self.1,
            })
        }
    }

    #[test]
    fn load_checks_the_collaborator_result() {
        let mut ok = Fixed(frames_i16(&[1, 2, 3]), 3);
        let (format, buffer, frames) = Buffer::load(&mut ok, &mut std::io::empty(), None).unwrap();
        assert_eq!(format.channels(), 1);
        assert_eq!(frames, 3);
        assert_eq!(buffer.queued_samples(), 3);

        let mut bad = Fixed(frames_i16(&[1, 2, 3]), 4);
        let err = Buffer::load(&mut bad, &mut std::io::empty(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
