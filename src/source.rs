//! Playback voices.
//!
//! A [`Source`] plays one [`Buffer`] through an optional filter chain into the
//! context's mix. Its transport controls are called from application
//! threads. Rendering happens on the mixer thread, which only ever waits a
//! bounded time for the voice, its buffer, or its filter graph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::{Buffer, Span, Store};
use crate::context::{Command, Link};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventSink};
use crate::filter::{FilterChain, FilterGraph, FilterId};
use crate::format::{Format, CHANNELS_MAX, LOOP_INFINITE};
use crate::sample::Block;

/// Playback speeds accepted by [`Source::set_speed`], in percent.
pub const SPEEDS: [u32; 5] = [25, 50, 100, 200, 400];
pub const VOLUME_MAX: u8 = 100;

static NEXT_SOURCE: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SourceState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// How [`Source::stop`] treats the rest of the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Flush {
    /// Stop at once.
    #[default]
    Force,
    /// Skip remaining loops and stop at the end of the play region.
    Drain,
}

/// What a render pass left the voice as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Rendered {
    /// The voice was locked elsewhere for the whole budget.
    Busy,
    Active,
    /// The voice stopped and should leave the playlist.
    Finished,
}

pub(crate) struct Voice {
    state: SourceState,
    buffer: Option<Buffer>,
    filter: Option<(FilterGraph, FilterId)>,
    chain: Option<FilterChain>,
    volume: u8,
    speed: u32,

    span: Option<Span>,
    cursor: f64,
    loops_left: u8,
    draining: bool,
    token: u64,

    phase: f64,
    consumed: usize,
    hold: [f64; CHANNELS_MAX],

    elapsed: f64,
    start_pending: bool,
    in_playlist: bool,
    underruns: u64,
    raw: Block,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            state: SourceState::Stopped,
            buffer: None,
            filter: None,
            chain: None,
            volume: VOLUME_MAX,
            speed: 100,
            span: None,
            cursor: 0.0,
            loops_left: 0,
            draining: false,
            token: 0,
            phase: 1.0,
            consumed: 0,
            hold: [0.0; CHANNELS_MAX],
            elapsed: 0.0,
            start_pending: false,
            in_playlist: false,
            underruns: 0,
            raw: Block::new(1),
        }
    }
}

impl Drop for Voice {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.detach();
        }
    }
}

impl Voice {
    fn step(&self, buffer: &Format, master: &Format) -> f64 {
        self.speed as f64 / 100.0 * buffer.sample_rate() as f64 / master.sample_rate() as f64
    }

    /// Make sure `chain` is current. `Ok(false)` means the graph was busy.
    fn ensure_chain(&mut self, src: &Format, master: &Format, budget: Duration) -> Result<bool> {
        if let Some(chain) = self.chain.as_mut() {
            if chain.src_format() == *src {
                match &self.filter {
                    None => return Ok(true),
                    Some((graph, id)) => match graph.refresh(chain, budget) {
                        Some(true) => return Ok(true),
                        None => return Ok(false),
                        Some(false) => debug!(filter = ?id, "source filter changed, rebuilding"),
                    },
                }
            }
        }
        let chain = match &self.filter {
            None => FilterChain::passthrough(src, master),
            Some((graph, id)) => match graph.try_compile(*id, src, master, budget)? {
                Some(chain) => chain,
                None => return Ok(false),
            },
        };
        self.chain = Some(chain);
        Ok(true)
    }

    fn underrun(&mut self, id: SourceId) {
        self.underruns += 1;
        if cfg!(feature = "warn_on_underrun") || self.underruns == 1 {
            warn!(?id, underruns = self.underruns, "source starved, rendering silence");
        }
    }

    fn emit(&self, id: SourceId, kind: EventKind, events: &mut EventSink) {
        events.push(Event {
            source: id,
            kind,
            token: self.token,
        });
    }

    /// Wrap or finish after the cursor moved.
    fn settle(&mut self, id: SourceId, span: &Span, events: &mut EventSink) {
        while self.state == SourceState::Playing {
            let looping = !self.draining && self.loops_left > 0 && !span.looped.is_empty();
            let end = if looping { span.looped.end } else { span.play.end };
            if self.cursor < end as f64 {
                break;
            }
            if looping {
                self.emit(id, EventKind::EndOfLoop, events);
                self.cursor -= span.looped.len() as f64;
                if self.loops_left != LOOP_INFINITE {
                    self.loops_left -= 1;
                }
            } else {
                self.emit(id, EventKind::EndOfBuffer, events);
                self.state = SourceState::Stopped;
            }
        }
    }

    fn pull_region(&mut self, id: SourceId, store: &Store, format: &Format, frames: usize, step: f64, events: &mut EventSink) {
        let Some(span) = self.span.clone() else {
            self.state = SourceState::Stopped;
            self.raw.push_silence(frames);
            return;
        };
        let channels = format.channels();
        let mut frame = [0.0; CHANNELS_MAX];
        self.settle(id, &span, events);
        for _ in 0..frames {
            if self.state != SourceState::Playing {
                self.raw.push_silence(1);
                continue;
            }
            store.read_frame(format, self.cursor as usize, &mut frame[..channels]);
            self.raw.push_frame(&frame[..channels]);
            self.cursor += step;
            self.elapsed += step;
            self.settle(id, &span, events);
        }
    }

    fn pull_queue(&mut self, id: SourceId, store: &mut Store, buffer: &Buffer, frames: usize, step: f64, events: &mut EventSink) {
        let format = buffer.format();
        let channels = format.channels();
        let sub_buffer = buffer.capacity_samples();
        for _ in 0..frames {
            while self.state == SourceState::Playing && self.phase >= 1.0 {
                if store.pop_frame(&format, &mut self.hold[..channels]) {
                    self.phase -= 1.0;
                    self.elapsed += 1.0;
                    self.consumed += 1;
                    if self.consumed == sub_buffer {
                        self.consumed = 0;
                        self.emit(id, EventKind::EndOfBuffer, events);
                    }
                } else {
                    if self.consumed > 0 {
                        self.consumed = 0;
                        self.emit(id, EventKind::EndOfBuffer, events);
                    }
                    self.emit(id, EventKind::EndOfStream, events);
                    self.state = SourceState::Stopped;
                }
            }
            if self.state != SourceState::Playing {
                self.raw.push_silence(1);
                continue;
            }
            self.raw.push_frame(&self.hold[..channels]);
            self.phase += step;
        }
    }

    fn render(
        &mut self,
        id: SourceId,
        master: &Format,
        frames: usize,
        budget: Duration,
        mix: &mut Block,
        events: &mut EventSink,
    ) {
        if self.state != SourceState::Playing {
            return;
        }
        let Some(buffer) = self.buffer.clone() else {
            self.state = SourceState::Stopped;
            return;
        };
        let format = buffer.format();
        let src = format.with_sample_rate(master.sample_rate());

        match self.ensure_chain(&src, master, budget) {
            Ok(true) => {}
            Ok(false) => return self.underrun(id),
            Err(err) => {
                warn!(?id, %err, "source filter failed to build, stopping");
                self.emit(id, EventKind::Error, events);
                self.state = SourceState::Stopped;
                return;
            }
        }

        if self.start_pending {
            self.start_pending = false;
            self.emit(id, EventKind::StartOfBuffer, events);
        }

        let step = self.step(&format, master);
        self.raw.reset(format.channels());
        {
            let Some(mut store) = buffer.lock_for(budget) else {
                return self.underrun(id);
            };
            if buffer.is_queue() {
                self.pull_queue(id, &mut store, &buffer, frames, step, events);
            } else {
                self.pull_region(id, &store, &format, frames, step, events);
            }
        }
        if buffer.is_queue() {
            buffer.notify_space();
        }

        let Some(chain) = self.chain.as_mut() else {
            return;
        };
        chain.process(&mut self.raw);
        let gain = self.volume as f64 / VOLUME_MAX as f64;
        for (m, s) in mix.as_mut_slice().iter_mut().zip(self.raw.as_slice()) {
            *m += s * gain;
        }
    }
}

pub(crate) struct SourceShared {
    id: SourceId,
    voice: Mutex<Voice>,
    link: Weak<Link>,
}

/// Handle to a playback voice. Clones refer to the same voice.
#[derive(Clone)]
pub struct Source {
    shared: Arc<SourceShared>,
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl core::fmt::Debug for Source {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Source {
    pub(crate) fn new(link: &Arc<Link>) -> Self {
        let id = SourceId(NEXT_SOURCE.fetch_add(1, Ordering::Relaxed));
        Self {
            shared: Arc::new(SourceShared {
                id,
                voice: Mutex::new(Voice::default()),
                link: Arc::downgrade(link),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<SourceShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn from_shared(shared: Arc<SourceShared>) -> Self {
        Self { shared }
    }

    fn link(&self) -> Result<Arc<Link>> {
        self.shared
            .link
            .upgrade()
            .ok_or_else(|| Error::state("the source's context was destroyed"))
    }

    pub fn id(&self) -> SourceId {
        self.shared.id
    }

    pub fn state(&self) -> SourceState {
        self.shared.voice.lock().state
    }

    pub fn buffer(&self) -> Option<Buffer> {
        self.shared.voice.lock().buffer.clone()
    }

    /// Bind `buffer`, or unbind with `None`. Only allowed while stopped.
    pub fn set_buffer(&self, buffer: Option<&Buffer>) -> Result<()> {
        let mut voice = self.shared.voice.lock();
        if voice.state != SourceState::Stopped {
            return Err(Error::state(format!("{:?} is {:?}", self.shared.id, voice.state)));
        }
        if let Some(buffer) = buffer {
            buffer.attach()?;
        }
        if let Some(old) = voice.buffer.take() {
            old.detach();
        }
        voice.buffer = buffer.cloned();
        voice.chain = None;
        Ok(())
    }

    /// Route playback through node `id` of `graph`, or remove the filter.
    ///
    /// Takes effect on the next tick; the chain is rebuilt whenever the
    /// graph changes under it.
    pub fn set_filter(&self, filter: Option<(&FilterGraph, FilterId)>) -> Result<()> {
        if let Some((graph, id)) = filter {
            graph.kind(id)?;
        }
        let mut voice = self.shared.voice.lock();
        voice.filter = filter.map(|(graph, id)| (graph.clone(), id));
        voice.chain = None;
        Ok(())
    }

    pub fn filter(&self) -> Option<(FilterGraph, FilterId)> {
        self.shared.voice.lock().filter.clone()
    }

    /// Play from the start of the region, looping `loop_count` times
    /// ([`LOOP_INFINITE`] loops until stopped).
    pub fn play(&self, loop_count: u8) -> Result<()> {
        self.start(Some(loop_count))
    }

    /// Play with the loop count stored in the buffer's region.
    pub fn play_region(&self) -> Result<()> {
        self.start(None)
    }

    /// [`play`](Self::play), and route this source's events to `listener`.
    pub fn play_with<F>(&self, loop_count: u8, listener: F) -> Result<()>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let link = self.link()?;
        link.dispatcher.listen(self.shared.id, Box::new(listener));
        self.start(Some(loop_count)).inspect_err(|_| link.dispatcher.unlisten(self.shared.id))
    }

    fn start(&self, loop_count: Option<u8>) -> Result<()> {
        let link = self.link()?;
        let _admitted = link.admission.read();
        let mut voice = self.shared.voice.lock();
        if voice.state != SourceState::Stopped {
            return Err(Error::state(format!("{:?} is already {:?}", self.shared.id, voice.state)));
        }
        let buffer = voice
            .buffer
            .clone()
            .ok_or_else(|| Error::state(format!("{:?} has no buffer", self.shared.id)))?;
        if buffer.is_deleted() {
            return Err(Error::state(format!("buffer {:?} was deleted", buffer.id())));
        }

        if buffer.is_queue() {
            if loop_count.is_some_and(|n| n != 0) {
                return Err(Error::validation("queue-backed sources cannot loop"));
            }
            voice.span = None;
            voice.token = buffer.region().token;
            voice.phase = 1.0;
            voice.consumed = 0;
            voice.hold = [0.0; CHANNELS_MAX];
        } else {
            let format = buffer.format();
            let mut span = {
                let store = buffer.lock();
                store.region().resolve(store.frames(&format))?
            };
            if let Some(n) = loop_count {
                span.loop_count = n;
            }
            voice.cursor = span.play.start as f64;
            voice.loops_left = span.loop_count;
            voice.token = span.token;
            voice.span = Some(span);
        }
        voice.draining = false;
        voice.elapsed = 0.0;
        voice.start_pending = true;
        if let Some(chain) = voice.chain.as_mut() {
            chain.reset();
        }
        voice.state = SourceState::Playing;

        if !voice.in_playlist {
            voice.in_playlist = true;
            if let Err(err) = link.send(Command::Attach(self.clone())) {
                voice.in_playlist = false;
                voice.state = SourceState::Stopped;
                return Err(err);
            }
        }
        debug!(id = ?self.shared.id, buffer = ?buffer.id(), ?loop_count, "source playing");
        Ok(())
    }

    /// Pause (`true`) or resume (`false`). Position is kept across a pause.
    pub fn pause(&self, paused: bool) -> Result<()> {
        let link = self.link().ok();
        let _admitted = link.as_ref().map(|link| link.admission.read());
        let mut voice = self.shared.voice.lock();
        voice.state = match (voice.state, paused) {
            (SourceState::Playing | SourceState::Paused, true) => SourceState::Paused,
            (SourceState::Paused | SourceState::Playing, false) => SourceState::Playing,
            (SourceState::Stopped, _) => {
                return Err(Error::state(format!("{:?} is stopped", self.shared.id)));
            }
        };
        Ok(())
    }

    /// Stop playback. Queued samples stay in the buffer either way.
    pub fn stop(&self, flush: Flush) -> Result<()> {
        let mut voice = self.shared.voice.lock();
        match (voice.state, flush) {
            (SourceState::Playing, Flush::Drain) => voice.draining = true,
            _ => voice.state = SourceState::Stopped,
        }
        Ok(())
    }

    /// Linear gain in percent, `0..=100`.
    pub fn set_volume(&self, volume: u8) -> Result<()> {
        if volume > VOLUME_MAX {
            return Err(Error::validation(format!("volume {volume} above {VOLUME_MAX}")));
        }
        self.shared.voice.lock().volume = volume;
        Ok(())
    }

    pub fn volume(&self) -> u8 {
        self.shared.voice.lock().volume
    }

    /// Playback speed in percent; one of [`SPEEDS`].
    pub fn set_speed(&self, speed: u32) -> Result<()> {
        if !SPEEDS.contains(&speed) {
            return Err(Error::validation(format!("speed {speed}% not one of {SPEEDS:?}")));
        }
        self.shared.voice.lock().speed = speed;
        Ok(())
    }

    pub fn speed(&self) -> u32 {
        self.shared.voice.lock().speed
    }

    /// Source frames played since the last `play`.
    pub fn position(&self) -> u64 {
        self.shared.voice.lock().elapsed as u64
    }

    pub fn position_ms(&self) -> u64 {
        let voice = self.shared.voice.lock();
        match &voice.buffer {
            Some(buffer) => buffer.format().frames_to_ms(voice.elapsed as u64),
            None => 0,
        }
    }

    /// Ticks this source rendered silence because it could not get its data.
    pub fn underruns(&self) -> u64 {
        self.shared.voice.lock().underruns
    }

    /// Stop, unbind the buffer, and drop the event listener.
    pub fn delete(self) -> Result<()> {
        self.stop(Flush::Force)?;
        self.set_buffer(None)?;
        if let Ok(link) = self.link() {
            link.dispatcher.unlisten(self.shared.id);
        }
        Ok(())
    }

    /// Render one tick into `mix`. Called by the mixer only.
    pub(crate) fn render(
        &self,
        master: &Format,
        frames: usize,
        budget: Duration,
        mix: &mut Block,
        events: &mut EventSink,
    ) -> Rendered {
        let Some(mut voice) = self.shared.voice.try_lock_for(budget) else {
            return Rendered::Busy;
        };
        voice.render(self.shared.id, master, frames, budget, mix, events);
        if voice.state == SourceState::Stopped {
            voice.in_playlist = false;
            return Rendered::Finished;
        }
        Rendered::Active
    }
}
