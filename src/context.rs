//! Contexts: a device session with its mixer, sources and inputs.
//!
//! Application threads talk to the mixer through an `rtrb` command ring.
//! The mixer tick runs either on the cadence thread started by
//! [`Context::run`] or wherever [`Context::tick`] is called, and waits at
//! most the configured lock budget on anything shared with the application.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, info, trace, warn};

use crate::buffer::Buffer;
use crate::device::{AxisStatus, DeviceDesc, DeviceMove, DeviceOptions, DeviceState};
use crate::error::{Error, Result};
use crate::event::{self, DispatchThread, Dispatcher, EventSink, EVENT_CAPACITY_DEFAULT};
use crate::filter::{FilterChain, FilterGraph, FilterId, ProcessStats};
use crate::format::{Format, SAMPLES_DEFAULT};
use crate::input::{Input, InputId};
use crate::sample::{saturate, Block};
use crate::source::{Rendered, Source, SourceShared, SourceState, VOLUME_MAX};
use crate::transport::{Transport, TransportError};

pub const COMMAND_CAPACITY_DEFAULT: usize = 64;
pub const LOCK_BUDGET_DEFAULT: Duration = Duration::from_micros(200);

/// Device ids claimed by started contexts.
static CLAIMED: Mutex<Vec<u8>> = parking_lot::const_mutex(Vec::new());

pub(crate) enum Command {
    Attach(Source),
    AttachInput(Input),
    DetachInput(InputId),
    MasterVolume(u8),
    MasterFilter(Option<FilterChain>),
}

/// The part of a context that sources and inputs hold on to.
pub(crate) struct Link {
    commands: Mutex<Producer<Command>>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    sources: Mutex<Vec<Weak<SourceShared>>>,
    /// Held shared by `play`, exclusively while the context is being replaced as current.
    pub(crate) admission: RwLock<()>,
}

impl Link {
    pub(crate) fn send(&self, command: Command) -> Result<()> {
        self.commands
            .lock()
            .push(command)
            .map_err(|rtrb::PushError::Full(_)| Error::capacity("mixer command queue is full"))
    }
}

struct Mixer {
    commands: Consumer<Command>,
    events: EventSink,
    playlist: Vec<Source>,
    inputs: Vec<Input>,
    master_volume: u8,
    master_chain: Option<FilterChain>,
    mix: Block,
    out: Vec<u8>,
    ticks: u64,
}

impl Mixer {
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                Command::Attach(source) => {
                    trace!(id = ?source.id(), "source attached");
                    self.playlist.push(source);
                }
                Command::AttachInput(input) => {
                    if !self.inputs.contains(&input) {
                        self.inputs.push(input);
                    }
                }
                Command::DetachInput(id) => self.inputs.retain(|i| i.id() != id),
                Command::MasterVolume(volume) => self.master_volume = volume,
                Command::MasterFilter(chain) => self.master_chain = chain,
            }
        }
    }
}

/// Transport and device state.
///
/// Application threads hold this across blocking device calls. The mixer
/// only tries it within the lock budget and skips delivery when it is busy.
struct Device {
    transport: Option<Box<dyn Transport>>,
    state: DeviceState,
}

impl Device {
    /// Move the device, falling back to emulation if it is gone.
    fn drive(&mut self, state: DeviceState, shared: &Shared) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };
        match transport.move_to(state) {
            Ok(()) => {
                debug!(?state, "device moved");
                Ok(())
            }
            Err(TransportError::Disconnected) => {
                self.go_offline(shared);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn go_offline(&mut self, shared: &Shared) {
        if self.transport.take().is_some() {
            warn!(id = shared.desc.id, "motion device unavailable, continuing in emulation");
            shared.emulated.store(true, Ordering::Release);
            shared.record(Error::DeviceUnavailable);
        }
    }
}

struct Cadence {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Cadence {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

struct Shared {
    format: Format,
    samples_per_tick: usize,
    desc: DeviceDesc,
    budget: Duration,
    link: Arc<Link>,
    filters: FilterGraph,
    master: Buffer,
    mixer: Mutex<Mixer>,
    device: Mutex<Device>,
    skipped: AtomicU64,
    master_volume: AtomicU8,
    master_filter: Mutex<Option<FilterId>>,
    emulated: AtomicBool,
    last_error: Mutex<Option<Error>>,
    cadence: Mutex<Option<Cadence>>,
}

impl Shared {
    /// Remember `err` for [`Context::last_error`] without blocking the mixer.
    fn record(&self, err: Error) {
        if let Some(mut slot) = self.last_error.try_lock_for(self.budget) {
            *slot = Some(err);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if self.device.get_mut().state == DeviceState::Streaming {
            release(self.desc.id);
        }
    }
}

fn claim(id: u8) -> Result<()> {
    let mut claimed = CLAIMED.lock();
    if claimed.contains(&id) {
        return Err(Error::state(format!("device {id} is already started by another context")));
    }
    claimed.push(id);
    Ok(())
}

fn release(id: u8) {
    CLAIMED.lock().retain(|&c| c != id);
}

/// Configuration for a [`Context`].
pub struct ContextBuilder {
    format: Format,
    samples_per_tick: usize,
    desc: DeviceDesc,
    transport: Option<Box<dyn Transport>>,
    event_capacity: usize,
    command_capacity: usize,
    lock_budget: Duration,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            format: Format::default(),
            samples_per_tick: SAMPLES_DEFAULT,
            desc: DeviceDesc::default(),
            transport: None,
            event_capacity: EVENT_CAPACITY_DEFAULT,
            command_capacity: COMMAND_CAPACITY_DEFAULT,
            lock_budget: LOCK_BUDGET_DEFAULT,
        }
    }

    /// Master format: what the device receives.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_samples_per_tick(mut self, samples: usize) -> Self {
        self.samples_per_tick = samples;
        self
    }

    pub fn with_device_id(mut self, id: u8) -> Self {
        self.desc.id = id;
        self
    }

    pub fn with_description(mut self, desc: DeviceDesc) -> Self {
        self.desc = desc;
        self
    }

    /// Deliver ticks through `transport`. Without one the context runs in emulation.
    pub fn with_transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    /// Longest the mixer waits on any lock shared with application threads.
    pub fn with_lock_budget(mut self, budget: Duration) -> Self {
        self.lock_budget = budget;
        self
    }

    pub fn build(self) -> Result<Context> {
        if self.samples_per_tick == 0 {
            return Err(Error::validation("a tick must cover at least one frame"));
        }
        if self.desc.id == 0 {
            return Err(Error::validation("device ids start at 1"));
        }
        if self.event_capacity == 0 || self.command_capacity == 0 {
            return Err(Error::validation("event and command queues need room"));
        }

        let (producer, consumer) = RingBuffer::new(self.command_capacity);
        let (events, dispatcher) = event::channel(self.event_capacity);
        let master = Buffer::new(self.format, self.samples_per_tick, 1)?;

        let mut transport = self.transport;
        if self.desc.options.contains(DeviceOptions::EMULATION) {
            transport = None;
        }
        let emulated = transport.is_none();
        info!(
            id = self.desc.id,
            name = %self.desc.name,
            format = ?self.format,
            samples_per_tick = self.samples_per_tick,
            emulated,
            "context created"
        );

        Ok(Context {
            shared: Arc::new(Shared {
                format: self.format,
                samples_per_tick: self.samples_per_tick,
                desc: self.desc,
                budget: self.lock_budget,
                link: Arc::new(Link {
                    commands: Mutex::new(producer),
                    dispatcher: Arc::new(dispatcher),
                    sources: Mutex::new(Vec::new()),
                    admission: RwLock::new(()),
                }),
                filters: FilterGraph::new(),
                master,
                mixer: Mutex::new(Mixer {
                    commands: consumer,
                    events,
                    playlist: Vec::new(),
                    inputs: Vec::new(),
                    master_volume: VOLUME_MAX,
                    master_chain: None,
                    mix: Block::with_capacity(self.format.channels(), self.samples_per_tick),
                    out: Vec::with_capacity(self.samples_per_tick * self.format.block_align()),
                    ticks: 0,
                }),
                device: Mutex::new(Device {
                    transport,
                    state: DeviceState::Settled,
                }),
                skipped: AtomicU64::new(0),
                master_volume: AtomicU8::new(VOLUME_MAX),
                master_filter: Mutex::new(None),
                emulated: AtomicBool::new(emulated),
                last_error: Mutex::new(None),
                cadence: Mutex::new(None),
            }),
        })
    }
}

/// Handle to a device session. Clones refer to the same context.
#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.shared.desc.id)
            .field("format", &self.shared.format)
            .field("emulated", &self.is_emulated())
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// An emulated context with default settings.
    pub fn new() -> Result<Self> {
        ContextBuilder::new().build()
    }

    pub fn format(&self) -> Format {
        self.shared.format
    }

    pub fn samples_per_tick(&self) -> usize {
        self.shared.samples_per_tick
    }

    pub fn description(&self) -> &DeviceDesc {
        &self.shared.desc
    }

    /// Time covered by one tick.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(self.shared.samples_per_tick as f64 / self.shared.format.sample_rate() as f64)
    }

    /// Context-wide filter graph.
    pub fn filters(&self) -> &FilterGraph {
        &self.shared.filters
    }

    /// The frames produced by the most recent tick, in the master format.
    pub fn master_buffer(&self) -> &Buffer {
        &self.shared.master
    }

    pub fn is_emulated(&self) -> bool {
        self.shared.emulated.load(Ordering::Acquire)
    }

    /// Most recent transport failure, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.shared.last_error.lock().clone()
    }

    pub fn device_state(&self) -> DeviceState {
        self.shared.device.lock().state
    }

    /// Ticks that were mixed but not delivered because the device was busy
    /// with a start, stop or diagnostics call.
    pub fn skipped_ticks(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.link.dispatcher
    }

    /// Deliver pending events on this thread.
    pub fn dispatch(&self) -> usize {
        self.shared.link.dispatcher.dispatch()
    }

    /// Deliver events on a background thread every `period`.
    pub fn spawn_dispatcher(&self, period: Duration) -> DispatchThread {
        DispatchThread::spawn(self.shared.link.dispatcher.clone(), period)
    }

    pub fn create_source(&self) -> Source {
        let source = Source::new(&self.shared.link);
        let mut sources = self.shared.link.sources.lock();
        sources.retain(|s| s.strong_count() > 0);
        sources.push(source.downgrade());
        debug!(id = ?source.id(), "source created");
        source
    }

    /// Wrap `buffer` as a live input. The buffer stays bound until the input is dropped.
    pub fn create_input(&self, buffer: &Buffer) -> Result<Input> {
        Input::new(&self.shared.link, buffer)
    }

    pub fn start_input(&self, input: &Input) -> Result<()> {
        if !Arc::ptr_eq(&input.link()?, &self.shared.link) {
            return Err(Error::state("input belongs to another context"));
        }
        if input.set_running(true) {
            return Err(Error::state(format!("{:?} is already started", input.id())));
        }
        self.shared
            .link
            .send(Command::AttachInput(input.clone()))
            .inspect_err(|_| {
                input.set_running(false);
            })
    }

    pub fn stop_input(&self, input: &Input) -> Result<()> {
        if !input.set_running(false) {
            return Err(Error::state(format!("{:?} is not started", input.id())));
        }
        self.shared.link.send(Command::DetachInput(input.id()))
    }

    /// Linear master gain in percent, `0..=100`.
    pub fn set_master_volume(&self, volume: u8) -> Result<()> {
        if volume > VOLUME_MAX {
            return Err(Error::validation(format!("volume {volume} above {VOLUME_MAX}")));
        }
        self.shared.link.send(Command::MasterVolume(volume))?;
        self.shared.master_volume.store(volume, Ordering::Release);
        Ok(())
    }

    pub fn master_volume(&self) -> u8 {
        self.shared.master_volume.load(Ordering::Acquire)
    }

    /// Run the mix through node `id` of [`filters`](Self::filters), or bypass with `None`.
    pub fn set_master_filter(&self, id: Option<FilterId>) -> Result<()> {
        let format = self.shared.format;
        let chain = id
            .map(|id| self.shared.filters.compile(id, &format, Some(&format)))
            .transpose()?;
        self.shared.link.send(Command::MasterFilter(chain))?;
        *self.shared.master_filter.lock() = id;
        Ok(())
    }

    pub fn master_filter(&self) -> Option<FilterId> {
        *self.shared.master_filter.lock()
    }

    fn sources(&self) -> Vec<Source> {
        let mut sources = self.shared.link.sources.lock();
        sources.retain(|s| s.strong_count() > 0);
        sources
            .iter()
            .filter_map(Weak::upgrade)
            .map(Source::from_shared)
            .collect()
    }

    /// Sources of this context currently in the Playing state.
    pub fn playing_source_count(&self) -> usize {
        self.sources()
            .iter()
            .filter(|s| s.state() == SourceState::Playing)
            .count()
    }

    pub fn stop_all_sources(&self) -> Result<()> {
        for source in self.sources() {
            source.stop(crate::source::Flush::Force)?;
        }
        Ok(())
    }

    /// Bring the device up and begin streaming.
    pub fn start(&self, moves: DeviceMove) -> Result<()> {
        let shared = &*self.shared;
        let mut device = shared.device.lock();
        if device.state == DeviceState::Streaming {
            return Err(Error::state("device is already streaming"));
        }
        claim(shared.desc.id)?;

        let opened = device.transport.as_mut().map(|t| t.open(&shared.desc));
        let moved = match opened {
            Some(Err(TransportError::Disconnected)) => {
                device.go_offline(shared);
                Ok(())
            }
            Some(Err(err)) => Err(Error::from(err)),
            _ => Ok(()),
        }
        .and_then(|()| {
            if moves.contains(DeviceMove::SETTLE) {
                device.drive(DeviceState::Settled, shared)?;
            }
            if moves.contains(DeviceMove::NEUTRAL) {
                device.drive(DeviceState::Neutral, shared)?;
            }
            device.drive(DeviceState::Streaming, shared)
        });
        if let Err(err) = moved {
            release(shared.desc.id);
            return Err(err);
        }
        device.state = DeviceState::Streaming;
        info!(id = shared.desc.id, ?moves, emulated = self.is_emulated(), "device started");
        Ok(())
    }

    /// Stop streaming and park the device per `moves`.
    pub fn stop(&self, moves: DeviceMove) -> Result<()> {
        let shared = &*self.shared;
        let mut device = shared.device.lock();
        if device.state != DeviceState::Streaming {
            return Err(Error::state("device is not streaming"));
        }
        let mut parked = DeviceState::Settled;
        if moves.contains(DeviceMove::NEUTRAL) {
            device.drive(DeviceState::Neutral, shared)?;
            parked = DeviceState::Neutral;
        }
        if moves.contains(DeviceMove::SETTLE) {
            device.drive(DeviceState::Settled, shared)?;
            parked = DeviceState::Settled;
        }
        device.state = parked;
        release(shared.desc.id);
        info!(id = shared.desc.id, ?moves, "device stopped");
        Ok(())
    }

    pub fn diagnostics(&self) -> Result<Vec<AxisStatus>> {
        let shared = &*self.shared;
        let mut device = shared.device.lock();
        let Some(transport) = device.transport.as_mut() else {
            return Err(Error::DeviceUnavailable);
        };
        match transport.diagnostics() {
            Ok(axes) => Ok(axes),
            Err(TransportError::Disconnected) => {
                device.go_offline(shared);
                Err(Error::DeviceUnavailable)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Produce one tick of output.
    pub fn tick(&self) -> ProcessStats {
        let start = Instant::now();
        let shared = &*self.shared;
        let format = shared.format;
        let frames = shared.samples_per_tick;
        let budget = shared.budget;

        let mut guard = shared.mixer.lock();
        let mixer = &mut *guard;
        mixer.drain_commands();

        mixer.mix.reset(format.channels());
        mixer.mix.push_silence(frames);
        {
            let Mixer {
                playlist,
                inputs,
                events,
                mix,
                ..
            } = &mut *mixer;
            playlist.retain(|source| source.render(&format, frames, budget, mix, events) != Rendered::Finished);
            for input in inputs.iter() {
                input.render(&format, frames, budget, mix);
            }
        }

        if mixer.master_volume < VOLUME_MAX {
            mixer.mix.scale(mixer.master_volume as f64 / VOLUME_MAX as f64);
        }
        self.run_master_filter(mixer);
        let encoding = format.encoding();
        mixer.mix.as_mut_slice().iter_mut().for_each(|s| *s = saturate(*s, encoding));
        mixer.out.clear();
        mixer.mix.encode_into(&format, &mut mixer.out);

        match shared.device.try_lock_for(budget) {
            Some(mut device) if device.state == DeviceState::Streaming => {
                if let Some(transport) = device.transport.as_mut() {
                    match transport.deliver(&format, &mixer.out) {
                        Ok(()) => {}
                        Err(TransportError::Disconnected) => device.go_offline(shared),
                        Err(TransportError::Driver(code)) => {
                            warn!(code, "device driver error");
                            shared.record(Error::Driver(code));
                        }
                    }
                }
            }
            Some(_) => {}
            None => {
                let skipped = shared.skipped.fetch_add(1, Ordering::Relaxed) + 1;
                if skipped.is_power_of_two() {
                    warn!(skipped, "device busy, tick not delivered");
                }
            }
        }
        shared.master.replace_within(&mixer.out, budget);
        mixer.ticks += 1;

        let stats = ProcessStats {
            frames,
            elapsed: start.elapsed(),
        };
        trace!(tick = mixer.ticks, voices = mixer.playlist.len(), elapsed = ?stats.elapsed, "tick");
        stats
    }

    fn run_master_filter(&self, mixer: &mut Mixer) {
        let shared = &*self.shared;
        let Some(chain) = mixer.master_chain.as_mut() else {
            return;
        };
        if shared.filters.refresh(chain, shared.budget) == Some(false) {
            if let Some(root) = chain.root() {
                debug!(filter = ?root, "master filter changed, rebuilding");
                match shared.filters.try_compile(root, &shared.format, &shared.format, shared.budget) {
                    Ok(Some(fresh)) => *chain = fresh,
                    Ok(None) => return,
                    Err(err) => {
                        warn!(filter = ?root, %err, "master filter failed to rebuild, bypassing");
                        mixer.master_chain = None;
                        return;
                    }
                }
            }
        }
        chain.process(&mut mixer.mix);
    }

    /// Start the cadence thread, ticking once per [`tick_period`](Self::tick_period).
    pub fn run(&self) -> Result<()> {
        let mut cadence = self.shared.cadence.lock();
        if cadence.is_some() {
            return Err(Error::state("the mixer is already running"));
        }
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let weak = Arc::downgrade(&self.shared);
        let period = self.tick_period();
        let thread = std::thread::Builder::new()
            .name(format!("bewegt-mixer-{}", self.shared.desc.id))
            .spawn(move || {
                let mut next = Instant::now();
                while !flag.load(Ordering::Acquire) {
                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    Context { shared }.tick();
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|err| Error::state(format!("failed to spawn the mixer thread: {err}")))?;
        *cadence = Some(Cadence {
            stop,
            thread: Some(thread),
        });
        debug!(?period, "mixer running");
        Ok(())
    }

    /// Stop the cadence thread and wait for its last tick.
    pub fn halt(&self) {
        let cadence = self.shared.cadence.lock().take();
        if let Some(mut cadence) = cadence {
            cadence.stop.store(true, Ordering::Release);
            if let Some(thread) = cadence.thread.take() {
                let _ = thread.join();
            }
            debug!("mixer halted");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.cadence.lock().is_some()
    }

    /// Wait for any in-flight tick to finish.
    /// Refuse new `play` calls on this context until the guard drops.
    pub(crate) fn hold_admission(&self) -> RwLockWriteGuard<'_, ()> {
        self.shared.link.admission.write()
    }

    pub(crate) fn quiesce(&self) {
        drop(self.shared.mixer.lock());
    }

    /// Stop everything and release the device. Clears the current context if this is it.
    pub fn destroy(self) -> Result<()> {
        self.halt();
        self.stop_all_sources()?;
        if self.device_state() == DeviceState::Streaming {
            self.stop(DeviceMove::DEFAULT)?;
        }
        crate::current::forget(&self);
        info!(id = self.shared.desc.id, "context destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::Encoding;

    fn context(id: u8) -> Context {
        Context::builder()
            .with_device_id(id)
            .with_format(Format::new(50, 1, Encoding::I16).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn builder_rejects_bad_geometry() {
        assert!(Context::builder().with_samples_per_tick(0).build().is_err());
        assert!(Context::builder().with_device_id(0).build().is_err());
    }

    #[test]
    fn idle_tick_renders_silence() {
        let ctx = context(201);
        let stats = ctx.tick();
        assert_eq!(stats.frames, 2);
        assert_eq!(ctx.master_buffer().snapshot(), vec![0; 4]);
    }

    #[test]
    fn device_ids_are_exclusive_while_streaming() {
        let a = context(202);
        let b = context(202);
        a.start(DeviceMove::DEFAULT).unwrap();
        assert_eq!(b.start(DeviceMove::DEFAULT).unwrap_err().kind(), ErrorKind::State);
        a.stop(DeviceMove::DEFAULT).unwrap();
        b.start(DeviceMove::empty()).unwrap();
        assert_eq!(b.device_state(), DeviceState::Streaming);
        b.stop(DeviceMove::NEUTRAL).unwrap();
        assert_eq!(b.device_state(), DeviceState::Neutral);
    }

    #[test]
    fn emulated_context_has_no_diagnostics() {
        let ctx = context(203);
        assert!(ctx.is_emulated());
        assert_eq!(ctx.diagnostics().unwrap_err(), Error::DeviceUnavailable);
    }

    #[test]
    fn master_volume_is_validated() {
        let ctx = context(204);
        assert!(ctx.set_master_volume(101).is_err());
        ctx.set_master_volume(40).unwrap();
        assert_eq!(ctx.master_volume(), 40);
    }

    #[test]
    fn run_and_halt() {
        let ctx = context(205);
        ctx.run().unwrap();
        assert!(ctx.run().is_err());
        std::thread::sleep(Duration::from_millis(60));
        ctx.halt();
        assert!(!ctx.is_running());
    }

    #[test]
    fn play_waits_while_admission_is_held() {
        let ctx = context(206);
        let buffer = Buffer::from_bytes(ctx.format(), &[1, 0, 2, 0]).unwrap();
        let source = ctx.create_source();
        source.set_buffer(Some(&buffer)).unwrap();

        let held = ctx.hold_admission();
        let player = {
            let source = source.clone();
            std::thread::spawn(move || source.play(0))
        };
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(source.state(), SourceState::Stopped);
        assert_eq!(ctx.playing_source_count(), 0);

        drop(held);
        player.join().unwrap().unwrap();
        assert_eq!(source.state(), SourceState::Playing);
    }
}
