//! Source events and their delivery.
//!
//! The mixer never calls user code. It pushes [`Event`]s into a lock-free
//! ring, and a [`Dispatcher`] drains that ring on another thread and invokes
//! the registered listeners. If the ring is full the event is dropped and
//! counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bitflags::bitflags;
use hashbrown::HashMap;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{trace, warn};

use crate::source::SourceId;

/// Default capacity of the event ring.
pub const EVENT_CAPACITY_DEFAULT: usize = 256;

bitflags! {
    /// Event bits as reported on the wire.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EventFlags: u32 {
        const ERROR_STATE = 0x1;
        const START_OF_BUFFER = 0x2;
        const END_OF_LOOP = 0x4;
        const END_OF_BUFFER = 0x8;
        const END_OF_STREAM = 0x10;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Playback began from the start of the play region.
    StartOfBuffer,
    /// A loop pass completed and playback wrapped to the loop start.
    EndOfLoop,
    /// The play region, or one sub-buffer of a queue, was consumed.
    EndOfBuffer,
    /// A queue-backed source ran out of queued samples and stopped.
    EndOfStream,
    /// The source hit an error and was stopped.
    Error,
}

impl EventKind {
    pub fn flags(self) -> EventFlags {
        match self {
            EventKind::StartOfBuffer => EventFlags::START_OF_BUFFER,
            EventKind::EndOfLoop => EventFlags::END_OF_LOOP,
            EventKind::EndOfBuffer => EventFlags::END_OF_BUFFER,
            EventKind::EndOfStream => EventFlags::END_OF_STREAM,
            EventKind::Error => EventFlags::ERROR_STATE,
        }
    }
}

/// Something that happened to a source during a mixer tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub source: SourceId,
    pub kind: EventKind,
    /// Token of the region that was playing.
    pub token: u64,
}

/// Callback invoked on the dispatcher thread.
pub type Listener = Box<dyn FnMut(&Event) + Send>;

/// Mixer-side end of the event ring.
pub(crate) struct EventSink {
    producer: Producer<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    pub(crate) fn push(&mut self, event: Event) {
        if let Err(rtrb::PushError::Full(event)) = self.producer.push(event) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                warn!(?event, dropped, "event ring full, dropping events");
            }
        }
    }
}

/// Create a connected sink and dispatcher.
pub(crate) fn channel(capacity: usize) -> (EventSink, Dispatcher) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventSink {
            producer,
            dropped: dropped.clone(),
        },
        Dispatcher {
            consumer: Mutex::new(consumer),
            listeners: Mutex::new(HashMap::new()),
            catch_all: Mutex::new(None),
            dropped,
        },
    )
}

/// Application-side end of the event ring.
pub struct Dispatcher {
    consumer: Mutex<Consumer<Event>>,
    listeners: Mutex<HashMap<SourceId, Listener>>,
    catch_all: Mutex<Option<Listener>>,
    dropped: Arc<AtomicU64>,
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listeners.lock().len())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Register `listener` for events of `source`, replacing any previous one.
    pub fn listen(&self, source: SourceId, listener: Listener) {
        self.listeners.lock().insert(source, listener);
    }

    pub fn unlisten(&self, source: SourceId) {
        self.listeners.lock().remove(&source);
    }

    /// Register a listener that sees every event after the per-source one.
    pub fn listen_all(&self, listener: Listener) {
        *self.catch_all.lock() = Some(listener);
    }

    /// Events lost because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain the ring and invoke listeners. Returns the number of events.
    ///
    /// Listeners run without any engine lock held, so they may call back
    /// into sources and buffers.
    pub fn dispatch(&self) -> usize {
        let mut delivered = 0;
        loop {
            let Ok(event) = self.consumer.lock().pop() else {
                break;
            };
            delivered += 1;
            trace!(?event, "dispatching event");

            let taken = self.listeners.lock().remove(&event.source);
            if let Some(mut listener) = taken {
                listener(&event);
                // a listener registered while this one ran wins
                self.listeners.lock().entry(event.source).or_insert(listener);
            }

            let taken = self.catch_all.lock().take();
            if let Some(mut listener) = taken {
                listener(&event);
                self.catch_all.lock().get_or_insert(listener);
            }
        }
        delivered
    }
}

/// Background thread that calls [`Dispatcher::dispatch`] periodically.
///
/// The thread stops when the handle is dropped.
pub struct DispatchThread {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DispatchThread {
    pub fn spawn(dispatcher: Arc<Dispatcher>, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let thread = std::thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                dispatcher.dispatch();
                std::thread::sleep(period);
            }
            dispatcher.dispatch();
        });
        Self {
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
