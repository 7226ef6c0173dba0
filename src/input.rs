//! Live motion streams pushed by the application.
//!
//! An [`Input`] wraps a queue buffer the application feeds with
//! [`send_stream`](Input::send_stream). While started, the mixer pulls one
//! frame per output frame (resampled by sample-and-hold) and sums it into the
//! mix. A starved input contributes silence and counts an under-run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::{Buffer, EnqueuePolicy};
use crate::context::Link;
use crate::error::{Error, Result};
use crate::filter::{FilterChain, FilterGraph, FilterId};
use crate::format::{Format, CHANNELS_MAX};
use crate::sample::Block;

static NEXT_INPUT: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputId(u64);

impl InputId {
    pub fn get(self) -> u64 {
        self.0
    }
}

struct Feed {
    filter: Option<(FilterGraph, FilterId)>,
    chain: Option<FilterChain>,
    hold: [f64; CHANNELS_MAX],
    phase: f64,
    primed: bool,
    raw: Block,
}

pub(crate) struct InputShared {
    id: InputId,
    buffer: Buffer,
    feed: Mutex<Feed>,
    running: AtomicBool,
    underruns: AtomicU64,
    link: Weak<Link>,
}

impl Drop for InputShared {
    fn drop(&mut self) {
        self.buffer.detach();
    }
}

/// Handle to a live input stream. Clones refer to the same input.
#[derive(Clone)]
pub struct Input {
    shared: Arc<InputShared>,
}

impl PartialEq for Input {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl core::fmt::Debug for Input {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Input")
            .field("id", &self.shared.id)
            .field("buffer", &self.shared.buffer.id())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Input {
    pub(crate) fn new(link: &Arc<Link>, buffer: &Buffer) -> Result<Self> {
        buffer.attach()?;
        let id = InputId(NEXT_INPUT.fetch_add(1, Ordering::Relaxed));
        debug!(?id, buffer = ?buffer.id(), "input created");
        Ok(Self {
            shared: Arc::new(InputShared {
                id,
                buffer: buffer.clone(),
                feed: Mutex::new(Feed {
                    filter: None,
                    chain: None,
                    hold: [0.0; CHANNELS_MAX],
                    phase: 0.0,
                    primed: false,
                    raw: Block::new(buffer.format().channels()),
                }),
                running: AtomicBool::new(false),
                underruns: AtomicU64::new(0),
                link: Arc::downgrade(link),
            }),
        })
    }

    pub(crate) fn link(&self) -> Result<Arc<Link>> {
        self.shared
            .link
            .upgrade()
            .ok_or_else(|| Error::state("the input's context was destroyed"))
    }

    pub fn id(&self) -> InputId {
        self.shared.id
    }

    pub fn buffer(&self) -> &Buffer {
        &self.shared.buffer
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) -> bool {
        self.shared.running.swap(running, Ordering::AcqRel)
    }

    /// Output frames rendered as silence because nothing was queued.
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    /// Queue encoded frames for playback, rejecting when full.
    pub fn send_stream(&self, data: &[u8]) -> Result<()> {
        self.shared.buffer.enqueue(data)
    }

    pub fn send_stream_with(&self, data: &[u8], policy: EnqueuePolicy) -> Result<()> {
        self.shared.buffer.enqueue_with(data, policy)
    }

    pub fn set_filter(&self, filter: Option<(&FilterGraph, FilterId)>) -> Result<()> {
        if let Some((graph, id)) = filter {
            graph.kind(id)?;
        }
        let mut feed = self.shared.feed.lock();
        feed.filter = filter.map(|(graph, id)| (graph.clone(), id));
        feed.chain = None;
        Ok(())
    }

    /// Render one tick into `mix`. Called by the mixer only.
    pub(crate) fn render(&self, master: &Format, frames: usize, budget: Duration, mix: &mut Block) {
        let shared = &*self.shared;
        let Some(mut feed) = shared.feed.try_lock_for(budget) else {
            return;
        };
        let feed = &mut *feed;
        let format = shared.buffer.format();
        let src = format.with_sample_rate(master.sample_rate());

        let fresh = match (&mut feed.chain, &feed.filter) {
            (Some(chain), None) => chain.src_format() == src,
            (Some(chain), Some((graph, _))) => {
                chain.src_format() == src && graph.refresh(chain, budget) != Some(false)
            }
            (None, _) => false,
        };
        if !fresh {
            feed.chain = match &feed.filter {
                None => Some(FilterChain::passthrough(&src, master)),
                Some((graph, id)) => match graph.try_compile(*id, &src, master, budget) {
                    Ok(chain) => chain,
                    Err(err) => {
                        warn!(id = ?shared.id, %err, "input filter failed to build");
                        None
                    }
                },
            };
        }
        let Some(chain) = feed.chain.as_mut() else {
            return;
        };

        let step = format.sample_rate() as f64 / master.sample_rate() as f64;
        if !feed.primed {
            feed.primed = true;
            feed.phase = 1.0 - step;
        }
        let channels = format.channels();
        let mut starved = 0;
        feed.raw.reset(channels);
        match shared.buffer.lock_for(budget) {
            Some(mut store) => {
                for _ in 0..frames {
                    feed.phase += step;
                    let mut empty = false;
                    while feed.phase >= 1.0 {
                        if store.pop_frame(&format, &mut feed.hold[..channels]) {
                            feed.phase -= 1.0;
                        } else {
                            feed.phase = 0.0;
                            feed.hold[..channels].fill(0.0);
                            empty = true;
                            break;
                        }
                    }
                    if empty {
                        starved += 1;
                        feed.raw.push_silence(1);
                    } else {
                        feed.raw.push_frame(&feed.hold[..channels]);
                    }
                }
            }
            None => {
                starved = frames;
                feed.raw.push_silence(frames);
            }
        }
        shared.buffer.notify_space();

        if starved > 0 {
            let starved = starved as u64;
            let total = shared.underruns.fetch_add(starved, Ordering::Relaxed) + starved;
            if cfg!(feature = "warn_on_underrun") || total == starved {
                warn!(id = ?shared.id, total, "input starved, rendering silence");
            }
        }

        chain.process(&mut feed.raw);
        for (m, s) in mix.as_mut_slice().iter_mut().zip(feed.raw.as_slice()) {
            *m += s;
        }
    }
}
