//! Process-wide "current" context.
//!
//! Everything in the crate takes an explicit [`Context`]. This module keeps a
//! single current context for callers that would rather not thread one
//! through, and forwards the common context operations to it.
//!
//! Switching is refused while a *different* current context still has
//! playing sources; stop them (or destroy that context) first.

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::Buffer;
use crate::device::DeviceMove;
use crate::error::{Error, Result};
use crate::filter::ProcessStats;
use crate::input::Input;
use crate::source::Source;
use crate::Context;

static CURRENT: Mutex<Option<Context>> = parking_lot::const_mutex(None);

/// Make `ctx` current.
///
/// The playing check and the swap happen with `play` on the old context
/// held off, so no source can start there in between.
pub fn set_current(ctx: &Context) -> Result<()> {
    let mut current = CURRENT.lock();
    let old = match current.as_ref() {
        Some(old) if old == ctx => return Ok(()),
        other => other.cloned(),
    };
    let _admission = old.as_ref().map(Context::hold_admission);
    if let Some(old) = &old {
        let playing = old.playing_source_count();
        if playing > 0 {
            return Err(Error::state(format!(
                "the current context still has {playing} playing source(s)"
            )));
        }
        old.quiesce();
    }
    *current = Some(ctx.clone());
    debug!(?ctx, "current context set");
    Ok(())
}

pub fn current() -> Option<Context> {
    CURRENT.lock().clone()
}

/// Forget the current context without touching it.
pub fn clear() {
    CURRENT.lock().take();
}

pub(crate) fn forget(ctx: &Context) {
    let mut current = CURRENT.lock();
    if current.as_ref() == Some(ctx) {
        *current = None;
    }
}

fn with<T>(f: impl FnOnce(&Context) -> Result<T>) -> Result<T> {
    let ctx = current().ok_or_else(|| Error::state("no current context"))?;
    f(&ctx)
}

pub fn create_source() -> Result<Source> {
    with(|ctx| Ok(ctx.create_source()))
}

pub fn create_input(buffer: &Buffer) -> Result<Input> {
    with(|ctx| ctx.create_input(buffer))
}

pub fn start(moves: DeviceMove) -> Result<()> {
    with(|ctx| ctx.start(moves))
}

pub fn stop(moves: DeviceMove) -> Result<()> {
    with(|ctx| ctx.stop(moves))
}

pub fn tick() -> Result<ProcessStats> {
    with(|ctx| Ok(ctx.tick()))
}

pub fn set_master_volume(volume: u8) -> Result<()> {
    with(|ctx| ctx.set_master_volume(volume))
}

pub fn stop_all_sources() -> Result<()> {
    with(|ctx| ctx.stop_all_sources())
}

pub fn playing_source_count() -> Result<usize> {
    with(|ctx| Ok(ctx.playing_source_count()))
}

/// Destroy the current context and clear it.
pub fn destroy() -> Result<()> {
    let ctx = CURRENT
        .lock()
        .take()
        .ok_or_else(|| Error::state("no current context"))?;
    ctx.destroy()
}
