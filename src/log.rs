//! Forwarding engine log events to an application callback.
//!
//! The engine logs through `tracing`. Applications that want the messages
//! without running their own subscriber can hand a closure to
//! [`set_log_function`], or stack a [`LogLayer`] onto a subscriber they
//! already build.

use core::fmt::{self, Write};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

use crate::error::{Error, Result};

/// One engine log event, as handed to the callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord<'a> {
    pub level: Level,
    /// Module that logged, e.g. `bewegt::context`.
    pub target: &'a str,
    pub message: String,
    /// Remaining structured fields as `key=value` pairs separated by spaces.
    pub fields: String,
}

type Callback = Box<dyn Fn(&LogRecord<'_>) + Send + Sync>;

/// A `tracing-subscriber` layer passing this crate's events to a callback.
pub struct LogLayer {
    callback: Callback,
    max_level: Level,
}

impl LogLayer {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&LogRecord<'_>) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
            max_level: Level::DEBUG,
        }
    }

    /// Drop events more verbose than `level`.
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }
}

impl fmt::Debug for LogLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogLayer")
            .field("max_level", &self.max_level)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Collect {
    message: String,
    fields: String,
}

impl Visit for Collect {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push(field, format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push(field, format_args!("{value:?}"));
        }
    }
}

impl Collect {
    fn push(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={value}", field.name());
    }
}

impl<S: Subscriber> Layer<S> for LogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > self.max_level || !meta.target().starts_with(env!("CARGO_CRATE_NAME")) {
            return;
        }
        let mut collect = Collect::default();
        event.record(&mut collect);
        (self.callback)(&LogRecord {
            level: *meta.level(),
            target: meta.target(),
            message: collect.message,
            fields: collect.fields,
        });
    }
}

/// Install `callback` as the process-wide receiver of engine log events.
///
/// Fails when a global subscriber is already set; use [`LogLayer`] directly
/// to combine it with an existing one.
pub fn set_log_function<F>(callback: F) -> Result<()>
where
    F: Fn(&LogRecord<'_>) + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(LogLayer::new(callback))
        .try_init()
        .map_err(|err| Error::state(format!("log function not installed: {err}")))
}
