//! Real-time motion-cueing playback for motion platforms.
//!
//! Motion data lives in [`Buffer`]s, plays through [`Source`]s (or is pushed
//! live through an [`Input`]), is shaped by a [`filter::FilterGraph`], and is
//! mixed once per tick by a [`Context`] into frames for the device
//! [`Transport`].
//!
//! ```
//! use bewegt::{Buffer, Context, Format};
//!
//! let ctx = Context::new().unwrap();
//! let frames: Vec<u8> = [1000i16, 0, 0, 2000, 0, 0]
//!     .iter()
//!     .flat_map(|v| v.to_le_bytes())
//!     .collect();
//! let buffer = Buffer::from_bytes(Format::default(), &frames).unwrap();
//!
//! let source = ctx.create_source();
//! source.set_buffer(Some(&buffer)).unwrap();
//! source.play(0).unwrap();
//! ctx.tick();
//! assert_eq!(&ctx.master_buffer().snapshot()[..2], &1000i16.to_le_bytes());
//! ```

pub mod buffer;
mod context;
pub mod current;
pub mod device;
mod error;
pub mod event;
pub mod filter;
pub mod format;
mod input;
pub mod log;
pub mod sample;
mod source;
pub mod transport;

pub use buffer::{Buffer, BufferId, DequeuePolicy, EnqueuePolicy, Region, SamplesMut};
pub use context::{Context, ContextBuilder, COMMAND_CAPACITY_DEFAULT, LOCK_BUDGET_DEFAULT};
pub use device::{AxisStatus, DeviceDesc, DeviceMove, DeviceOptions, DeviceState, DofMask};
pub use error::{Error, ErrorKind, Result};
pub use event::{Event, EventFlags, EventKind};
pub use format::{Encoding, Format, FormatKind, LOOP_INFINITE, LOOP_MAX};
pub use input::{Input, InputId};
pub use log::{set_log_function, LogLayer, LogRecord};
pub use sample::Block;
pub use source::{Flush, Source, SourceId, SourceState, SPEEDS, VOLUME_MAX};
pub use transport::{RtrbTransport, Transport, TransportError};
