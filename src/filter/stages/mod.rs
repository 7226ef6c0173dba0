//! Signal-processing building blocks for compiled filter chains.

pub(crate) mod iir;
pub(crate) mod motion;
pub(crate) mod routing;
pub(crate) mod shaping;
pub(crate) mod smoothing;

pub use motion::Geometry;
