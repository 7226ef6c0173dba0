//! Motion device description and status.
//!
//! A [`DeviceDesc`] is opaque configuration handed to the transport. The
//! engine itself only reads the id, the rate limit and the options.

use bitflags::bitflags;

/// Device id used when none is configured.
pub const DEVICE_ID_DEFAULT: u8 = 11;

bitflags! {
    /// Degrees of freedom a device supports.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DofMask: u32 {
        const SURGE = 1 << 0;
        const SWAY = 1 << 1;
        const HEAVE = 1 << 2;
        const ROLL = 1 << 3;
        const PITCH = 1 << 4;
        const YAW = 1 << 5;
    }
}

impl Default for DofMask {
    fn default() -> Self {
        DofMask::HEAVE | DofMask::ROLL | DofMask::PITCH
    }
}

bitflags! {
    /// Device operation options.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DeviceOptions: u32 {
        const DEBUG = 0x1;
        const FILE_LOG = 0x2;
        /// Run without hardware even when a transport is configured.
        const EMULATION = 0x4;
        const ASYNC = 0x8;
        const FORCE_PROFILE = 0x10;
    }
}

bitflags! {
    /// Moves performed while starting or stopping a device.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DeviceMove: u32 {
        /// Rest on the mechanical stops.
        const SETTLE = 0x1;
        /// Travel to the neutral (mid-stroke) pose.
        const NEUTRAL = 0x2;
        const DEFAULT = Self::SETTLE.bits() | Self::NEUTRAL.bits();
    }
}

impl Default for DeviceMove {
    fn default() -> Self {
        DeviceMove::DEFAULT
    }
}

/// Where the device is in its start/stop sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    #[default]
    Settled,
    Neutral,
    Streaming,
}

/// Packed `major*1000 + minor*100 + patch` version number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceVersion(pub u32);

impl DeviceVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self(major * 1000 + minor.min(9) * 100 + patch.min(99))
    }

    pub fn major(self) -> u32 {
        self.0 / 1000
    }

    pub fn minor(self) -> u32 {
        self.0 % 1000 / 100
    }

    pub fn patch(self) -> u32 {
        self.0 % 100
    }
}

impl core::fmt::Display for DeviceVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDesc {
    pub id: u8,
    pub name: String,
    pub detail: String,
    pub address: Option<String>,
    /// Name of a filter profile the transport should apply.
    pub filter: Option<String>,
    /// Largest movement per millisecond; 0 disables the limit.
    pub rate_limit: u16,
    pub mask: DofMask,
    /// One nibble per channel, channel 0 in the lowest nibble.
    pub axis_map: u32,
    pub version: DeviceVersion,
    pub options: DeviceOptions,
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self {
            id: DEVICE_ID_DEFAULT,
            name: String::from("emulated motion device"),
            detail: String::new(),
            address: None,
            filter: None,
            rate_limit: 0,
            mask: DofMask::default(),
            axis_map: 0x7654_3210,
            version: DeviceVersion::default(),
            options: DeviceOptions::empty(),
        }
    }
}

impl DeviceDesc {
    /// Device axis driven by output channel `channel`.
    pub fn axis_for(&self, channel: usize) -> Option<u8> {
        if channel >= 8 {
            return None;
        }
        Some(((self.axis_map >> (channel * 4)) & 0xF) as u8)
    }
}

/// Per-axis diagnostic snapshot reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct AxisStatus {
    pub busy: bool,
    pub home: bool,
    pub alarm: bool,
    pub in_position: bool,
    pub emergency: bool,
    /// Commanded position.
    pub command: i32,
    pub encoder: i32,
    pub current_on: bool,
    pub servo_on: bool,
    pub dcc_on: bool,
    pub alarm_reset_on: bool,
}

impl AxisStatus {
    pub fn is_faulted(&self) -> bool {
        self.alarm || self.emergency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_packs_like_the_wire_value() {
        let v = DeviceVersion::new(2, 4, 1);
        assert_eq!(v.0, 2401);
        assert_eq!((v.major(), v.minor(), v.patch()), (2, 4, 1));
        assert_eq!(v.to_string(), "2.4.1");
    }

    #[test]
    fn default_axis_map_is_identity() {
        let desc = DeviceDesc::default();
        for ch in 0..8 {
            assert_eq!(desc.axis_for(ch), Some(ch as u8));
        }
        assert_eq!(desc.axis_for(8), None);
    }

    #[test]
    fn default_mask_is_heave_roll_pitch() {
        assert_eq!(DofMask::default().bits(), 0b11100);
        assert_eq!(DeviceMove::default().bits(), 0x3);
    }
}
