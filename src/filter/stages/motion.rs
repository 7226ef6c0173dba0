//! Tilt coordination and platform inverse kinematics.
//!
//! DOF channels are ordered surge, sway, heave, roll, pitch, yaw. Values are
//! normalized against the encoding's full scale: translations map to half the
//! actuator stroke, rotations to [`Geometry::max_rotation`] degrees.

use crate::error::{Error, Result};
use crate::filter::params::KinematicsVersion;
use crate::sample::Block;

const SURGE: usize = 0;
const SWAY: usize = 1;
const HEAVE: usize = 2;
const ROLL: usize = 3;
const PITCH: usize = 4;
const YAW: usize = 5;

/// Converts sustained surge/sway specific force into pitch/roll tilt.
///
/// The tilt angle is `asin(a)` for normalized force `a`, expressed in rotation
/// units where full scale equals 90°.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Tilt {
    full_scale: f64,
}

impl Tilt {
    pub fn new(channels: usize, full_scale: f64) -> Result<Self> {
        if channels < 6 {
            return Err(Error::validation(format!(
                "tilt coordination needs 6 DOF channels, got {channels}"
            )));
        }
        Ok(Self { full_scale })
    }

    #[inline]
    fn angle(&self, force: f64) -> f64 {
        let a = (force / self.full_scale).clamp(-1.0, 1.0);
        a.asin().to_degrees() / 90.0 * self.full_scale
    }

    pub fn process(&mut self, block: &mut Block) {
        for frame in block.iter_frames_mut() {
            let pitch = self.angle(frame[SURGE]);
            let roll = self.angle(frame[SWAY]);
            frame[PITCH] += pitch;
            frame[ROLL] -= roll;
        }
    }
}

/// Dimensions of a platform, in millimetres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry {
    pub base_radius: f64,
    pub platform_radius: f64,
    /// Platform height above the base at neutral.
    pub height: f64,
    pub stroke: f64,
    /// Rotation reached at full scale, in degrees.
    pub max_rotation: f64,
}

impl Geometry {
    pub fn of(version: KinematicsVersion) -> Self {
        match version {
            KinematicsVersion::V700 => Geometry {
                base_radius: 350.0,
                platform_radius: 300.0,
                height: 450.0,
                stroke: 150.0,
                max_rotation: 15.0,
            },
            KinematicsVersion::V800 => Geometry {
                base_radius: 400.0,
                platform_radius: 340.0,
                height: 520.0,
                stroke: 200.0,
                max_rotation: 18.0,
            },
            KinematicsVersion::V1000 => Geometry {
                base_radius: 500.0,
                platform_radius: 420.0,
                height: 640.0,
                stroke: 250.0,
                max_rotation: 20.0,
            },
        }
    }
}

type Vec3 = [f64; 3];

#[inline]
fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn norm(a: Vec3) -> f64 {
    (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt()
}

fn polar(radius: f64, degrees: f64) -> Vec3 {
    let (s, c) = degrees.to_radians().sin_cos();
    [radius * c, radius * s, 0.0]
}

/// `Rz(yaw) · Ry(pitch) · Rx(roll) · p`, angles in radians.
fn rotate(p: Vec3, roll: f64, pitch: f64, yaw: f64) -> Vec3 {
    let (sr, cr) = roll.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let (sy, cy) = yaw.sin_cos();
    let x1 = p[0];
    let y1 = cr * p[1] - sr * p[2];
    let z1 = sr * p[1] + cr * p[2];
    let x2 = cp * x1 + sp * z1;
    let z2 = -sp * x1 + cp * z1;
    [cy * x2 - sy * y1, sy * x2 + cy * y1, z2]
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Pose {
    translation: Vec3,
    roll: f64,
    pitch: f64,
    yaw: f64,
}

#[derive(Clone, Debug)]
enum Layout {
    /// Six-legged Stewart platform fed with all six DOF.
    Hexapod { base: [Vec3; 6], top: [Vec3; 6] },
    /// Three vertical actuators fed with heave, roll and pitch.
    Tripod { top: [Vec3; 3] },
}

/// Maps DOF frames to actuator-length offsets from neutral.
#[derive(Clone, Debug)]
pub(crate) struct Kinematics {
    geometry: Geometry,
    layout: Layout,
    neutral: [f64; 6],
    full_scale: f64,
    scratch: Block,
}

impl Kinematics {
    pub fn new(version: KinematicsVersion, channels: usize, full_scale: f64) -> Result<Self> {
        let geometry = Geometry::of(version);
        let layout = match channels {
            6 => {
                let mut base = [[0.0; 3]; 6];
                let mut top = [[0.0; 3]; 6];
                for leg in 0..6 {
                    let center = 120.0 * (leg / 2) as f64;
                    let side = if leg % 2 == 0 { -1.0 } else { 1.0 };
                    base[leg] = polar(geometry.base_radius, center + side * 15.0);
                    top[leg] = polar(geometry.platform_radius, center + side * 45.0);
                }
                Layout::Hexapod { base, top }
            }
            3 => Layout::Tripod {
                top: [
                    polar(geometry.platform_radius, 90.0),
                    polar(geometry.platform_radius, 210.0),
                    polar(geometry.platform_radius, 330.0),
                ],
            },
            n => {
                return Err(Error::validation(format!(
                    "kinematics needs 6 DOF or heave/roll/pitch channels, got {n}"
                )))
            }
        };
        let mut kinematics = Self {
            geometry,
            layout,
            neutral: [0.0; 6],
            full_scale,
            scratch: Block::new(channels),
        };
        let neutral = Pose {
            translation: [0.0; 3],
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
        };
        let mut lengths = [0.0; 6];
        kinematics.legs(&neutral, &mut lengths);
        kinematics.neutral = lengths;
        Ok(kinematics)
    }

    pub fn channels(&self) -> usize {
        match self.layout {
            Layout::Hexapod { .. } => 6,
            Layout::Tripod { .. } => 3,
        }
    }

    /// Actuator lengths for `pose`, written into `out`. Returns how many legs were written.
    fn legs(&self, pose: &Pose, out: &mut [f64; 6]) -> usize {
        let lift = [0.0, 0.0, self.geometry.height];
        match &self.layout {
            Layout::Hexapod { base, top } => {
                for ((o, b), p) in out.iter_mut().zip(base).zip(top) {
                    let r = rotate(*p, pose.roll, pose.pitch, pose.yaw);
                    let world = [
                        r[0] + pose.translation[0] + lift[0],
                        r[1] + pose.translation[1] + lift[1],
                        r[2] + pose.translation[2] + lift[2],
                    ];
                    *o = norm(sub(world, *b));
                }
                6
            }
            Layout::Tripod { top } => {
                for (o, p) in out.iter_mut().zip(top) {
                    let r = rotate(*p, pose.roll, pose.pitch, 0.0);
                    *o = self.geometry.height + pose.translation[2] + r[2];
                }
                3
            }
        }
    }

    fn pose(&self, frame: &[f64]) -> Pose {
        let travel = self.geometry.stroke / 2.0 / self.full_scale;
        let angle = self.geometry.max_rotation.to_radians() / self.full_scale;
        match self.layout {
            Layout::Hexapod { .. } => Pose {
                translation: [frame[SURGE] * travel, frame[SWAY] * travel, frame[HEAVE] * travel],
                roll: frame[ROLL] * angle,
                pitch: frame[PITCH] * angle,
                yaw: frame[YAW] * angle,
            },
            Layout::Tripod { .. } => Pose {
                translation: [0.0, 0.0, frame[0] * travel],
                roll: frame[1] * angle,
                pitch: frame[2] * angle,
                yaw: 0.0,
            },
        }
    }

    pub fn process(&mut self, block: &mut Block) {
        let per_mm = self.full_scale / (self.geometry.stroke / 2.0);
        self.scratch.reset(self.channels());
        let mut out = [0.0; 6];
        for frame in block.iter_frames() {
            let count = self.legs(&self.pose(frame), &mut out);
            for (o, n) in out[..count].iter_mut().zip(&self.neutral) {
                *o = (*o - n) * per_mm;
            }
            self.scratch.push_frame(&out[..count]);
        }
        core::mem::swap(block, &mut self.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FS: f64 = 32768.0;

    #[test]
    fn tilt_adds_asin_of_longitudinal_force_to_pitch() {
        let mut tilt = Tilt::new(6, FS).unwrap();
        let mut block = Block::from_interleaved(6, vec![FS / 2.0, 0.0, 0.0, 0.0, 100.0, 0.0]);
        tilt.process(&mut block);
        // asin(0.5) = 30° = a third of full scale
        assert_relative_eq!(block.frame(0)[PITCH], 100.0 + FS / 3.0, epsilon = 1e-6);
        assert_relative_eq!(block.frame(0)[ROLL], 0.0);
    }

    #[test]
    fn tilt_requires_six_channels() {
        assert!(Tilt::new(3, FS).is_err());
    }

    #[test]
    fn neutral_pose_maps_to_zero_offsets() {
        for channels in [3, 6] {
            let mut k = Kinematics::new(KinematicsVersion::V800, channels, FS).unwrap();
            let mut block = Block::silence(channels, 2);
            k.process(&mut block);
            assert_eq!(block.channels(), channels);
            for s in block.as_slice() {
                assert_relative_eq!(*s, 0.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn neutral_lengths_fill_only_the_used_legs() {
        let hexapod = Kinematics::new(KinematicsVersion::V700, 6, FS).unwrap();
        assert!(hexapod.neutral.iter().all(|l| (*l - hexapod.neutral[0]).abs() < 1e-9 && *l > 0.0));

        let tripod = Kinematics::new(KinematicsVersion::V700, 3, FS).unwrap();
        assert!(tripod.neutral[..3].iter().all(|l| *l > 0.0));
        assert_eq!(tripod.neutral[3..], [0.0; 3]);
    }

    #[test]
    fn pure_heave_extends_every_leg_equally() {
        let mut k = Kinematics::new(KinematicsVersion::V700, 3, FS).unwrap();
        let mut block = Block::from_interleaved(3, vec![FS / 2.0, 0.0, 0.0]);
        k.process(&mut block);
        for s in block.as_slice() {
            assert_relative_eq!(*s, FS / 2.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn hexapod_roll_moves_opposite_legs_in_opposite_directions() {
        let mut k = Kinematics::new(KinematicsVersion::V1000, 6, FS).unwrap();
        let mut block = Block::from_interleaved(6, vec![0.0, 0.0, 0.0, FS / 4.0, 0.0, 0.0]);
        k.process(&mut block);
        let legs = block.frame(0);
        assert!(legs.iter().any(|l| *l > 1.0));
        assert!(legs.iter().any(|l| *l < -1.0));
    }

    #[test]
    fn unsupported_channel_counts_are_rejected() {
        assert!(Kinematics::new(KinematicsVersion::V700, 4, FS).is_err());
    }
}
