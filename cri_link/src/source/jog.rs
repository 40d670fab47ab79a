//! Velocity jog generator.
//!
//! Integrates per-axis jog fractions over time starting from an anchor pose:
//!
//! ```text
//! position += jog * velocity * elapsed_ms / 1000
//! ```
//!
//! Joint mode drives all nine joints. Cartesian mode drives the TCP position
//! and orientation; the external axes keep their anchored values.

use super::PositionSource;
use cri_common::config::JogConfig;
use cri_common::consts::{JOINT_COUNT, ROBOT_JOINT_COUNT};
use cri_common::position::PositionSet;
use tracing::debug;

/// Which jog vector was set most recently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JogMode {
    /// Nine joint fractions.
    #[default]
    Joint,
    /// Translation and rotation fractions.
    Cartesian,
}

/// Number of jog axes in cartesian mode (X, Y, Z, A, B, C).
const CARTESIAN_AXES: usize = 6;

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) }
}

/// Jog generator.
#[derive(Debug, Clone)]
pub struct JogSource {
    mode: JogMode,
    joint_jog: [f64; JOINT_COUNT],
    translation_jog: [f64; 3],
    rotation_jog: [f64; 3],
    velocities: JogConfig,
    position: PositionSet,
}

impl JogSource {
    /// Create a generator at rest with the given velocities.
    pub fn new(velocities: JogConfig) -> Self {
        Self {
            mode: JogMode::default(),
            joint_jog: [0.0; JOINT_COUNT],
            translation_jog: [0.0; 3],
            rotation_jog: [0.0; 3],
            velocities,
            position: PositionSet::default(),
        }
    }

    /// Set joint jog fractions and switch to joint mode.
    ///
    /// Values are clamped to [-1, 1].
    pub fn set_joint_jog(&mut self, jog: [f64; JOINT_COUNT]) {
        self.joint_jog = jog.map(clamp_unit);
        self.mode = JogMode::Joint;
    }

    /// Set cartesian jog fractions and switch to cartesian mode.
    pub fn set_cartesian_jog(&mut self, translation: [f64; 3], rotation: [f64; 3]) {
        self.translation_jog = translation.map(clamp_unit);
        self.rotation_jog = rotation.map(clamp_unit);
        self.mode = JogMode::Cartesian;
    }

    /// Add `delta` to one axis of the active mode's jog vector.
    ///
    /// Cartesian axes 0..3 are translation, 3..6 rotation. Out-of-range axes
    /// are ignored.
    pub fn change_jog(&mut self, axis: usize, delta: f64) {
        let slot = match self.mode {
            JogMode::Joint => self.joint_jog.get_mut(axis),
            JogMode::Cartesian if axis < 3 => self.translation_jog.get_mut(axis),
            JogMode::Cartesian if axis < CARTESIAN_AXES => self.rotation_jog.get_mut(axis - 3),
            JogMode::Cartesian => None,
        };
        if let Some(value) = slot {
            *value = clamp_unit(*value + delta);
        }
    }

    /// Zero every jog fraction; re-anchor to `current` if given.
    pub fn reset(&mut self, current: Option<&PositionSet>) {
        self.joint_jog = [0.0; JOINT_COUNT];
        self.translation_jog = [0.0; 3];
        self.rotation_jog = [0.0; 3];
        if let Some(current) = current {
            self.reanchor(current);
        }
    }

    /// Re-anchor the integrator to an absolute pose.
    ///
    /// Call after (re)connecting so jogging continues from the robot's actual
    /// pose instead of jumping back to a stale one.
    pub fn reanchor(&mut self, current: &PositionSet) {
        debug!("Jog: re-anchored to {}", current);
        self.position = *current;
    }

    /// Re-anchor only the joint values.
    pub fn set_joints(&mut self, joints: [f64; JOINT_COUNT]) {
        self.position.joints = joints;
    }

    /// Set joint, linear and angular velocities.
    pub fn set_velocities(&mut self, velocities: JogConfig) {
        self.velocities = velocities;
    }

    /// Active jog mode.
    pub fn mode(&self) -> JogMode {
        self.mode
    }

    /// Joint jog fractions.
    pub fn joint_jog(&self) -> [f64; JOINT_COUNT] {
        self.joint_jog
    }

    /// Translation and rotation jog fractions.
    pub fn cartesian_jog(&self) -> ([f64; 3], [f64; 3]) {
        (self.translation_jog, self.rotation_jog)
    }

    /// Integrated pose.
    pub fn position(&self) -> PositionSet {
        self.position
    }
}

impl Default for JogSource {
    fn default() -> Self {
        Self::new(JogConfig::default())
    }
}

impl PositionSource for JogSource {
    /// Integrate the active jog vector; every field the integrator does not
    /// drive is taken from `current`.
    fn next_position(&mut self, current: &PositionSet, elapsed_ms: f64) -> PositionSet {
        let seconds = elapsed_ms.max(0.0) / 1000.0;
        let mut next = *current;

        match self.mode {
            JogMode::Joint => {
                let step = self.velocities.joint_velocity * seconds;
                for (joint, jog) in self.position.joints.iter_mut().zip(self.joint_jog) {
                    *joint += jog * step;
                }
                next.joints = self.position.joints;
                next.is_cartesian = false;
            }
            JogMode::Cartesian => {
                let linear = self.velocities.linear_velocity * seconds;
                let angular = self.velocities.angular_velocity * seconds;
                for (value, jog) in self
                    .position
                    .cartesian_position
                    .iter_mut()
                    .zip(self.translation_jog)
                {
                    *value += jog * linear;
                }
                for (value, jog) in self
                    .position
                    .cartesian_orientation
                    .iter_mut()
                    .zip(self.rotation_jog)
                {
                    *value += jog * angular;
                }
                next.cartesian_position = self.position.cartesian_position;
                next.cartesian_orientation = self.position.cartesian_orientation;
                next.joints[ROBOT_JOINT_COUNT..]
                    .copy_from_slice(&self.position.joints[ROBOT_JOINT_COUNT..]);
                next.is_cartesian = true;
            }
        }

        next
    }

    fn resync(&mut self, current: &PositionSet) {
        self.reanchor(current);
    }

    fn name(&self) -> &'static str {
        "jog"
    }
}
