//! Pose record exchanged across the robot link.
//!
//! A `PositionSet` is created fresh per protocol tick, either by a position
//! source or by parsing a feedback message, and is never mutated after it has
//! been handed to a consumer. The type is `Copy`, so publishing it means
//! replacing a whole value rather than patching fields in place.

use crate::consts::{EXTERNAL_JOINT_COUNT, JOINT_COUNT, ROBOT_JOINT_COUNT};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Joint, cartesian and platform pose of the robot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionSet {
    /// 6 robot joints followed by 3 external joints.
    pub joints: [f64; JOINT_COUNT],
    /// Cartesian X, Y, Z.
    pub cartesian_position: [f64; 3],
    /// Cartesian A, B, C.
    pub cartesian_orientation: [f64; 3],
    /// Platform X, Y.
    pub platform_position: [f64; 2],
    /// Platform heading.
    pub platform_heading: f64,
    /// Selects whether the cartesian pose (true) or `joints[0..6]` (false)
    /// is authoritative. The external joints are meaningful in both modes.
    pub is_cartesian: bool,
}

impl PositionSet {
    /// Create a joint-mode position from the given joint values.
    pub fn from_joints(joints: [f64; JOINT_COUNT]) -> Self {
        Self {
            joints,
            ..Self::default()
        }
    }

    /// The 6 robot joints.
    pub fn robot_joints(&self) -> &[f64] {
        &self.joints[..ROBOT_JOINT_COUNT]
    }

    /// The 3 external joints.
    pub fn external_joints(&self) -> &[f64] {
        &self.joints[ROBOT_JOINT_COUNT..]
    }

    /// Overwrite the external joints, leaving robot joints untouched.
    pub fn set_external_joints(&mut self, external: [f64; EXTERNAL_JOINT_COUNT]) {
        self.joints[ROBOT_JOINT_COUNT..].copy_from_slice(&external);
    }

    /// Cartesian X, Y, Z, A, B, C as one array.
    pub fn cartesian(&self) -> [f64; 6] {
        let [x, y, z] = self.cartesian_position;
        let [a, b, c] = self.cartesian_orientation;
        [x, y, z, a, b, c]
    }
}

impl fmt::Display for PositionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let j = &self.joints;
        let [x, y, z, a, b, c] = self.cartesian();
        write!(
            f,
            "Joints: {:.2} {:.2} {:.2} {:.2} {:.2} {:.2} Ext: {:.2} {:.2} {:.2} \
             X={x:.2} Y={y:.2} Z={z:.2} A={a:.2} B={b:.2} C={c:.2}",
            j[0], j[1], j[2], j[3], j[4], j[5], j[6], j[7], j[8],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_joint_mode_at_zero() {
        let pose = PositionSet::default();
        assert!(!pose.is_cartesian);
        assert!(pose.joints.iter().all(|v| *v == 0.0));
        assert_eq!(pose.platform_heading, 0.0);
    }

    #[test]
    fn test_external_joint_accessors() {
        let mut pose = PositionSet::from_joints([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(pose.robot_joints(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(pose.external_joints(), &[7.0, 8.0, 9.0]);

        pose.set_external_joints([-1.0, -2.0, -3.0]);
        assert_eq!(pose.robot_joints(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(pose.external_joints(), &[-1.0, -2.0, -3.0]);
    }

    #[test]
    fn test_copy_is_independent() {
        let original = PositionSet::from_joints([1.0; JOINT_COUNT]);
        let mut copy = original;
        copy.joints[0] = 99.0;
        assert_eq!(original.joints[0], 1.0);
    }

    #[test]
    fn test_display_uses_two_decimals() {
        let mut pose = PositionSet::default();
        pose.joints[0] = 1.234;
        pose.cartesian_position[0] = 5.0;
        let text = pose.to_string();
        assert!(text.starts_with("Joints: 1.23 0.00"));
        assert!(text.contains("X=5.00"));
    }
}
