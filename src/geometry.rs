// Planar geometry shared by the drive stack
//
// Conventions: x forward, y left, angles counter-clockwise in radians.
// Module angles are wrapped to (-pi, pi]; pose headings are left continuous.

use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Below this magnitude an angle is treated as zero in the arc maps
const SMALL_ANGLE: f64 = 1e-9;

/// Wrap an angle into (-pi, pi]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Shortest signed rotation taking `from` onto `to`, in (-pi, pi]
pub fn angle_between(from: f64, to: f64) -> f64 {
    wrap_angle(to - from)
}

/// A 2D offset, e.g. a module mounting position in the chassis frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub x: f64,
    pub y: f64,
}

impl Translation {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Rotate counter-clockwise by `angle`
    pub fn rotate(&self, angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
        }
    }
}

/// Chassis velocity: linear (m/s) and angular (rad/s)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisSpeeds {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

impl ChassisSpeeds {
    pub const fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Convert a field-relative velocity into the chassis frame given the robot heading
    pub fn from_field_relative(vx: f64, vy: f64, omega: f64, heading: f64) -> Self {
        let chassis = Translation::new(vx, vy).rotate(-heading);
        Self::new(chassis.x, chassis.y, omega)
    }

    /// First-order discretization correction.
    ///
    /// Commanding `vx, vy, omega` simultaneously for one tick traces an arc,
    /// not the straight chord the command intends. This returns the velocity
    /// whose arc over `dt` ends exactly at the pose the command would reach
    /// if translation and rotation were applied independently.
    pub fn discretize(&self, dt: f64) -> Self {
        if dt <= 0.0 {
            return *self;
        }
        let target = Pose::new(self.vx * dt, self.vy * dt, self.omega * dt);
        let twist = Pose::default().log(&target);
        Self::new(twist.dx / dt, twist.dy / dt, twist.dtheta / dt)
    }
}

/// Constant-curvature displacement expressed in the chassis frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Twist {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

impl Twist {
    pub const fn new(dx: f64, dy: f64, dtheta: f64) -> Self {
        Self { dx, dy, dtheta }
    }
}

/// Robot pose in the field frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Continuous heading, not wrapped
    pub heading: f64,
    /// Seconds, on the runtime clock
    #[serde(default)]
    pub timestamp: f64,
}

impl Pose {
    pub const fn new(x: f64, y: f64, heading: f64) -> Self {
        Self {
            x,
            y,
            heading,
            timestamp: 0.0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Follow `twist` from this pose along its arc
    pub fn exp(&self, twist: &Twist) -> Pose {
        let (sin, cos) = twist.dtheta.sin_cos();
        let (s, c) = if twist.dtheta.abs() < SMALL_ANGLE {
            (
                1.0 - twist.dtheta * twist.dtheta / 6.0,
                0.5 * twist.dtheta,
            )
        } else {
            (sin / twist.dtheta, (1.0 - cos) / twist.dtheta)
        };
        let local = Translation::new(twist.dx * s - twist.dy * c, twist.dx * c + twist.dy * s);
        let field = local.rotate(self.heading);

        Pose {
            x: self.x + field.x,
            y: self.y + field.y,
            heading: self.heading + twist.dtheta,
            timestamp: self.timestamp,
        }
    }

    /// The twist that takes this pose onto `end`; inverse of [`Pose::exp`]
    pub fn log(&self, end: &Pose) -> Twist {
        let local = Translation::new(end.x - self.x, end.y - self.y).rotate(-self.heading);
        let dtheta = end.heading - self.heading;
        let half = 0.5 * dtheta;
        let cos_minus_one = dtheta.cos() - 1.0;

        let half_by_tan_half = if cos_minus_one.abs() < SMALL_ANGLE {
            1.0 - dtheta * dtheta / 12.0
        } else {
            -(half * dtheta.sin()) / cos_minus_one
        };

        let rotated = local.rotate((-half).atan2(half_by_tan_half));
        let scale = half_by_tan_half.hypot(half);

        Twist::new(rotated.x * scale, rotated.y * scale, dtheta)
    }

    /// Move part-way towards `other`: position linearly, heading along the shortest arc
    pub fn interpolate(&self, other: &Pose, weight: f64) -> Pose {
        Pose {
            x: self.x + weight * (other.x - self.x),
            y: self.y + weight * (other.y - self.y),
            heading: self.heading + weight * angle_between(self.heading, other.heading),
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_wrap_angle_range() {
        assert!((wrap_angle(PI) - PI).abs() < EPS);
        assert!((wrap_angle(-PI) - PI).abs() < EPS);
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < EPS);
        assert!((wrap_angle(-5.0 * TAU + 0.25) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_angle_between_crosses_seam() {
        let from = 170f64.to_radians();
        let to = (-170f64).to_radians();
        assert!((angle_between(from, to) - 20f64.to_radians()).abs() < 1e-9);
    }

    #[test]
    fn test_exp_log_inverse() {
        let start = Pose::new(1.0, -2.0, 0.7);
        let end = Pose::new(1.4, -1.1, 1.6);
        let twist = start.log(&end);
        let back = start.exp(&twist);
        assert!((back.x - end.x).abs() < 1e-9);
        assert!((back.y - end.y).abs() < 1e-9);
        assert!((back.heading - end.heading).abs() < 1e-9);
    }

    #[test]
    fn test_exp_straight_line() {
        let pose = Pose::new(0.0, 0.0, PI / 2.0).exp(&Twist::new(1.0, 0.0, 0.0));
        assert!(pose.x.abs() < EPS);
        assert!((pose.y - 1.0).abs() < EPS);
    }

    #[test]
    fn test_discretize_pure_translation_is_unchanged() {
        let speeds = ChassisSpeeds::new(1.5, -0.5, 0.0);
        let corrected = speeds.discretize(0.02);
        assert!((corrected.vx - speeds.vx).abs() < 1e-12);
        assert!((corrected.vy - speeds.vy).abs() < 1e-12);
        assert_eq!(corrected.omega, 0.0);
    }

    #[test]
    fn test_discretize_arc_lands_on_target() {
        let dt = 0.02;
        let speeds = ChassisSpeeds::new(2.0, 0.0, 3.0);
        let corrected = speeds.discretize(dt);
        let end = Pose::default().exp(&Twist::new(
            corrected.vx * dt,
            corrected.vy * dt,
            corrected.omega * dt,
        ));
        assert!((end.x - speeds.vx * dt).abs() < 1e-12);
        assert!((end.y - speeds.vy * dt).abs() < 1e-12);
        assert!((end.heading - speeds.omega * dt).abs() < 1e-12);
    }

    #[test]
    fn test_field_relative_rotation() {
        // Facing +y, a field +y command is chassis forward
        let speeds = ChassisSpeeds::from_field_relative(0.0, 1.0, 0.2, PI / 2.0);
        assert!((speeds.vx - 1.0).abs() < EPS);
        assert!(speeds.vy.abs() < EPS);
        assert_eq!(speeds.omega, 0.2);
    }

    #[test]
    fn test_interpolate_heading_shortest_arc() {
        let a = Pose::new(0.0, 0.0, 170f64.to_radians());
        let b = Pose::new(2.0, 0.0, (-170f64).to_radians());
        let mid = a.interpolate(&b, 0.5);
        assert!((mid.x - 1.0).abs() < EPS);
        assert!((mid.heading - 180f64.to_radians()).abs() < 1e-9);
    }
}
