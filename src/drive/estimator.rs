// Pose estimation: wheel odometry + gyro, retro-corrected by late absolute poses
//
// Every tick stores a sample (time, raw gyro, module positions, estimated
// pose). A correction is blended into the sample closest to its timestamp and
// the odometry recorded after that sample is replayed on top of the blend, so
// a correction that arrives several ticks late still moves the current pose.
// Each sample keeps the total shift corrections have applied to it, and replay
// re-applies those shifts, so an earlier correction never erases a later one.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::kinematics::{ModulePosition, SwerveKinematics, NUM_MODULES};
use crate::geometry::Pose;

/// One absolute pose measurement waiting to be fused
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseCorrection {
    pub pose: Pose,
    /// When the measurement was taken, seconds on the runtime clock
    pub timestamp: f64,
    /// Weight of this measurement against odometry in [0, 1]; `None` uses the default
    pub trust: Option<f64>,
}

impl PoseCorrection {
    pub fn new(pose: Pose, timestamp: f64) -> Self {
        Self {
            pose,
            timestamp,
            trust: None,
        }
    }

    pub fn with_trust(mut self, trust: f64) -> Self {
        self.trust = Some(trust);
        self
    }
}

/// Field-frame shift a correction applied on top of odometry
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PoseShift {
    dx: f64,
    dy: f64,
    dheading: f64,
}

impl PoseShift {
    fn between(from: &Pose, to: &Pose) -> Self {
        Self {
            dx: to.x - from.x,
            dy: to.y - from.y,
            dheading: to.heading - from.heading,
        }
    }

    fn accumulate(&mut self, other: &PoseShift) {
        self.dx += other.dx;
        self.dy += other.dy;
        self.dheading += other.dheading;
    }

    fn apply(&self, pose: &mut Pose) {
        pose.x += self.dx;
        pose.y += self.dy;
        pose.heading += self.dheading;
    }
}

#[derive(Debug, Clone, Copy)]
struct OdometrySample {
    timestamp: f64,
    gyro_heading: f64,
    positions: [ModulePosition; NUM_MODULES],
    pose: Pose,
    /// Sum of corrections blended in at this sample
    shift: PoseShift,
}

pub struct PoseEstimator {
    kinematics: SwerveKinematics,
    pose: Pose,
    /// Field heading minus raw gyro heading
    gyro_offset: f64,
    previous_gyro: f64,
    previous_positions: [ModulePosition; NUM_MODULES],
    history: VecDeque<OdometrySample>,
    retention: f64,
    trust: f64,
}

impl PoseEstimator {
    /// `retention` is the longest correction latency (s) that can still be replayed;
    /// `trust` the default weight given to absolute corrections.
    pub fn new(
        kinematics: SwerveKinematics,
        gyro_heading: f64,
        positions: [ModulePosition; NUM_MODULES],
        initial_pose: Pose,
        retention: f64,
        trust: f64,
    ) -> Self {
        Self {
            kinematics,
            pose: initial_pose,
            gyro_offset: initial_pose.heading - gyro_heading,
            previous_gyro: gyro_heading,
            previous_positions: positions,
            history: VecDeque::new(),
            retention,
            trust: trust.clamp(0.0, 1.0),
        }
    }

    /// Best current estimate
    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Forget history and jump to `pose`
    pub fn reset(&mut self, gyro_heading: f64, positions: [ModulePosition; NUM_MODULES], pose: Pose) {
        debug!(x = pose.x, y = pose.y, heading = pose.heading, "pose estimator reset");
        self.history.clear();
        self.pose = pose;
        self.gyro_offset = pose.heading - gyro_heading;
        self.previous_gyro = gyro_heading;
        self.previous_positions = positions;
    }

    /// Integrate one tick of odometry
    pub fn update(
        &mut self,
        timestamp: f64,
        gyro_heading: f64,
        positions: [ModulePosition; NUM_MODULES],
    ) -> Pose {
        let mut twist = self.kinematics.to_twist(&self.previous_positions, &positions);
        twist.dtheta = gyro_heading - self.previous_gyro;

        let mut pose = self.pose.exp(&twist);
        pose.heading = gyro_heading + self.gyro_offset;
        pose.timestamp = timestamp;

        self.pose = pose;
        self.previous_gyro = gyro_heading;
        self.previous_positions = positions;

        self.history.push_back(OdometrySample {
            timestamp,
            gyro_heading,
            positions,
            pose,
            shift: PoseShift::default(),
        });
        while let Some(oldest) = self.history.front() {
            if oldest.timestamp < timestamp - self.retention {
                self.history.pop_front();
            } else {
                break;
            }
        }

        pose
    }

    /// Fuse one absolute pose measurement
    pub fn add_correction(&mut self, correction: &PoseCorrection) -> Pose {
        let trust = correction.trust.unwrap_or(self.trust).clamp(0.0, 1.0);

        let Some(index) = self.sample_index(correction.timestamp) else {
            warn!(
                timestamp = correction.timestamp,
                "pose correction outside retention window, applying to current pose"
            );
            self.apply_directly(&correction.pose, trust);
            return self.pose;
        };

        let sample = &mut self.history[index];
        let mut blended = sample.pose.interpolate(&correction.pose, trust);
        blended.timestamp = sample.timestamp;
        sample.shift.accumulate(&PoseShift::between(&sample.pose, &blended));
        sample.pose = blended;

        let replayed = self.history.len() - index - 1;
        self.replay_from(index);

        debug!(
            timestamp = correction.timestamp,
            trust,
            replayed,
            x = self.pose.x,
            y = self.pose.y,
            "pose correction applied"
        );
        self.pose
    }

    /// Sample closest to `timestamp`, or `None` when nothing in the window can hold it
    fn sample_index(&self, timestamp: f64) -> Option<usize> {
        let newest = self.history.back()?;
        if timestamp < newest.timestamp - self.retention {
            return None;
        }

        self.history
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let da = (a.timestamp - timestamp).abs();
                let db = (b.timestamp - timestamp).abs();
                da.total_cmp(&db)
            })
            .map(|(i, _)| i)
    }

    /// Rebuild every sample after `index` from its odometry, re-applying stored shifts
    fn replay_from(&mut self, index: usize) {
        let mut previous = self.history[index];
        let mut gyro_offset = previous.pose.heading - previous.gyro_heading;
        for later in self.history.iter_mut().skip(index + 1) {
            let mut twist = self.kinematics.to_twist(&previous.positions, &later.positions);
            twist.dtheta = later.gyro_heading - previous.gyro_heading;

            let mut pose = previous.pose.exp(&twist);
            pose.heading = later.gyro_heading + gyro_offset;
            pose.timestamp = later.timestamp;
            later.shift.apply(&mut pose);
            gyro_offset += later.shift.dheading;

            later.pose = pose;
            previous = *later;
        }
        self.gyro_offset = gyro_offset;
        self.pose = previous.pose;
    }

    /// Blend into the current pose and move every retained sample by the same
    /// shift, so replays started from any of them keep it
    fn apply_directly(&mut self, measured: &Pose, trust: f64) {
        let mut blended = self.pose.interpolate(measured, trust);
        blended.timestamp = self.pose.timestamp;
        let shift = PoseShift::between(&self.pose, &blended);

        for sample in self.history.iter_mut() {
            shift.apply(&mut sample.pose);
        }
        self.gyro_offset += shift.dheading;
        self.pose = blended;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Translation;

    const DT: f64 = 0.02;
    const EPS: f64 = 1e-9;

    fn kinematics() -> SwerveKinematics {
        SwerveKinematics::new([
            Translation::new(0.3, 0.3),
            Translation::new(-0.3, 0.3),
            Translation::new(-0.3, -0.3),
            Translation::new(0.3, -0.3),
        ])
        .unwrap()
    }

    fn estimator(retention: f64, trust: f64) -> PoseEstimator {
        PoseEstimator::new(
            kinematics(),
            0.0,
            [ModulePosition::default(); NUM_MODULES],
            Pose::default(),
            retention,
            trust,
        )
    }

    /// Drive straight ahead 1 m/s for `ticks`, starting from tick `from`
    fn drive_forward(estimator: &mut PoseEstimator, from: usize, ticks: usize) {
        for k in from + 1..=from + ticks {
            let distance = k as f64 * DT;
            estimator.update(k as f64 * DT, 0.0, [ModulePosition::new(distance, 0.0); NUM_MODULES]);
        }
    }

    fn assert_pose(pose: Pose, x: f64, y: f64, heading: f64) {
        assert!((pose.x - x).abs() < EPS, "x {} vs {}", pose.x, x);
        assert!((pose.y - y).abs() < EPS, "y {} vs {}", pose.y, y);
        assert!((pose.heading - heading).abs() < EPS, "heading {} vs {}", pose.heading, heading);
    }

    #[test]
    fn test_still_robot_keeps_pose() {
        let start = Pose::new(1.0, 2.0, 0.5);
        let positions = [ModulePosition::new(0.7, 0.1); NUM_MODULES];
        let mut estimator = PoseEstimator::new(kinematics(), 0.3, positions, start, 1.0, 0.3);
        for k in 1..=100 {
            estimator.update(k as f64 * DT, 0.3, positions);
        }
        assert_pose(estimator.pose(), 1.0, 2.0, 0.5);
    }

    #[test]
    fn test_odometry_follows_straight_line() {
        let mut estimator = estimator(1.0, 0.5);
        drive_forward(&mut estimator, 0, 50);
        assert_pose(estimator.pose(), 1.0, 0.0, 0.0);
        assert!((estimator.pose().timestamp - 1.0).abs() < EPS);
    }

    #[test]
    fn test_heading_follows_gyro_plus_initial_pose() {
        let positions = [ModulePosition::default(); NUM_MODULES];
        let mut estimator =
            PoseEstimator::new(kinematics(), 5.0, positions, Pose::new(0.0, 0.0, 1.0), 1.0, 0.5);
        // Continuous: no wrap even past pi
        let pose = estimator.update(DT, 9.0, positions);
        assert!((pose.heading - 5.0).abs() < EPS);
    }

    #[test]
    fn test_correction_at_stored_sample_blends_then_replays() {
        let mut estimator = estimator(1.0, 0.5);
        drive_forward(&mut estimator, 0, 10);

        // Odometry at tick 5 is (0.1, 0, 0)
        let correction = PoseCorrection::new(Pose::new(0.2, 0.1, 0.2), 5.0 * DT);
        let pose = estimator.add_correction(&correction);

        // Blend is (0.15, 0.05, 0.1); five more ticks of 0.02 m replay along heading 0.1
        let heading = 0.1f64;
        assert_pose(pose, 0.15 + 0.1 * heading.cos(), 0.05 + 0.1 * heading.sin(), heading);
        assert!((pose.timestamp - 10.0 * DT).abs() < EPS);

        // Later odometry continues from the corrected estimate
        drive_forward(&mut estimator, 10, 1);
        assert_pose(
            estimator.pose(),
            0.15 + 0.12 * heading.cos(),
            0.05 + 0.12 * heading.sin(),
            heading,
        );
    }

    #[test]
    fn test_correction_trust_override() {
        let mut estimator = estimator(1.0, 0.5);
        drive_forward(&mut estimator, 0, 10);
        let correction = PoseCorrection::new(Pose::new(0.5, 0.0, 0.0), 10.0 * DT).with_trust(1.0);
        assert_pose(estimator.add_correction(&correction), 0.5, 0.0, 0.0);

        let ignored = PoseCorrection::new(Pose::new(9.0, 9.0, 0.0), 10.0 * DT).with_trust(-3.0);
        assert_pose(estimator.add_correction(&ignored), 0.5, 0.0, 0.0);
    }

    #[test]
    fn test_multiple_corrections_apply_in_order() {
        let mut estimator = estimator(1.0, 0.5);
        drive_forward(&mut estimator, 0, 10);
        let correction = PoseCorrection::new(Pose::new(0.0, 0.4, 0.0), 10.0 * DT);
        estimator.add_correction(&correction);
        estimator.add_correction(&correction);
        // y: 0 -> 0.2 -> 0.3
        assert!((estimator.pose().y - 0.3).abs() < EPS);
    }

    #[test]
    fn test_earlier_correction_keeps_later_one() {
        let mut estimator = estimator(1.0, 0.5);
        drive_forward(&mut estimator, 0, 100);

        // Camera with low latency reports first
        let recent = PoseCorrection::new(Pose::new(2.0, 2.0, 0.2), 100.0 * DT);
        assert_pose(estimator.add_correction(&recent), 2.0, 1.0, 0.1);

        // Slower camera agrees with odometry at an older sample
        let older = PoseCorrection::new(Pose::new(1.8, 0.0, 0.0), 90.0 * DT);
        assert_pose(estimator.add_correction(&older), 2.0, 1.0, 0.1);

        // Heading offset from the recent correction carries into new ticks
        drive_forward(&mut estimator, 100, 1);
        assert!((estimator.pose().heading - 0.1).abs() < EPS);
    }

    #[test]
    fn test_stale_correction_survives_later_replay() {
        let mut estimator = estimator(0.5, 0.5);
        drive_forward(&mut estimator, 0, 100);

        let stale = PoseCorrection::new(Pose::new(2.0, 2.0, 0.0), 0.1);
        assert_pose(estimator.add_correction(&stale), 2.0, 1.0, 0.0);

        // In-window correction that matches pure odometry pulls halfway back, not all the way
        let in_window = PoseCorrection::new(Pose::new(1.8, 0.0, 0.0), 90.0 * DT);
        assert_pose(estimator.add_correction(&in_window), 2.0, 0.5, 0.0);
    }

    #[test]
    fn test_stale_correction_applies_to_current_pose() {
        let mut estimator = estimator(0.5, 0.5);
        drive_forward(&mut estimator, 0, 100);
        assert!(estimator.history_len() <= 27);

        let stale = PoseCorrection::new(Pose::new(2.0, 1.0, 0.0), 0.1);
        let pose = estimator.add_correction(&stale);
        assert_pose(pose, 2.0, 0.5, 0.0);
    }

    #[test]
    fn test_future_correction_treated_as_now() {
        let mut estimator = estimator(1.0, 0.25);
        drive_forward(&mut estimator, 0, 10);
        let correction = PoseCorrection::new(Pose::new(0.2, 0.4, 0.0), 99.0);
        assert_pose(estimator.add_correction(&correction), 0.2, 0.1, 0.0);
    }

    #[test]
    fn test_correction_without_history_applies_directly() {
        let mut estimator = estimator(1.0, 0.5);
        let correction = PoseCorrection::new(Pose::new(1.0, 1.0, 0.4), 0.0);
        assert_pose(estimator.add_correction(&correction), 0.5, 0.5, 0.2);

        // Heading offset sticks for later ticks
        let pose = estimator.update(DT, 0.0, [ModulePosition::default(); NUM_MODULES]);
        assert!((pose.heading - 0.2).abs() < EPS);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut estimator = estimator(1.0, 0.5);
        drive_forward(&mut estimator, 0, 10);
        let positions = [ModulePosition::new(0.2, 0.0); NUM_MODULES];
        estimator.reset(1.0, positions, Pose::new(3.0, 4.0, 0.0));
        assert_eq!(estimator.history_len(), 0);
        assert_pose(estimator.pose(), 3.0, 4.0, 0.0);

        // Gyro reads 1.0 but the reset pose says heading 0
        let pose = estimator.update(11.0 * DT, 1.0, positions);
        assert_pose(pose, 3.0, 4.0, 0.0);
    }
}
