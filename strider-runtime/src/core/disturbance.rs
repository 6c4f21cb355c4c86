// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use crate::math::lerp;

use super::{DistanceSource, MotorChannel};

/// Side of a two-sided drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// A position-windowed override of the per-side velocity caps.
///
/// While active, the caps ramp from full speed down to the target
/// fractions over the `lower` width, hold there over `sustain`, and
/// ramp back over `resume`. Biasing one side below the other swerves
/// an otherwise straight move. Target caps are not range-checked;
/// values outside [-1, 1] are interpolated like any other.
#[derive(Debug, Clone, Copy)]
pub struct PathDisturbance {
    /// Side whose encoder keys the activation window while active.
    pub side: Side,
    pub left_cap: f64,
    pub right_cap: f64,
    /// Absolute activation distance. Negative values are measured
    /// backward from the command's total distance, resolved when the
    /// source is built.
    pub activation: f64,
    pub lower: f64,
    pub sustain: f64,
    pub resume: f64,
}

impl PathDisturbance {
    fn window_width(&self) -> f64 {
        self.lower + self.sustain + self.resume
    }

    /// Velocity cap for `side` at `offset` into the activation window.
    fn cap_for(&self, side: Side, offset: f64) -> f64 {
        let target = match side {
            Side::Left => self.left_cap,
            Side::Right => self.right_cap,
        };
        if offset < self.lower {
            if self.lower > 0.0 {
                lerp(1.0, target, offset / self.lower)
            } else {
                target
            }
        } else if offset < self.lower + self.sustain {
            target
        } else if offset < self.window_width() {
            if self.resume > 0.0 {
                lerp(target, 1.0, (offset - self.lower - self.sustain) / self.resume)
            } else {
                1.0
            }
        } else {
            1.0
        }
    }
}

/// A two-sided drive whose per-side velocity caps follow an ordered
/// list of [`PathDisturbance`] records.
///
/// At most one disturbance is active at a time, each activates at most
/// once, and when one deactivates the secondary side's offset is
/// resynchronized to the dominant side's reading so progress stays
/// continuous.
pub struct DisturbancePair<L, R> {
    left: L,
    right: R,
    left_zero: f64,
    right_zero: f64,
    disturbances: Vec<PathDisturbance>,
    used: Vec<bool>,
    active: Option<usize>,
}

impl<L: MotorChannel, R: MotorChannel> DisturbancePair<L, R> {
    pub fn new(
        mut left: L,
        mut right: R,
        mut disturbances: Vec<PathDisturbance>,
        total_distance: f64,
    ) -> Self {
        for d in &mut disturbances {
            if d.activation < 0.0 {
                d.activation += total_distance;
            }
        }
        let left_zero = left.position();
        let right_zero = right.position();
        let used = vec![false; disturbances.len()];
        Self {
            left,
            right,
            left_zero,
            right_zero,
            disturbances,
            used,
            active: None,
        }
    }

    fn reading(&mut self, side: Side) -> f64 {
        match side {
            Side::Left => self.left.position() - self.left_zero,
            Side::Right => self.right.position() - self.right_zero,
        }
    }

    /// Deactivate a disturbance whose window has been passed, then
    /// look for the next one to activate.
    fn refresh_active(&mut self) {
        if let Some(index) = self.active {
            let d = self.disturbances[index];
            let dominant = self.reading(d.side);
            if dominant.abs() > d.activation + d.window_width() {
                // Carry the dominant reading over to the secondary
                // side so the averaged progress does not jump.
                match d.side {
                    Side::Left => self.right_zero = self.right.position() - dominant,
                    Side::Right => self.left_zero = self.left.position() - dominant,
                }
                self.active = None;
            }
        }

        if self.active.is_none() {
            for index in 0..self.disturbances.len() {
                if self.used[index] {
                    continue;
                }
                let d = self.disturbances[index];
                let dominant = self.reading(d.side).abs();
                if dominant >= d.activation && dominant <= d.activation + d.window_width() {
                    self.used[index] = true;
                    self.active = Some(index);
                    debug!("path disturbance {} active at {}", index, dominant);
                    break;
                }
            }
        }
    }

    fn cap(&mut self, side: Side) -> f64 {
        match self.active {
            Some(index) => {
                let d = self.disturbances[index];
                let offset = self.reading(d.side).abs() - d.activation;
                d.cap_for(side, offset)
            }
            None => 1.0,
        }
    }
}

impl<L: MotorChannel, R: MotorChannel> DistanceSource for DisturbancePair<L, R> {
    fn progress(&mut self) -> f64 {
        self.refresh_active();
        match self.active {
            Some(index) => {
                let side = self.disturbances[index].side;
                self.reading(side)
            }
            None => (self.reading(Side::Left) + self.reading(Side::Right)) / 2.0,
        }
    }

    fn avg_velocity(&mut self) -> f64 {
        (self.left.velocity() + self.right.velocity()) / 2.0
    }

    fn controller_set(&mut self, vel: f64) {
        let left_cap = self.cap(Side::Left);
        let right_cap = self.cap(Side::Right);
        self.left.set_output(vel * left_cap);
        self.right.set_output(vel * right_cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::tests::ScriptChannel;

    fn swerve(side: Side, left_cap: f64, right_cap: f64, activation: f64) -> PathDisturbance {
        PathDisturbance {
            side,
            left_cap,
            right_cap,
            activation,
            lower: 0.1,
            sustain: 0.2,
            resume: 0.1,
        }
    }

    impl<'l, 'r> DisturbancePair<&'l mut ScriptChannel, &'r mut ScriptChannel> {
        fn set_both(&mut self, pos: f64) {
            self.left.position = pos;
            self.right.position = pos;
        }
    }

    #[test]
    fn disturbance_activates_at_most_once() {
        let mut left = ScriptChannel::default();
        let mut right = ScriptChannel::default();
        let mut pair = DisturbancePair::new(
            &mut left,
            &mut right,
            vec![swerve(Side::Left, 1.0, 0.5, 1.0)],
            4.0,
        );

        pair.set_both(1.1);
        pair.progress();
        assert_eq!(pair.active, Some(0));

        // Past the window, deactivates.
        pair.set_both(1.5);
        pair.progress();
        assert_eq!(pair.active, None);

        // Oscillating back into the window must not re-activate.
        pair.set_both(1.2);
        pair.progress();
        assert_eq!(pair.active, None);
    }

    #[test]
    fn progress_is_continuous_across_deactivation() {
        let mut left = ScriptChannel::default();
        let mut right = ScriptChannel::default();
        let mut pair = DisturbancePair::new(
            &mut left,
            &mut right,
            vec![swerve(Side::Left, 1.0, 0.5, 1.0)],
            4.0,
        );

        pair.set_both(1.2);
        pair.progress();
        assert_eq!(pair.active, Some(0));

        // The capped right side falls behind while the disturbance is
        // active; progress follows the dominant left side.
        pair.left.position = 1.39;
        pair.right.position = 1.2;
        let before = pair.progress();
        assert!((before - 1.39).abs() < 1e-9);

        // One tick later the window is passed and the right offset is
        // resynchronized; the averaged progress must not jump.
        pair.left.position = 1.41;
        pair.right.position = 1.21;
        let after = pair.progress();
        assert_eq!(pair.active, None);
        assert!(
            (after - before).abs() < 0.05,
            "progress jumped from {} to {}",
            before,
            after
        );
    }

    #[test]
    fn negative_activation_resolves_against_total_distance() {
        let mut left = ScriptChannel::default();
        let mut right = ScriptChannel::default();
        let pair = DisturbancePair::new(
            &mut left,
            &mut right,
            vec![swerve(Side::Left, 1.0, 0.5, -1.0)],
            4.0,
        );
        assert!((pair.disturbances[0].activation - 3.0).abs() < 1e-9);
    }

    #[test]
    fn activation_keys_off_absolute_position() {
        let mut left = ScriptChannel::default();
        let mut right = ScriptChannel::default();
        let mut pair = DisturbancePair::new(
            &mut left,
            &mut right,
            vec![swerve(Side::Left, 1.0, 0.5, 1.0)],
            4.0,
        );

        // Reverse travel enters the window by absolute value.
        pair.set_both(-1.2);
        pair.progress();
        assert_eq!(pair.active, Some(0));
    }

    #[test]
    fn opposite_side_disturbances_activate_in_turn() {
        let mut left = ScriptChannel::default();
        let mut right = ScriptChannel::default();
        let mut pair = DisturbancePair::new(
            &mut left,
            &mut right,
            vec![
                swerve(Side::Left, 1.0, 0.5, 1.0),
                swerve(Side::Right, 0.5, 1.0, 3.0),
            ],
            4.0,
        );

        pair.set_both(0.5);
        pair.progress();
        assert_eq!(pair.active, None);
        pair.controller_set(1.0);
        assert_eq!(pair.left.last_output, 1.0);
        assert_eq!(pair.right.last_output, 1.0);

        // Into the first window's sustain phase, right side capped.
        pair.set_both(1.2);
        pair.progress();
        assert_eq!(pair.active, Some(0));
        pair.controller_set(1.0);
        assert_eq!(pair.left.last_output, 1.0);
        assert!((pair.right.last_output - 0.5).abs() < 1e-9);
        pair.left.velocity = 1.0;
        pair.right.velocity = 0.5;
        assert!((pair.avg_velocity() - 0.75).abs() < 1e-9);

        // Between windows, both sides at full speed again.
        pair.set_both(2.0);
        pair.progress();
        assert_eq!(pair.active, None);
        pair.controller_set(1.0);
        assert_eq!(pair.right.last_output, 1.0);

        // Second window's sustain phase, left side capped this time.
        pair.set_both(3.2);
        pair.progress();
        assert_eq!(pair.active, Some(1));
        pair.controller_set(1.0);
        assert!((pair.left.last_output - 0.5).abs() < 1e-9);
        assert_eq!(pair.right.last_output, 1.0);
    }

    #[test]
    fn caps_interpolate_through_the_window_phases() {
        let d = swerve(Side::Left, 1.0, 0.5, 1.0);

        assert!((d.cap_for(Side::Right, 0.0) - 1.0).abs() < 1e-9);
        assert!((d.cap_for(Side::Right, 0.05) - 0.75).abs() < 1e-9);
        assert!((d.cap_for(Side::Right, 0.1) - 0.5).abs() < 1e-9);
        assert!((d.cap_for(Side::Right, 0.25) - 0.5).abs() < 1e-9);
        assert!((d.cap_for(Side::Right, 0.35) - 0.75).abs() < 1e-9);
        assert!((d.cap_for(Side::Right, 0.5) - 1.0).abs() < 1e-9);
        assert!((d.cap_for(Side::Left, 0.2) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn caps_beyond_unit_range_interpolate_generically() {
        let mut d = swerve(Side::Left, 1.3, -0.5, 0.0);
        d.lower = 0.2;

        assert!((d.cap_for(Side::Left, 0.1) - 1.15).abs() < 1e-9);
        assert!((d.cap_for(Side::Right, 0.25) - -0.5).abs() < 1e-9);
    }
}
