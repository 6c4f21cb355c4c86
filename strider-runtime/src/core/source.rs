// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

/// A single motor group as seen by the control loop.
///
/// Readings are in output-shaft revolutions and revolutions per
/// second; `set_output` takes a normalized command in [-1, 1] scaled
/// by the channel behind it.
pub trait MotorChannel {
    /// Current position of the channel.
    fn position(&mut self) -> f64;

    /// Current measured velocity of the channel.
    fn velocity(&mut self) -> f64;

    /// Command the channel output.
    fn set_output(&mut self, value: f64);
}

impl<M: MotorChannel + ?Sized> MotorChannel for &mut M {
    fn position(&mut self) -> f64 {
        (**self).position()
    }

    fn velocity(&mut self) -> f64 {
        (**self).velocity()
    }

    fn set_output(&mut self, value: f64) {
        (**self).set_output(value)
    }
}

/// Progress feedback and actuation for one motion command.
///
/// Decouples the tracking loop from the actuator pairing behind it. A
/// source is constructed at the start of a command with its encoders
/// tared to zero and discarded when the command completes.
pub trait DistanceSource {
    /// Tracked progress since construction.
    fn progress(&mut self) -> f64;

    /// Current measured velocity over the tracked axis.
    fn avg_velocity(&mut self) -> f64;

    /// Command the output velocity, normalized.
    fn controller_set(&mut self, vel: f64);
}

/// Two motor groups driven in lockstep, progress averaged over both.
pub struct DirectPair<L, R> {
    left: L,
    right: R,
    left_zero: f64,
    right_zero: f64,
}

impl<L: MotorChannel, R: MotorChannel> DirectPair<L, R> {
    pub fn new(mut left: L, mut right: R) -> Self {
        let left_zero = left.position();
        let right_zero = right.position();
        Self {
            left,
            right,
            left_zero,
            right_zero,
        }
    }
}

impl<L: MotorChannel, R: MotorChannel> DistanceSource for DirectPair<L, R> {
    fn progress(&mut self) -> f64 {
        let l = self.left.position() - self.left_zero;
        let r = self.right.position() - self.right_zero;
        (l + r) / 2.0
    }

    fn avg_velocity(&mut self) -> f64 {
        (self.left.velocity() + self.right.velocity()) / 2.0
    }

    fn controller_set(&mut self, vel: f64) {
        self.left.set_output(vel);
        self.right.set_output(vel);
    }
}

/// A single motor group or sensor axis.
pub struct SingleAxis<M> {
    channel: M,
    zero: f64,
}

impl<M: MotorChannel> SingleAxis<M> {
    pub fn new(mut channel: M) -> Self {
        let zero = channel.position();
        Self { channel, zero }
    }
}

impl<M: MotorChannel> DistanceSource for SingleAxis<M> {
    fn progress(&mut self) -> f64 {
        self.channel.position() - self.zero
    }

    fn avg_velocity(&mut self) -> f64 {
        self.channel.velocity()
    }

    fn controller_set(&mut self, vel: f64) {
        self.channel.set_output(vel);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Channel whose readings are set directly by the test.
    #[derive(Default)]
    pub(crate) struct ScriptChannel {
        pub position: f64,
        pub velocity: f64,
        pub last_output: f64,
    }

    impl MotorChannel for ScriptChannel {
        fn position(&mut self) -> f64 {
            self.position
        }

        fn velocity(&mut self) -> f64 {
            self.velocity
        }

        fn set_output(&mut self, value: f64) {
            self.last_output = value;
        }
    }

    #[test]
    fn direct_pair_tares_and_averages() {
        let mut left = ScriptChannel {
            position: 5.0,
            ..Default::default()
        };
        let mut right = ScriptChannel {
            position: -2.0,
            ..Default::default()
        };

        let mut pair = DirectPair::new(&mut left, &mut right);
        assert_eq!(pair.progress(), 0.0);

        pair.controller_set(0.5);
        drop(pair);
        assert_eq!(left.last_output, 0.5);
        assert_eq!(right.last_output, 0.5);

        left.position = 7.0;
        right.position = 1.0;
        let mut pair = DirectPair {
            left: &mut left,
            right: &mut right,
            left_zero: 5.0,
            right_zero: -2.0,
        };
        assert_eq!(pair.progress(), 2.5);
    }

    #[test]
    fn single_axis_tracks_from_zero() {
        let mut channel = ScriptChannel {
            position: 3.0,
            velocity: 1.5,
            ..Default::default()
        };
        let mut axis = SingleAxis::new(&mut channel);
        assert_eq!(axis.progress(), 0.0);
        assert_eq!(axis.avg_velocity(), 1.5);

        axis.channel.position = 4.25;
        assert_eq!(axis.progress(), 1.25);
    }
}
