// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use std::time::Duration;

use serde::Serialize;
use tokio::time::{self, Instant};

use crate::core::DistanceSource;
use crate::math::{PidController, SCurve};

/// Exit condition for one stage of a profile follow.
#[derive(Debug, Clone, Copy)]
pub enum Tail {
    /// Elapsed (or predicted remaining) seconds exceed the threshold.
    ByTime(f64),
    /// Measured velocity exceeds the threshold.
    ByVel(f64),
    /// Tracked displacement exceeds the threshold.
    ByDist(f64),
}

impl Tail {
    pub fn satisfied_by(&self, elapsed: f64, vel: f64, pos: f64) -> bool {
        match *self {
            Self::ByTime(loc) => elapsed > loc,
            Self::ByVel(loc) => vel > loc,
            Self::ByDist(loc) => pos > loc,
        }
    }
}

/// How a tracking loop ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackOutcome {
    /// The profile was followed to its full duration.
    Completed,
    /// Target displacement was reached before the profile ended.
    EarlyStop { final_velocity: f64 },
    /// The wall-clock deadline elapsed first.
    DeadlineExceeded,
}

/// One tick of a profile follow, for operator-console graphing.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub time: f64,
    pub disp: f64,
    /// Velocity the profile asked for.
    pub c_vel: f64,
    /// Velocity the drive measured.
    pub m_vel: f64,
    /// Velocity actually commanded, after feed-forward gains.
    pub d_vel: f64,
}

/// One tick of a PID tracking run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PidSample {
    /// Milliseconds since the run started.
    pub time: f64,
    pub error: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub step: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct FollowSettings {
    /// Feed-forward gain from profile velocity to normalized output.
    pub kv: f64,
    /// Feed-forward gain from profile acceleration.
    pub ka: f64,
    /// Stage one runs on elapsed time until this is satisfied.
    pub begin_tail: Tail,
    /// Stage two runs while this holds, fed predicted time remaining,
    /// measured velocity and remaining distance.
    pub end_tail: Tail,
    /// Re-derive the profile clock from measured displacement during
    /// stage two instead of trusting elapsed time.
    pub feedback: bool,
    /// Stop and report early once displacement passes the target.
    pub stop_on_finish: bool,
}

#[derive(Debug)]
pub struct FollowReport {
    pub outcome: TrackOutcome,
    pub samples: Vec<Sample>,
    /// Measured velocity at loop exit, whatever the outcome.
    pub final_velocity: f64,
}

/// Drives one motion command to completion over a fixed tick.
///
/// The executor is the only component that commands actuators; each
/// tick reads progress, computes an output and writes it back before
/// sleeping out the remainder of the period. Every run is bounded by a
/// wall-clock deadline.
pub struct MotionExecutor {
    tick: Duration,
    deadline: Duration,
}

struct Follower<'a, S> {
    curve: &'a SCurve,
    source: &'a mut S,
    kv: f64,
    ka: f64,
    stop_on_finish: bool,
    start: Instant,
    samples: Vec<Sample>,
    last_used_time: f64,
}

impl<S: DistanceSource> Follower<'_, S> {
    fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn velocity_for_displacement(&mut self, disp: f64) -> f64 {
        self.curve.velocity_at(self.curve.time_for_position(disp))
    }

    fn predicted_time_remaining(&self) -> f64 {
        self.curve.total_duration() - self.last_used_time
    }

    /// Command the output for profile time `t` and record a sample.
    /// Returns the measured velocity if the run should stop early.
    fn drive_for_time(&mut self, t: f64) -> Option<f64> {
        let c_vel = self.curve.velocity_at(t);
        let acc = self.curve.acceleration_at(t);
        let d_vel = c_vel * self.kv + acc * self.ka;
        self.source.controller_set(d_vel);

        let disp = self.source.progress();
        let m_vel = self.source.avg_velocity();
        self.samples.push(Sample {
            time: self.elapsed(),
            disp,
            c_vel,
            m_vel,
            d_vel,
        });
        self.last_used_time = t;

        if self.stop_on_finish && disp > self.curve.distance() {
            self.source.controller_set(0.0);
            return Some(m_vel);
        }
        None
    }

    fn into_report(mut self, outcome: TrackOutcome) -> FollowReport {
        let final_velocity = self.source.avg_velocity();
        self.source.controller_set(0.0);
        FollowReport {
            outcome,
            samples: self.samples,
            final_velocity,
        }
    }
}

impl MotionExecutor {
    pub fn new(tick: Duration, deadline: Duration) -> Self {
        Self { tick, deadline }
    }

    /// Follow `curve` with feed-forward output and a three-stage
    /// clock: elapsed time until the begin tail is satisfied, then
    /// either elapsed time or the profile-inverse of measured
    /// displacement while the end tail holds, then elapsed time again
    /// until the profile is exhausted.
    pub async fn follow_profile<S: DistanceSource>(
        &self,
        curve: &SCurve,
        source: &mut S,
        settings: &FollowSettings,
    ) -> FollowReport {
        let mut ticker = time::interval(self.tick);
        let mut follower = Follower {
            curve,
            source,
            kv: settings.kv,
            ka: settings.ka,
            stop_on_finish: settings.stop_on_finish,
            start: Instant::now(),
            samples: Vec::new(),
            last_used_time: 0.0,
        };

        loop {
            if follower.start.elapsed() >= self.deadline {
                warn!("follow deadline exceeded in spin-up stage");
                return follower.into_report(TrackOutcome::DeadlineExceeded);
            }
            let elapsed = follower.elapsed();
            let vel = follower.source.avg_velocity();
            let disp = follower.source.progress();
            // A velocity tail can be fooled by sensor noise at
            // standstill; require the profile itself to have reached
            // the threshold as well.
            let undershoot = matches!(settings.begin_tail, Tail::ByVel(loc)
                if loc > follower.velocity_for_displacement(disp));
            if settings.begin_tail.satisfied_by(elapsed, vel, disp) && !undershoot {
                break;
            }
            if let Some(final_velocity) = follower.drive_for_time(elapsed) {
                return follower.into_report(TrackOutcome::EarlyStop { final_velocity });
            }
            ticker.tick().await;
        }

        let mut last_curve_time = follower.last_used_time;
        let mut last_real_time = follower.elapsed();
        loop {
            if follower.start.elapsed() >= self.deadline {
                warn!("follow deadline exceeded in tracking stage");
                return follower.into_report(TrackOutcome::DeadlineExceeded);
            }
            let remaining = follower.predicted_time_remaining();
            let vel = follower.source.avg_velocity();
            let disp = follower.source.progress();
            if !settings
                .end_tail
                .satisfied_by(remaining, vel, curve.distance() - disp)
            {
                break;
            }
            last_real_time = follower.elapsed();
            last_curve_time = if settings.feedback {
                curve.time_for_position(disp)
            } else {
                last_real_time
            };
            if let Some(final_velocity) = follower.drive_for_time(last_curve_time) {
                return follower.into_report(TrackOutcome::EarlyStop { final_velocity });
            }
            ticker.tick().await;
        }

        loop {
            if follower.start.elapsed() >= self.deadline {
                warn!("follow deadline exceeded in run-out stage");
                return follower.into_report(TrackOutcome::DeadlineExceeded);
            }
            let t = last_curve_time + follower.elapsed() - last_real_time;
            if t >= curve.total_duration() {
                break;
            }
            if let Some(final_velocity) = follower.drive_for_time(t) {
                return follower.into_report(TrackOutcome::EarlyStop { final_velocity });
            }
            ticker.tick().await;
        }

        follower.into_report(TrackOutcome::Completed)
    }

    /// Replay `curve` open loop on elapsed time alone.
    pub async fn replay_profile<S: DistanceSource>(
        &self,
        curve: &SCurve,
        source: &mut S,
        kv: f64,
        ka: f64,
    ) -> FollowReport {
        let mut ticker = time::interval(self.tick);
        let mut follower = Follower {
            curve,
            source,
            kv,
            ka,
            stop_on_finish: false,
            start: Instant::now(),
            samples: Vec::new(),
            last_used_time: 0.0,
        };

        loop {
            if follower.start.elapsed() >= self.deadline {
                return follower.into_report(TrackOutcome::DeadlineExceeded);
            }
            let t = follower.elapsed();
            if t >= curve.total_duration() {
                break;
            }
            let _ = follower.drive_for_time(t);
            ticker.tick().await;
        }

        follower.into_report(TrackOutcome::Completed)
    }

    /// Track the controller's target with pure PID output for
    /// `duration`, sampling every tick.
    pub async fn track_position<S: DistanceSource>(
        &self,
        controller: &mut PidController,
        source: &mut S,
        duration: Duration,
    ) -> Vec<PidSample> {
        let mut ticker = time::interval(self.tick);
        let start = Instant::now();
        let mut samples = Vec::new();

        while start.elapsed() < duration {
            let step = controller.step(source.progress());
            samples.push(PidSample {
                time: start.elapsed().as_secs_f64() * 1000.0,
                error: controller.error(),
                p: controller.proportional_term(),
                i: controller.integral_term(),
                d: controller.derivative_term(),
                step,
            });
            source.controller_set(step);
            ticker.tick().await;
        }
        source.controller_set(0.0);
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DirectPair, SingleAxis};
    use crate::driver::VirtualMotor;

    const TICK: Duration = Duration::from_millis(10);

    fn settings(kv: f64) -> FollowSettings {
        FollowSettings {
            kv,
            ka: 0.0,
            begin_tail: Tail::ByDist(0.1),
            end_tail: Tail::ByVel(2.0),
            feedback: true,
            stop_on_finish: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn follow_covers_the_distance() {
        let executor = MotionExecutor::new(TICK, Duration::from_secs(10));
        let curve = SCurve::new(10.0, 5.0, 2.0, 3.0).unwrap();
        let left = VirtualMotor::new(20.0, 50.0);
        let right = VirtualMotor::new(20.0, 50.0);
        let mut source = DirectPair::new(left, right);

        let report = executor
            .follow_profile(&curve, &mut source, &settings(1.0 / 20.0))
            .await;

        assert_eq!(report.outcome, TrackOutcome::Completed);
        assert!(!report.samples.is_empty());
        assert!(
            (source.progress() - 3.0).abs() < 0.5,
            "covered {} of 3.0",
            source.progress()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn follow_respects_the_deadline() {
        let executor = MotionExecutor::new(TICK, Duration::from_millis(50));
        let curve = SCurve::new(10.0, 5.0, 2.0, 40.0).unwrap();
        let mut source = SingleAxis::new(VirtualMotor::new(20.0, 50.0));

        let report = executor
            .follow_profile(&curve, &mut source, &settings(1.0 / 20.0))
            .await;

        assert_eq!(report.outcome, TrackOutcome::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn overdriven_follow_stops_early() {
        let executor = MotionExecutor::new(TICK, Duration::from_secs(10));
        let curve = SCurve::new(10.0, 5.0, 2.0, 3.0).unwrap();
        let mut source = SingleAxis::new(VirtualMotor::new(20.0, 50.0));

        // Double feed-forward overshoots the target displacement well
        // before the profile runs out.
        let mut overdriven = settings(2.0 / 20.0);
        overdriven.stop_on_finish = true;

        let report = executor.follow_profile(&curve, &mut source, &overdriven).await;
        assert!(matches!(report.outcome, TrackOutcome::EarlyStop { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn replay_runs_the_profile_clock_out() {
        let executor = MotionExecutor::new(TICK, Duration::from_secs(10));
        let curve = SCurve::new(10.0, 5.0, 2.0, 3.0).unwrap();
        let mut source = SingleAxis::new(VirtualMotor::new(20.0, 50.0));

        let report = executor
            .replay_profile(&curve, &mut source, 1.0 / 20.0, 0.0)
            .await;

        assert_eq!(report.outcome, TrackOutcome::Completed);
        let last = report.samples.last().unwrap();
        assert!(last.time >= curve.total_duration() - 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn pid_tracking_converges_on_the_target() {
        let executor = MotionExecutor::new(TICK, Duration::from_secs(4));
        let mut controller = PidController::new(2.0, 0.0, 0.0, 0.0, TICK);
        controller.set_target(1.0);
        let mut source = SingleAxis::new(VirtualMotor::new(5.0, 20.0));

        let samples = executor
            .track_position(&mut controller, &mut source, Duration::from_secs(4))
            .await;

        assert!(!samples.is_empty());
        assert!(
            (source.progress() - 1.0).abs() < 0.1,
            "settled at {}",
            source.progress()
        );
        assert!(samples.last().unwrap().error.abs() < 0.1);
    }
}
