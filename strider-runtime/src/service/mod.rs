// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tabu::{help, Bus, Message};
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

use crate::config::Config;
use crate::core::{DirectPair, DistanceSource, DisturbancePair, PathDisturbance, Side};
use crate::driver::VirtualMotor;
use crate::math::{PidController, SCurve};
use crate::runtime::{FollowReport, FollowSettings, MotionExecutor, Sample, Tail, TrackOutcome};

/// The robot's actuators, shared between services.
///
/// The drive mutex serializes motion commands; a service holds it for
/// the full duration of its run.
pub struct Robot {
    pub drive: Mutex<DrivePair>,
}

pub struct DrivePair {
    pub left: VirtualMotor,
    pub right: VirtualMotor,
}

impl Robot {
    pub fn new(config: &Config) -> Self {
        let max = config.drive.max_velocity();
        let rate = config.drive.responsiveness;
        Self {
            drive: Mutex::new(DrivePair {
                left: VirtualMotor::new(max, rate),
                right: VirtualMotor::new(max, rate),
            }),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisturbanceRequest {
    side: String,
    left_cap: f64,
    right_cap: f64,
    activation: f64,
    lower: f64,
    sustain: f64,
    resume: f64,
}

impl DisturbanceRequest {
    fn resolve(self) -> Option<PathDisturbance> {
        let side = match self.side.as_str() {
            "left" => Side::Left,
            "right" => Side::Right,
            _ => return None,
        };
        Some(PathDisturbance {
            side,
            left_cap: self.left_cap,
            right_cap: self.right_cap,
            activation: self.activation,
            lower: self.lower,
            sustain: self.sustain,
            resume: self.resume,
        })
    }
}

fn outcome_name(outcome: &TrackOutcome) -> &'static str {
    match outcome {
        TrackOutcome::Completed => "completed",
        TrackOutcome::EarlyStop { .. } => "earlyStop",
        TrackOutcome::DeadlineExceeded => "deadlineExceeded",
    }
}

fn report_to_json(report: &FollowReport) -> Value {
    json!({
        "graphable": report.samples,
        "finalVel": report.final_velocity,
        "outcome": outcome_name(&report.outcome),
    })
}

fn missing(key: &str) -> Value {
    json!({ "error": format!("missing or invalid parameter '{}'", key) })
}

/// Register every operator service on the bus.
pub fn install(bus: &Bus, robot: Arc<Robot>, config: &Config) {
    ping(bus);
    encoders(bus, Arc::clone(&robot));
    pid_test(bus, Arc::clone(&robot), config.clone());
    follower_test(bus, Arc::clone(&robot), config.clone());
    follower_max_test(bus, robot, config.clone());
}

/// Liveness check, echoes the payload back.
fn ping(bus: &Bus) {
    bus.serve("ping", |msg: Message| async move { msg.content });
    bus.help("ping", json!([help::label("Check the link")]));
}

/// Raw encoder readings for both drive sides.
fn encoders(bus: &Bus, robot: Arc<Robot>) {
    bus.serve("enc", move |_msg| {
        let robot = Arc::clone(&robot);
        async move {
            use crate::core::MotorChannel;
            let mut drive = robot.drive.lock().await;
            json!({
                "left": drive.left.position(),
                "right": drive.right.position(),
            })
        }
    });
    bus.help("enc", json!([help::label("Read the drive encoders")]));
}

/// Drive forward twenty revolutions under a PID controller built from
/// the message parameters, and return the sampled run.
fn pid_test(bus: &Bus, robot: Arc<Robot>, config: Config) {
    bus.serve("pid_test", move |msg: Message| {
        let robot = Arc::clone(&robot);
        let config = config.clone();
        async move {
            let (Some(kp), Some(ki), Some(kd), Some(bias)) = (
                msg.number("kP"),
                msg.number("kI"),
                msg.number("kD"),
                msg.number("kBias"),
            ) else {
                return missing("kP/kI/kD/kBias");
            };
            let Some(ms) = msg.integer("ms").filter(|ms| *ms > 0) else {
                return missing("ms");
            };

            let duration = Duration::from_millis(ms as u64);
            let mut controller = PidController::new(kp, ki, kd, bias, config.tick_interval);
            controller.set_target(config.drive.revolutions_to_inches(20.0));

            let executor = MotionExecutor::new(config.tick_interval, duration);
            let mut drive = robot.drive.lock().await;
            let drive = &mut *drive;
            let mut source = DirectPair::new(&mut drive.left, &mut drive.right);
            let samples = executor
                .track_position(&mut controller, &mut source, duration)
                .await;

            json!({ "graphable": samples })
        }
    });
    bus.help(
        "pid_test",
        json!([
            help::label("Do a PID test"),
            help::number("kP"),
            help::number("kI"),
            help::number("kD"),
            help::number("kBias"),
            help::number("ms"),
            help::reply_action("graph(it.graphable)"),
        ]),
    );
}

/// Follow an s-curve built from the message parameters, optionally
/// with path disturbances, and return the sampled run.
fn follower_test(bus: &Bus, robot: Arc<Robot>, config: Config) {
    bus.serve("follower.test", move |msg: Message| {
        let robot = Arc::clone(&robot);
        let config = config.clone();
        async move {
            let (Some(pos), Some(vel), Some(acc), Some(jrk)) = (
                msg.number("pos"),
                msg.number("vel"),
                msg.number("acc"),
                msg.number("jrk"),
            ) else {
                return missing("pos/vel/acc/jrk");
            };
            let (Some(kv), Some(ka)) = (msg.number("kV"), msg.number("kA")) else {
                return missing("kV/kA");
            };

            let curve = match SCurve::new(vel, acc, jrk, pos) {
                Ok(curve) => curve,
                Err(err) => return json!({ "error": err.to_string() }),
            };

            let disturbances: Vec<PathDisturbance> = match msg.content.get("disturbances") {
                Some(raw) => {
                    let requests: Vec<DisturbanceRequest> =
                        match serde_json::from_value(raw.clone()) {
                            Ok(requests) => requests,
                            Err(_) => return missing("disturbances"),
                        };
                    let mut list = Vec::with_capacity(requests.len());
                    for request in requests {
                        match request.resolve() {
                            Some(d) => list.push(d),
                            None => return missing("disturbances.side"),
                        }
                    }
                    list
                }
                None => Vec::new(),
            };

            let settings = FollowSettings {
                kv,
                ka,
                begin_tail: Tail::ByDist(1.0),
                end_tail: Tail::ByVel(config.drive.revolutions_to_inches(0.4)),
                feedback: msg.boolean("feedbackEnabled").unwrap_or(true),
                stop_on_finish: msg.boolean("stopOnFinish").unwrap_or(false),
            };

            let executor = MotionExecutor::new(config.tick_interval, crate::consts::MOTION_DEADLINE);
            let mut drive = robot.drive.lock().await;
            let drive = &mut *drive;
            let report = if disturbances.is_empty() {
                let mut source = DirectPair::new(&mut drive.left, &mut drive.right);
                executor.follow_profile(&curve, &mut source, &settings).await
            } else {
                let mut source =
                    DisturbancePair::new(&mut drive.left, &mut drive.right, disturbances, pos);
                executor.follow_profile(&curve, &mut source, &settings).await
            };
            info!(
                "follower.test over {} finished: {}",
                pos,
                outcome_name(&report.outcome)
            );

            report_to_json(&report)
        }
    });
    bus.help(
        "follower.test",
        json!([
            help::label("Follow an s-curve"),
            help::number("pos"),
            help::number("vel"),
            help::number("acc"),
            help::number("jrk"),
            help::number("kV"),
            help::number("kA"),
            help::boolean("stopOnFinish"),
            help::boolean("feedbackEnabled"),
            help::reply_action("graph(it.graphable)"),
        ]),
    );
}

/// Record the drive's spin-up and coast-down at full command, for
/// measuring the velocity feed-forward constant.
fn follower_max_test(bus: &Bus, robot: Arc<Robot>, config: Config) {
    bus.serve("follower.max_test", move |_msg| {
        let robot = Arc::clone(&robot);
        let config = config.clone();
        async move {
            let mut drive = robot.drive.lock().await;
            let drive = &mut *drive;
            let mut source = DirectPair::new(&mut drive.left, &mut drive.right);
            let samples = record_motor_max(
                &mut source,
                config.tick_interval,
                config.drive.revolutions_to_inches(5.0 / 60.0),
            )
            .await;
            json!({ "graphable": samples })
        }
    });
    bus.help(
        "follower.max_test",
        json!([
            help::label("Record the drive's maximum velocity"),
            help::reply_action("graph(it.graphable)"),
        ]),
    );
}

/// Full command for one second, then coast until the measured velocity
/// falls below `rest_vel`, sampling every tick.
async fn record_motor_max<S: DistanceSource>(
    source: &mut S,
    tick: Duration,
    rest_vel: f64,
) -> Vec<Sample> {
    let start = Instant::now();
    let mut ticker = time::interval(tick);
    let mut samples = Vec::new();

    source.controller_set(1.0);
    loop {
        let vel = source.avg_velocity().abs();
        if vel <= rest_vel && start.elapsed() >= Duration::from_millis(500) {
            break;
        }
        samples.push(Sample {
            time: start.elapsed().as_secs_f64(),
            disp: source.progress(),
            c_vel: 0.0,
            m_vel: vel,
            d_vel: 0.0,
        });
        if start.elapsed() >= Duration::from_secs(1) {
            source.controller_set(0.0);
        }
        ticker.tick().await;
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn max_test_records_spin_up_and_coast_down() {
        let mut motor = VirtualMotor::new(10.0, 8.0);
        let mut source = crate::core::SingleAxis::new(&mut motor);

        let samples = record_motor_max(&mut source, Duration::from_millis(10), 0.5).await;

        assert!(!samples.is_empty());
        let peak = samples.iter().map(|s| s.m_vel).fold(0.0, f64::max);
        assert!(peak > 9.0, "never reached full speed, peak {}", peak);
        // The loop stops at the first reading at or below the rest
        // threshold, so the final recorded sample sits just above it.
        assert!(samples.last().unwrap().m_vel < 1.0);
    }

    #[test]
    fn disturbance_request_resolves_sides() {
        let raw = json!({
            "side": "right",
            "leftCap": 0.5,
            "rightCap": 1.0,
            "activation": -1.0,
            "lower": 0.1,
            "sustain": 0.2,
            "resume": 0.1,
        });
        let request: DisturbanceRequest = serde_json::from_value(raw).unwrap();
        let d = request.resolve().unwrap();
        assert_eq!(d.side, Side::Right);
        assert_eq!(d.left_cap, 0.5);

        let raw = json!({
            "side": "up",
            "leftCap": 0.5,
            "rightCap": 1.0,
            "activation": 0.0,
            "lower": 0.0,
            "sustain": 0.0,
            "resume": 0.0,
        });
        let request: DisturbanceRequest = serde_json::from_value(raw).unwrap();
        assert!(request.resolve().is_none());
    }
}
