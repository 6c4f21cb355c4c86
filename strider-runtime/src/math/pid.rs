// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use std::collections::VecDeque;
use std::time::Duration;

/// Windowed moving-average filter.
///
/// Smooths the raw per-tick derivative before it is scaled by the
/// derivative gain, so a single noisy encoder sample cannot spike the
/// control output.
#[derive(Debug, Clone)]
pub struct AverageFilter {
    window: VecDeque<f64>,
    capacity: usize,
}

impl AverageFilter {
    /// Construct the filter over the last `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Feed the next value to the filter, then return the window average.
    pub fn fit(&mut self, value: f64) -> f64 {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Discard all history.
    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// Iterative position PID controller.
///
/// Constructed fresh for every motion command. The controller runs at
/// the fixed motion tick; `step` is called once per tick with the
/// current measurement and returns the clamped control output.
#[derive(Debug, Clone)]
pub struct PidController {
    /// Proportional gain.
    kp: f64,
    /// Integral gain.
    ki: f64,
    /// Derivative gain.
    kd: f64,
    /// Constant output offset.
    bias: f64,
    /// Target value.
    target: f64,
    /// Integral of error.
    integral: f64,
    /// Last error value.
    last_error: f64,
    /// Last filtered derivative, kept for telemetry.
    last_derivative: f64,
    /// Output clamp.
    lower_limit: f64,
    upper_limit: f64,
    /// Derivative smoothing filter.
    filter: AverageFilter,
    /// Tick period in seconds.
    dt: f64,
    disabled: bool,
}

impl PidController {
    /// Default derivative filter window.
    const FILTER_WINDOW: usize = 2;

    /// Construct a controller with the given gains, running at `tick`.
    pub fn new(kp: f64, ki: f64, kd: f64, bias: f64, tick: Duration) -> Self {
        Self {
            kp,
            ki,
            kd,
            bias,
            target: 0.0,
            integral: 0.0,
            last_error: 0.0,
            last_derivative: 0.0,
            lower_limit: -1.0,
            upper_limit: 1.0,
            filter: AverageFilter::new(Self::FILTER_WINDOW),
            dt: tick.as_secs_f64(),
            disabled: false,
        }
    }

    /// Replace the derivative smoothing filter window.
    pub fn with_filter_window(mut self, capacity: usize) -> Self {
        self.filter = AverageFilter::new(capacity);
        self
    }

    /// Set the target value.
    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    /// Set the output clamp. Arguments may come in either order.
    pub fn set_output_limits(&mut self, max: f64, min: f64) {
        if min > max {
            self.lower_limit = max;
            self.upper_limit = min;
        } else {
            self.lower_limit = min;
            self.upper_limit = max;
        }
    }

    /// Advance the controller one tick and return the control output.
    ///
    /// The output is always within the configured clamp. While
    /// disabled the controller holds zero output and accumulates
    /// nothing.
    pub fn step(&mut self, measurement: f64) -> f64 {
        if self.disabled {
            return 0.0;
        }

        let error = self.target - measurement;

        self.integral += error * self.dt;
        let derivative = self.filter.fit((error - self.last_error) / self.dt);
        self.last_error = error;
        self.last_derivative = derivative;

        let output =
            self.kp * error + self.ki * self.integral + self.kd * derivative + self.bias;
        output.clamp(self.lower_limit, self.upper_limit)
    }

    /// Last computed error.
    pub fn error(&self) -> f64 {
        self.last_error
    }

    /// Proportional contribution of the last step.
    pub fn proportional_term(&self) -> f64 {
        self.kp * self.last_error
    }

    /// Integral contribution of the last step.
    pub fn integral_term(&self) -> f64 {
        self.ki * self.integral
    }

    /// Derivative contribution of the last step.
    pub fn derivative_term(&self) -> f64 {
        self.kd * self.last_derivative
    }

    /// Clear the integral, error and filter history.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_derivative = 0.0;
        self.filter.reset();
    }

    /// Disable or enable the controller.
    ///
    /// The disabled-to-enabled transition resets accumulated state so
    /// the idle interval cannot produce windup or a derivative spike.
    pub fn flip_disable(&mut self, disabled: bool) {
        if self.disabled && !disabled {
            self.reset();
        }
        self.disabled = disabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(10);

    #[test]
    fn output_is_always_clamped() {
        let mut controller = PidController::new(10.0, 5.0, 2.0, 0.5, TICK);
        controller.set_output_limits(1.0, -1.0);
        controller.set_target(100.0);

        for measurement in [-50.0, 0.0, 25.0, 200.0, -200.0, 99.9] {
            let output = controller.step(measurement);
            assert!((-1.0..=1.0).contains(&output), "output {} out of clamp", output);
        }
    }

    #[test]
    fn proportional_only_tracks_error() {
        // kP = 1, all else zero: output equals the error exactly.
        let mut controller = PidController::new(1.0, 0.0, 0.0, 0.0, TICK);
        controller.set_output_limits(1000.0, -1000.0);
        controller.set_target(10.0);

        for _ in 0..3 {
            assert_eq!(controller.step(0.0), 10.0);
        }
    }

    #[test]
    fn zero_gains_output_bias() {
        let mut controller = PidController::new(0.0, 0.0, 0.0, 0.25, TICK);
        controller.set_target(42.0);

        assert_eq!(controller.step(0.0), 0.25);

        controller.set_output_limits(0.1, -0.1);
        assert_eq!(controller.step(0.0), 0.1);
    }

    #[test]
    fn reenable_matches_fresh_controller() {
        let mut seasoned = PidController::new(0.8, 0.4, 0.2, 0.0, TICK);
        seasoned.set_output_limits(100.0, -100.0);
        seasoned.set_target(5.0);
        for measurement in [0.0, 1.0, 1.5, 2.0] {
            seasoned.step(measurement);
        }
        seasoned.flip_disable(true);
        assert_eq!(seasoned.step(3.0), 0.0);
        seasoned.flip_disable(false);

        let mut fresh = PidController::new(0.8, 0.4, 0.2, 0.0, TICK);
        fresh.set_output_limits(100.0, -100.0);
        fresh.set_target(5.0);

        for measurement in [2.0, 3.0, 4.0, 4.5] {
            assert_eq!(seasoned.step(measurement), fresh.step(measurement));
        }
    }

    #[test]
    fn integral_is_frozen_while_disabled() {
        let mut controller = PidController::new(0.0, 1.0, 0.0, 0.0, TICK);
        controller.set_output_limits(100.0, -100.0);
        controller.set_target(10.0);

        controller.step(0.0);
        let accumulated = controller.integral_term();

        controller.flip_disable(true);
        for _ in 0..10 {
            controller.step(0.0);
        }
        assert_eq!(controller.integral_term(), accumulated);
    }

    #[test]
    fn derivative_filter_averages_window() {
        let mut filter = AverageFilter::new(2);

        assert_eq!(filter.fit(4.0), 4.0);
        assert_eq!(filter.fit(8.0), 6.0);
        assert_eq!(filter.fit(0.0), 4.0);

        filter.reset();
        assert_eq!(filter.fit(10.0), 10.0);
    }
}
