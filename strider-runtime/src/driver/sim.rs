// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use tokio::time::Instant;

use crate::core::MotorChannel;

/// First-order motor model against the tokio clock.
///
/// Velocity approaches the commanded fraction of `max_velocity` with
/// time constant `1 / responsiveness`; position is the exact integral
/// of that approach. State advances lazily on every read, so the model
/// follows paused test clocks as well as the wall clock.
pub struct VirtualMotor {
    max_velocity: f64,
    responsiveness: f64,
    command: f64,
    position: f64,
    velocity: f64,
    updated: Instant,
}

impl VirtualMotor {
    pub fn new(max_velocity: f64, responsiveness: f64) -> Self {
        Self {
            max_velocity,
            responsiveness,
            command: 0.0,
            position: 0.0,
            velocity: 0.0,
            updated: Instant::now(),
        }
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let dt = (now - self.updated).as_secs_f64();
        if dt <= 0.0 {
            return;
        }
        let target = self.command * self.max_velocity;
        let decay = (-self.responsiveness * dt).exp();
        self.position += target * dt - (target - self.velocity) * (1.0 - decay) / self.responsiveness;
        self.velocity = target - (target - self.velocity) * decay;
        self.updated = now;
    }
}

impl MotorChannel for VirtualMotor {
    fn position(&mut self) -> f64 {
        self.advance();
        self.position
    }

    fn velocity(&mut self) -> f64 {
        self.advance();
        self.velocity
    }

    fn set_output(&mut self, value: f64) {
        self.advance();
        self.command = value.clamp(-1.0, 1.0);
    }
}
