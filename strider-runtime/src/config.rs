// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use std::time::Duration;

/// Strider global configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Name of the binary.
    pub bin_name: String,

    /// Period of one motion tracking tick.
    pub tick_interval: Duration,

    /// Largest tabu payload sent as a single line.
    pub chunk_size: usize,

    /// How long to wait for a transfer chunk acknowledgement.
    pub ack_timeout: Duration,

    /// Total sends of one transfer chunk before giving up.
    pub ack_attempts: u32,

    /// Drivetrain parameters.
    pub drive: DriveConfig,
}

/// Drivetrain parameters.
#[derive(Clone, Debug)]
pub struct DriveConfig {
    /// Wheel diameter in inches.
    pub wheel_diameter: f64,

    /// Free speed of the drive motors in RPM.
    pub max_rpm: f64,

    /// First-order response rate of the simulated motors, per second.
    pub responsiveness: f64,
}

impl DriveConfig {
    /// Linear velocity in inches per second at full command.
    pub fn max_velocity(&self) -> f64 {
        (self.max_rpm / 60.0) * (std::f64::consts::PI * self.wheel_diameter)
    }

    /// Convert motor revolutions to inches of travel.
    pub fn revolutions_to_inches(&self, revolutions: f64) -> f64 {
        revolutions * std::f64::consts::PI * self.wheel_diameter
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bin_name: String::new(),
            tick_interval: crate::consts::MOTION_TICK,
            chunk_size: 256,
            ack_timeout: Duration::from_secs(1),
            ack_attempts: 3,
            drive: DriveConfig::default(),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            wheel_diameter: 4.0,
            max_rpm: 200.0,
            responsiveness: 8.0,
        }
    }
}
