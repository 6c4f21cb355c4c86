// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

//! The `strider` library is the motion-control core of the robot
//! control program.
//!
//! It contains the PID controller and S-curve trajectory mathematics,
//! the motion executor driving distance sources at a fixed tick, the
//! path-disturbance mechanism for swerve maneuvers, task orchestration
//! helpers, the simulated motor driver, and the operator test services
//! exposed over the tabu bus.

pub mod config;
pub mod core;
pub mod driver;
pub mod math;
pub mod runtime;
pub mod service;

#[macro_use]
extern crate log;

pub use self::config::*;

/// Strider runtime module containing various constants.
pub mod consts {
    use std::time::Duration;

    /// Strider runtime version.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Period of one motion tracking tick.
    ///
    /// Every motion loop runs sense, compute, actuate, then sleeps the
    /// remainder of this period.
    pub const MOTION_TICK: Duration = Duration::from_millis(10);

    /// Default bound on a single motion command.
    pub const MOTION_DEADLINE: Duration = Duration::from_secs(10);
}
