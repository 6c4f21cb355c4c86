// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

pub mod executor;
pub mod task;

pub use executor::{FollowReport, FollowSettings, MotionExecutor, PidSample, Sample, Tail, TrackOutcome};
