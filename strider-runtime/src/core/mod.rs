// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

pub mod disturbance;
pub mod source;

pub use disturbance::{DisturbancePair, PathDisturbance, Side};
pub use source::{DirectPair, DistanceSource, MotorChannel, SingleAxis};
