// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

pub use pid::PidController;
pub use profile::{ProfileError, SCurve};

pub mod pid;
pub mod profile;

/// Linear interpolation.
#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp() {
        assert_eq!(lerp(1.0, 3.0, 0.5), 2.0);
        assert_eq!(lerp(1.0, -0.5, 1.0), -0.5);
        assert_eq!(lerp(2.0, 4.0, 0.0), 2.0);
    }
}
