// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use nalgebra::{Complex, ComplexField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileError {
    /// No jerk-limited profile covers the requested distance with the
    /// given limits.
    Infeasible,
}

impl std::error::Error for ProfileError {}

impl std::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Infeasible => write!(f, "infeasible trajectory"),
        }
    }
}

/// One phase of the velocity half-profile.
#[derive(Debug, Clone, Copy)]
struct Slice {
    /// End of this phase on the time axis.
    end_time: f64,
    /// Velocity at the end of this phase.
    boundary: f64,
    /// Displacement contributed by this phase alone.
    area: f64,
}

/// The ramp-up half of an s-curve, built as if the velocity limit is
/// always reached: a jerk-limited ramp, an optional constant
/// acceleration ramp, and a mirrored jerk-limited ramp onto the
/// velocity plateau.
#[derive(Debug, Clone)]
struct HalfProfile {
    vel_limit: f64,
    acc_limit: f64,
    jerk_limit: f64,
    /// Whether the constant-acceleration phase exists. Maxing the jerk
    /// may never exceed the acceleration limit, in which case the two
    /// jerk ramps meet directly.
    has_plateau: bool,
    slices: Vec<Slice>,
}

impl HalfProfile {
    fn new(vel_limit: f64, acc_limit: f64, jerk_limit: f64) -> Self {
        let (v, a, j) = (vel_limit, acc_limit, jerk_limit);

        let mut forward = Slice {
            end_time: a / (2.0 * j),
            boundary: 0.0,
            area: 0.0,
        };
        forward.boundary = j * forward.end_time * forward.end_time;
        forward.area = forward.boundary * forward.end_time / 3.0;

        if forward.boundary > v / 2.0 || forward.boundary < 0.0 {
            // The jerk ramps meet at v/2 before the acceleration limit
            // is hit. No linear component.
            let end_time = (v / (2.0 * j)).sqrt();
            let boundary = j * end_time * end_time;
            let area = boundary * end_time / 3.0;
            let forward = Slice {
                end_time,
                boundary,
                area,
            };
            let reverse = Slice {
                end_time: 2.0 * end_time,
                boundary: v,
                area: v * end_time - area,
            };
            Self {
                vel_limit,
                acc_limit,
                jerk_limit,
                has_plateau: false,
                slices: vec![forward, reverse],
            }
        } else {
            let ramp = |t: f64| (t - forward.end_time) * a + forward.boundary;
            let plateau = Slice {
                end_time: v / a,
                boundary: ramp(v / a),
                // Definite integral of a line segment: trapezoid area.
                area: (v / a - forward.end_time) * (ramp(forward.end_time) + ramp(v / a)) / 2.0,
            };
            let reverse = Slice {
                end_time: v / a + forward.end_time,
                boundary: v,
                area: v * forward.end_time - forward.area,
            };
            Self {
                vel_limit,
                acc_limit,
                jerk_limit,
                has_plateau: true,
                slices: vec![forward, plateau, reverse],
            }
        }
    }

    /// Number of slices fully behind `time`, original branch order.
    fn phase(&self, time: f64) -> usize {
        let mut slice = self.slices.iter().filter(|s| time > s.end_time).count();
        if slice > 0 && !self.has_plateau {
            slice += 1;
        }
        slice
    }

    fn velocity(&self, time: f64) -> f64 {
        let (v, a, j) = (self.vel_limit, self.acc_limit, self.jerk_limit);
        match self.phase(time) {
            0 => j * time * time,
            1 => (time - self.slices[0].end_time) * a + self.slices[0].boundary,
            2 => {
                let ramp_start = if self.has_plateau {
                    self.slices[1].end_time
                } else {
                    self.slices[0].end_time
                };
                let t = time - ramp_start - self.slices[0].end_time;
                v - j * t * t
            }
            _ => v,
        }
    }

    fn acceleration(&self, time: f64) -> f64 {
        let (a, j) = (self.acc_limit, self.jerk_limit);
        match self.phase(time) {
            0 => 2.0 * j * time,
            1 => a,
            2 => {
                // Relative to the ramp end; negative, so the result
                // falls from a to zero.
                let t = time - self.slices[self.slices.len() - 1].end_time;
                -2.0 * j * t
            }
            _ => 0.0,
        }
    }

    fn position(&self, time: f64) -> f64 {
        let (v, a, j) = (self.vel_limit, self.acc_limit, self.jerk_limit);

        let mut slice = 0;
        let mut c = 0.0;
        let mut t_start = 0.0;
        for s in &self.slices {
            if time > s.end_time {
                c += s.area;
                t_start = s.end_time;
                slice += 1;
            } else {
                break;
            }
        }
        if slice > 0 && !self.has_plateau {
            slice += 1;
        }
        let time = time - t_start;

        match slice {
            // Integral of jt^2.
            0 => j * time * time * time / 3.0,
            // Integral of at + z with z the first ramp's boundary.
            1 => {
                let z = self.slices[0].boundary;
                a * time * time / 2.0 + z * time + c
            }
            // Integral of v - jt^2 with translated bounds; translating
            // the function itself would not integrate cleanly.
            2 => {
                let begin_loc = self.slices[0].end_time;
                let time_loc = begin_loc - time;
                let time_loc_int = v * time_loc - (j * time_loc * time_loc * time_loc) / 3.0;
                let begin_loc_int = v * begin_loc - (j * begin_loc * begin_loc * begin_loc) / 3.0;
                begin_loc_int - time_loc_int + c
            }
            _ => time * v + c,
        }
    }

    /// Invert [`Self::position`] phase by phase using the closed-form
    /// integrals.
    fn time_for_position(&self, pos: f64) -> f64 {
        let (v, a, j) = (self.vel_limit, self.acc_limit, self.jerk_limit);

        let mut slice = 0;
        let mut c = 0.0;
        let mut t_start = 0.0;
        for s in &self.slices {
            if pos > c + s.area {
                c += s.area;
                t_start = s.end_time;
                slice += 1;
            } else {
                break;
            }
        }
        if slice > 0 && !self.has_plateau {
            slice += 1;
        }
        let pos = pos - c;

        match slice {
            // x = jy^3/3 inverted to y = cbrt(3x/j).
            0 => (3.0 * pos / j).cbrt(),
            // x = ay^2/2 + zy inverted on the right side of the
            // parabola; the second algebraic solution is extraneous
            // in this domain.
            1 => {
                let z = self.slices[0].boundary;
                ((2.0 * a * pos + z * z).sqrt() - z) / a + t_start
            }
            // Cubic from x = vz - jz^3/3 - v(z - y) + j(z - y)^3/3,
            // solved in closed form over the complex plane. Of the
            // three algebraic roots only this branch lands in the
            // phase's time window; the caller cross-checks it against
            // the forward evaluation.
            2 => {
                let p = Complex::new(pos, 0.0);
                let z = Complex::new(self.slices[0].end_time, 0.0);
                let r = z * z * z * (-27.0 * j * j * j) + z * (81.0 * j * j * v)
                    - p * (81.0 * j * j);
                let sqroot = (r * r - Complex::new(2916.0 * j * j * j * v * v * v, 0.0)).sqrt();
                let qroot = (r + sqroot).powf(1.0 / 3.0);
                let qr2 = 2.0_f64.powf(1.0 / 3.0);
                let dqr2 = 2.0_f64.powf(2.0 / 3.0);
                let sqrt3 = 3.0_f64.sqrt();
                let sol = z
                    - Complex::new(3.0 * v, 0.0) * Complex::new(1.0, -sqrt3) / (qroot * dqr2)
                    - Complex::new(1.0, sqrt3) * qroot / (6.0 * qr2 * j);
                sol.re + t_start
            }
            _ => pos / v + t_start,
        }
    }

    /// Displacement of the whole half-profile.
    fn min_pos(&self) -> f64 {
        self.slices.iter().map(|s| s.area).sum()
    }

    /// Duration of the whole half-profile.
    fn min_half_width(&self) -> f64 {
        self.slices[self.slices.len() - 1].end_time
    }
}

/// A jerk-limited point-to-point velocity profile.
///
/// Built once per motion command from the velocity, acceleration and
/// jerk limits and the distance to cover; immutable afterwards. The
/// full profile mirrors the ramp-up half about its temporal midpoint,
/// with an optional cruise segment in between when the distance allows
/// the velocity limit to be reached.
#[derive(Debug, Clone)]
pub struct SCurve {
    half: HalfProfile,
    distance: f64,
    t_width: f64,
}

impl SCurve {
    /// Construct a profile covering `distance` under the given limits.
    ///
    /// When the requested velocity limit cannot be reached within the
    /// distance, the peak velocity is re-solved in closed form so the
    /// total displacement still equals `distance` exactly, falling
    /// back to a pure jerk-limited profile when even the
    /// acceleration-limited form is infeasible.
    pub fn new(
        max_vel: f64,
        max_acc: f64,
        max_jerk: f64,
        distance: f64,
    ) -> Result<Self, ProfileError> {
        let (v, a, j, d) = (max_vel, max_acc, max_jerk, distance);
        if !(v > 0.0 && a > 0.0 && j > 0.0 && d > 0.0)
            || !(v.is_finite() && a.is_finite() && j.is_finite() && d.is_finite())
        {
            return Err(ProfileError::Infeasible);
        }

        let mut half = HalfProfile::new(v, a, j);
        let t_width;
        if half.min_pos() * 2.0 > d {
            // Ramping all the way to v overshoots the distance; solve
            // for the largest feasible peak velocity instead.
            let reduced = (j * ((a * (a * a * a + 16.0 * d * j * j)) / (j * j)).sqrt() - a * a)
                / (4.0 * j);
            debug!("velocity limit cut from {} to {}", v, reduced);
            half = HalfProfile::new(reduced, a, j);
            if !half.has_plateau {
                let reduced = ((d / 2.0) * (2.0 * j).sqrt()).powf(2.0 / 3.0);
                debug!("acceleration-limited form infeasible, peak velocity {}", reduced);
                half = HalfProfile::new(reduced, a, j);
            }
            t_width = half.min_half_width() * 2.0;
        } else {
            t_width = half.min_half_width() * 2.0 + (d - half.min_pos() * 2.0) / v;
        }

        if !t_width.is_finite() || t_width <= 0.0 {
            return Err(ProfileError::Infeasible);
        }

        Ok(Self {
            half,
            distance,
            t_width,
        })
    }

    /// Total duration of the profile.
    pub fn total_duration(&self) -> f64 {
        self.t_width
    }

    /// Distance this profile covers.
    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// Velocity at `time`, zero outside the profile.
    pub fn velocity_at(&self, time: f64) -> f64 {
        if time < 0.0 || time > self.t_width {
            return 0.0;
        }
        if time > self.t_width / 2.0 {
            return self.half.velocity(self.t_width - time);
        }
        self.half.velocity(time)
    }

    /// Position at `time`, saturating at the endpoints.
    pub fn position_at(&self, time: f64) -> f64 {
        if time < 0.0 {
            return 0.0;
        }
        if time > self.t_width {
            return self.distance;
        }
        if time > self.t_width / 2.0 {
            return self.distance - self.half.position(self.t_width - time);
        }
        self.half.position(time)
    }

    /// Acceleration at `time`, zero outside the profile.
    pub fn acceleration_at(&self, time: f64) -> f64 {
        if time < 0.0 || time > self.t_width {
            return 0.0;
        }
        if time > self.t_width / 2.0 {
            return -self.half.acceleration(self.t_width - time);
        }
        self.half.acceleration(time)
    }

    /// Time at which the profile passes `pos`, clamped to the profile.
    pub fn time_for_position(&self, pos: f64) -> f64 {
        if pos <= 0.0 {
            return 0.0;
        }
        if pos >= self.distance {
            return self.t_width;
        }
        let time = if pos > self.distance / 2.0 {
            self.t_width - self.half.time_for_position(self.distance - pos)
        } else {
            self.half.time_for_position(pos)
        };

        // Cross-check the closed-form inverse. Position is strictly
        // monotonic on (0, t_width), so a bisection recovers any
        // parameter corner where the cubic root branch drifts.
        let tolerance = 1e-6 * self.distance.max(1.0);
        if time.is_finite() && (self.position_at(time) - pos).abs() <= tolerance {
            return time;
        }
        self.bisect_position(pos)
    }

    fn bisect_position(&self, pos: f64) -> f64 {
        let mut low = 0.0_f64;
        let mut high = self.t_width;
        for _ in 0..64 {
            let mid = (low + high) / 2.0;
            if self.position_at(mid) < pos {
                low = mid;
            } else {
                high = mid;
            }
        }
        (low + high) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_profile(v: f64, a: f64, j: f64, d: f64) {
        let curve = SCurve::new(v, a, j, d).unwrap();
        let width = curve.total_duration();
        let tolerance = 1e-6 * d.max(1.0);

        assert!(width > 0.0, "({},{},{},{}) has no duration", v, a, j, d);
        assert!(
            (curve.position_at(0.0)).abs() < tolerance,
            "({},{},{},{}) does not start at zero",
            v,
            a,
            j,
            d
        );
        assert!(
            (curve.position_at(width) - d).abs() < tolerance,
            "({},{},{},{}) covers {} instead of {}",
            v,
            a,
            j,
            d,
            curve.position_at(width),
            d
        );

        // Symmetry about the midpoint.
        for i in 1..50 {
            let t = width * i as f64 / 50.0;
            let mirrored = curve.velocity_at(width - t);
            assert!(
                (curve.velocity_at(t) - mirrored).abs() < 1e-9 * v.max(1.0),
                "({},{},{},{}) asymmetric at t={}",
                v,
                a,
                j,
                d,
                t
            );
        }

        // Inverse round trip through every phase.
        for i in 1..50 {
            let t = width * i as f64 / 50.0;
            let pos = curve.position_at(t);
            let recovered = curve.time_for_position(pos);
            assert!(
                (recovered - t).abs() < 1e-5 * width.max(1.0),
                "({},{},{},{}) round trip t={} gave {}",
                v,
                a,
                j,
                d,
                t,
                recovered
            );
        }
    }

    #[test]
    fn displacement_law_and_symmetry() {
        check_profile(10.0, 5.0, 2.0, 3.0);
    }

    #[test]
    fn parameter_sweep() {
        for &v in &[2.0, 6.0, 10.0] {
            for &a in &[1.0, 4.0, 8.0] {
                for &j in &[0.5, 2.0, 10.0] {
                    for &d in &[0.5, 3.0, 12.0, 40.0] {
                        check_profile(v, a, j, d);
                    }
                }
            }
        }
    }

    #[test]
    fn reduced_peak_velocity_still_covers_distance() {
        // Far too short a distance to ever reach the velocity limit.
        check_profile(50.0, 5.0, 2.0, 1.0);
    }

    #[test]
    fn pure_jerk_profile_has_no_plateau() {
        // Acceleration limit so high the jerk ramps meet directly.
        let curve = SCurve::new(10.0, 100.0, 1.0, 40.0).unwrap();
        assert!(!curve.half.has_plateau);
        check_profile(10.0, 100.0, 1.0, 40.0);
    }

    #[test]
    fn queries_saturate_outside_the_profile() {
        let curve = SCurve::new(10.0, 5.0, 2.0, 3.0).unwrap();
        let width = curve.total_duration();

        assert_eq!(curve.velocity_at(-1.0), 0.0);
        assert_eq!(curve.velocity_at(width + 1.0), 0.0);
        assert_eq!(curve.position_at(-1.0), 0.0);
        assert_eq!(curve.position_at(width + 1.0), 3.0);
        assert_eq!(curve.time_for_position(-1.0), 0.0);
        assert_eq!(curve.time_for_position(4.0), width);
    }

    #[test]
    fn degenerate_limits_are_rejected() {
        assert!(SCurve::new(0.0, 5.0, 2.0, 3.0).is_err());
        assert!(SCurve::new(10.0, -5.0, 2.0, 3.0).is_err());
        assert!(SCurve::new(10.0, 5.0, 0.0, 3.0).is_err());
        assert!(SCurve::new(10.0, 5.0, 2.0, 0.0).is_err());
        assert!(SCurve::new(f64::NAN, 5.0, 2.0, 3.0).is_err());
    }
}
