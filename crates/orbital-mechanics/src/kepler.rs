//! Kepler's equation and anomaly conversions

use std::f64::consts::{PI, TAU};

/// Newton iteration cap for Kepler's equation
pub const MAX_KEPLER_ITERATIONS: usize = 50;
/// Convergence tolerance on the eccentric anomaly step (rad)
pub const KEPLER_TOLERANCE: f64 = 1e-12;

/// Solver gave up before the step fell below tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeplerFailure {
    pub iterations: usize,
    pub last_estimate: f64,
}

/// Solve `M = E - e sin E` for the eccentric anomaly with the default cap.
pub fn solve_kepler(mean_anomaly: f64, eccentricity: f64) -> Result<f64, KeplerFailure> {
    solve_kepler_with(
        mean_anomaly,
        eccentricity,
        MAX_KEPLER_ITERATIONS,
        KEPLER_TOLERANCE,
    )
}

pub fn solve_kepler_with(
    mean_anomaly: f64,
    eccentricity: f64,
    max_iterations: usize,
    tolerance: f64,
) -> Result<f64, KeplerFailure> {
    let m = wrap_pi(mean_anomaly);
    if eccentricity == 0.0 {
        return Ok(m);
    }

    // Starting guess from Danby for high eccentricity
    let mut ecc_anom = if eccentricity < 0.8 {
        m
    } else {
        m + 0.85 * eccentricity * m.signum()
    };

    for iteration in 1..=max_iterations {
        let f = ecc_anom - eccentricity * ecc_anom.sin() - m;
        let f_prime = 1.0 - eccentricity * ecc_anom.cos();
        let step = f / f_prime;
        ecc_anom -= step;
        if !ecc_anom.is_finite() {
            return Err(KeplerFailure {
                iterations: iteration,
                last_estimate: ecc_anom,
            });
        }
        if step.abs() < tolerance {
            return Ok(ecc_anom);
        }
    }

    Err(KeplerFailure {
        iterations: max_iterations,
        last_estimate: ecc_anom,
    })
}

pub fn eccentric_to_true(ecc_anom: f64, eccentricity: f64) -> f64 {
    let half = ecc_anom / 2.0;
    2.0 * ((1.0 + eccentricity).sqrt() * half.sin()).atan2((1.0 - eccentricity).sqrt() * half.cos())
}

pub fn true_to_eccentric(true_anom: f64, eccentricity: f64) -> f64 {
    let half = true_anom / 2.0;
    2.0 * ((1.0 - eccentricity).sqrt() * half.sin()).atan2((1.0 + eccentricity).sqrt() * half.cos())
}

pub fn eccentric_to_mean(ecc_anom: f64, eccentricity: f64) -> f64 {
    ecc_anom - eccentricity * ecc_anom.sin()
}

/// Wrap an angle into [0, 2π).
pub fn wrap_two_pi(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Wrap an angle into [-π, π).
pub fn wrap_pi(angle: f64) -> f64 {
    wrap_two_pi(angle + PI) - PI
}
