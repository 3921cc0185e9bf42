//! Propagation backends
//!
//! `Propagator` is the fixed contract every physics model implements:
//! element set + epoch → inertial state, or a typed failure. Callers hold a
//! `&dyn Propagator` and never know which model sits behind it.

use chrono::{DateTime, Duration, Utc};
use nalgebra::Vector3;
use std::fmt::Debug;

use crate::elements::OrbitalElementSet;
use crate::kepler::{self, eccentric_to_true, wrap_two_pi};
use crate::state::StateVector;
use crate::{seconds_between, OrbitalError, Result, EARTH_RADIUS_KM, J2, MU_EARTH_KM3_S2};

/// Default limit on |target - epoch| before elements count as stale
pub const DEFAULT_MAX_ELEMENT_AGE_DAYS: i64 = 7;

pub trait Propagator: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Inertial state of `elements` at `at`.
    fn propagate(&self, elements: &OrbitalElementSet, at: DateTime<Utc>) -> Result<StateVector>;
}

/// Fail with `StaleElements` when the epoch is further than `max_age` from `at`.
pub fn check_element_age(
    elements: &OrbitalElementSet,
    at: DateTime<Utc>,
    max_age: Option<Duration>,
) -> Result<()> {
    let Some(max_age) = max_age else {
        return Ok(());
    };
    let age = elements.age_at(at);
    if age > max_age {
        return Err(OrbitalError::StaleElements {
            id: elements.id.clone(),
            age_hours: age.num_seconds() as f64 / 3600.0,
            max_age_hours: max_age.num_seconds() as f64 / 3600.0,
        });
    }
    Ok(())
}

fn finite_or_diverged(id: &str, position: Vector3<f64>, velocity: Vector3<f64>) -> Result<()> {
    if position.iter().chain(velocity.iter()).all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(OrbitalError::PropagationDivergence {
            id: id.to_string(),
            reason: "non-finite state".to_string(),
        })
    }
}

/// Perifocal P̂ and Q̂ axes in the inertial frame.
fn perifocal_axes(raan: f64, inclination: f64, arg_perigee: f64) -> (Vector3<f64>, Vector3<f64>) {
    let (so, co) = raan.sin_cos();
    let (si, ci) = inclination.sin_cos();
    let (sw, cw) = arg_perigee.sin_cos();
    let p = Vector3::new(co * cw - so * sw * ci, so * cw + co * sw * ci, sw * si);
    let q = Vector3::new(-co * sw - so * cw * ci, -so * sw + co * cw * ci, cw * si);
    (p, q)
}

// ============================================================================
// Two-body / J2 secular model
// ============================================================================

/// Keplerian propagation with optional J2 secular drift of RAAN, argument of
/// perigee and mean anomaly.
#[derive(Debug, Clone)]
pub struct TwoBodyPropagator {
    pub j2: bool,
    pub max_element_age: Option<Duration>,
}

impl Default for TwoBodyPropagator {
    fn default() -> Self {
        Self {
            j2: true,
            max_element_age: Some(Duration::days(DEFAULT_MAX_ELEMENT_AGE_DAYS)),
        }
    }
}

impl TwoBodyPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure Keplerian motion, no J2.
    pub fn keplerian() -> Self {
        Self {
            j2: false,
            ..Self::default()
        }
    }

    pub fn with_j2(mut self, j2: bool) -> Self {
        self.j2 = j2;
        self
    }

    pub fn with_max_element_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_element_age = max_age;
        self
    }

    /// (RAAN rate, argument-of-perigee rate, mean-anomaly rate) in rad/s.
    fn secular_rates(&self, elements: &OrbitalElementSet) -> (f64, f64, f64) {
        let n = elements.mean_motion_rad_s();
        if !self.j2 {
            return (0.0, 0.0, n);
        }
        let a = elements.semi_major_axis_km();
        let e = elements.eccentricity;
        let p = a * (1.0 - e * e);
        let cos_i = elements.inclination_deg.to_radians().cos();
        let k = 1.5 * J2 * (EARTH_RADIUS_KM / p).powi(2) * n;

        let raan_dot = -k * cos_i;
        let argp_dot = 0.5 * k * (5.0 * cos_i * cos_i - 1.0);
        let mean_dot = n + 0.5 * k * (1.0 - e * e).sqrt() * (3.0 * cos_i * cos_i - 1.0);
        (raan_dot, argp_dot, mean_dot)
    }
}

impl Propagator for TwoBodyPropagator {
    fn name(&self) -> &'static str {
        if self.j2 {
            "two-body-j2"
        } else {
            "two-body"
        }
    }

    fn propagate(&self, elements: &OrbitalElementSet, at: DateTime<Utc>) -> Result<StateVector> {
        check_element_age(elements, at, self.max_element_age)?;
        elements.check_bounded()?;

        let dt = seconds_between(elements.epoch, at);
        let (raan_dot, argp_dot, mean_dot) = self.secular_rates(elements);

        let e = elements.eccentricity;
        let a = elements.semi_major_axis_km();
        let raan = elements.raan_deg.to_radians() + raan_dot * dt;
        let arg_perigee = elements.arg_perigee_deg.to_radians() + argp_dot * dt;
        let mean_anomaly = wrap_two_pi(elements.mean_anomaly_deg.to_radians() + mean_dot * dt);

        let ecc_anom = kepler::solve_kepler(mean_anomaly, e).map_err(|failure| {
            OrbitalError::KeplerNonConvergence {
                id: elements.id.clone(),
                iterations: failure.iterations,
                mean_anomaly,
                eccentricity: e,
            }
        })?;
        let true_anom = eccentric_to_true(ecc_anom, e);

        let p = a * (1.0 - e * e);
        let radius = a * (1.0 - e * ecc_anom.cos());
        let (p_hat, q_hat) = perifocal_axes(raan, elements.inclination_deg.to_radians(), arg_perigee);
        let (sin_nu, cos_nu) = true_anom.sin_cos();

        let position = radius * (cos_nu * p_hat + sin_nu * q_hat);
        let velocity = (MU_EARTH_KM3_S2 / p).sqrt() * (-sin_nu * p_hat + (e + cos_nu) * q_hat);
        finite_or_diverged(&elements.id, position, velocity)?;

        Ok(StateVector::new(position, velocity, at, elements.id.as_str()))
    }
}

// ============================================================================
// SGP4
// ============================================================================

/// SGP4/SDP4 through the `sgp4` crate. Needs the element set's TLE lines;
/// output is TEME, used as the inertial frame.
#[derive(Debug, Clone)]
pub struct Sgp4Propagator {
    pub max_element_age: Option<Duration>,
}

impl Default for Sgp4Propagator {
    fn default() -> Self {
        Self {
            max_element_age: Some(Duration::days(DEFAULT_MAX_ELEMENT_AGE_DAYS)),
        }
    }
}

impl Sgp4Propagator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_element_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_element_age = max_age;
        self
    }
}

impl Propagator for Sgp4Propagator {
    fn name(&self) -> &'static str {
        "sgp4"
    }

    fn propagate(&self, elements: &OrbitalElementSet, at: DateTime<Utc>) -> Result<StateVector> {
        check_element_age(elements, at, self.max_element_age)?;
        let tle = elements.tle.as_ref().ok_or_else(|| {
            OrbitalError::InvalidTle(format!("{} has no TLE lines for SGP4", elements.id))
        })?;

        let parsed = sgp4::Elements::from_tle(
            None,
            tle.line1.as_bytes(),
            tle.line2.as_bytes(),
        )
        .map_err(|e| OrbitalError::InvalidTle(format!("{:?}", e)))?;

        let constants = sgp4::Constants::from_elements(&parsed).map_err(|e| {
            OrbitalError::PropagationDivergence {
                id: elements.id.clone(),
                reason: format!("{:?}", e),
            }
        })?;

        let epoch_utc = DateTime::<Utc>::from_naive_utc_and_offset(parsed.datetime, Utc);
        let minutes_since_epoch = seconds_between(epoch_utc, at) / 60.0;

        let prediction = constants.propagate(minutes_since_epoch).map_err(|e| {
            OrbitalError::PropagationDivergence {
                id: elements.id.clone(),
                reason: format!("{:?}", e),
            }
        })?;

        let position = Vector3::from(prediction.position);
        let velocity = Vector3::from(prediction.velocity);
        finite_or_diverged(&elements.id, position, velocity)?;

        Ok(StateVector::new(position, velocity, at, elements.id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 10, 6, 0, 0).unwrap()
    }

    const ISS_LINE1: &str = "1 25544U 98067A   20194.88612269 -.00002218  00000-0 -31515-4 0  9992";
    const ISS_LINE2: &str = "2 25544  51.6461 221.2784 0001413  89.1723 280.4612 15.49507896236008";

    #[test]
    fn test_circular_orbit_radius_and_speed() {
        let propagator = TwoBodyPropagator::keplerian();
        let sat = OrbitalElementSet::circular("C", epoch(), 7_000.0, 45.0, 30.0, 0.0);
        for minutes in [0, 17, 45, 90, 600] {
            let state = propagator
                .propagate(&sat, epoch() + Duration::minutes(minutes))
                .unwrap();
            assert!((state.radius_km() - 7_000.0).abs() < 1e-6);
            assert!((state.speed_km_s() - (MU_EARTH_KM3_S2 / 7_000.0).sqrt()).abs() < 1e-9);
            assert!(state.position.dot(&state.velocity).abs() < 1e-6);
        }
    }

    #[test]
    fn test_returns_to_start_after_one_period() {
        let propagator = TwoBodyPropagator::keplerian();
        let sat = OrbitalElementSet::new("E", epoch(), 28.5, 75.0, 0.1, 30.0, 10.0, 14.0);
        let start = propagator.propagate(&sat, epoch()).unwrap();
        let period_us = (sat.period_seconds() * 1e6).round() as i64;
        let end = propagator
            .propagate(&sat, epoch() + Duration::microseconds(period_us))
            .unwrap();
        assert!((start.position - end.position).norm() < 1e-3);
    }

    #[test]
    fn test_j2_regresses_node_of_prograde_orbit() {
        let propagator = TwoBodyPropagator::new().with_max_element_age(None);
        let sat = OrbitalElementSet::circular("J2", epoch(), 7_000.0, 51.6, 0.0, 0.0);
        let (raan_dot, _, _) = propagator.secular_rates(&sat);
        // About -5 deg/day at ISS-like inclination
        let deg_per_day = raan_dot.to_degrees() * 86_400.0;
        assert!(deg_per_day < -4.0 && deg_per_day > -6.0, "{}", deg_per_day);
    }

    #[test]
    fn test_deterministic_output() {
        let propagator = TwoBodyPropagator::new();
        let sat = OrbitalElementSet::new("D", epoch(), 98.0, 10.0, 0.001, 90.0, 45.0, 14.8);
        let at = epoch() + Duration::seconds(12_345);
        let a = propagator.propagate(&sat, at).unwrap();
        let b = propagator.propagate(&sat, at).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stale_elements_are_rejected() {
        let propagator = TwoBodyPropagator::new().with_max_element_age(Some(Duration::hours(48)));
        let sat = OrbitalElementSet::circular("OLD", epoch(), 7_000.0, 45.0, 0.0, 0.0);

        assert!(propagator.propagate(&sat, epoch() + Duration::hours(47)).is_ok());
        let err = propagator
            .propagate(&sat, epoch() + Duration::hours(49))
            .unwrap_err();
        assert!(matches!(err, OrbitalError::StaleElements { .. }));
        let err = propagator
            .propagate(&sat, epoch() - Duration::hours(49))
            .unwrap_err();
        assert!(matches!(err, OrbitalError::StaleElements { .. }));
    }

    #[test]
    fn test_sub_orbital_diverges() {
        let propagator = TwoBodyPropagator::new();
        let sat = OrbitalElementSet::new("LOW", epoch(), 51.0, 0.0, 0.0, 0.0, 0.0, 17.5);
        let err = propagator.propagate(&sat, epoch()).unwrap_err();
        assert!(err.is_divergence());
    }

    #[test]
    fn test_sgp4_requires_tle_lines() {
        let propagator = Sgp4Propagator::new();
        let sat = OrbitalElementSet::circular("NO-TLE", epoch(), 7_000.0, 45.0, 0.0, 0.0);
        assert!(matches!(
            propagator.propagate(&sat, epoch()),
            Err(OrbitalError::InvalidTle(_))
        ));
    }

    #[test]
    fn test_sgp4_iss_state_is_plausible() {
        let iss = OrbitalElementSet::from_tle(Some("ISS (ZARYA)".into()), ISS_LINE1, ISS_LINE2).unwrap();
        assert_eq!(iss.norad_id, Some(25544));
        assert!((iss.inclination_deg - 51.6461).abs() < 1e-9);

        let propagator = Sgp4Propagator::new();
        let state = propagator
            .propagate(&iss, iss.epoch + Duration::minutes(30))
            .unwrap();
        let altitude = state.radius_km() - EARTH_RADIUS_KM;
        assert!(altitude > 350.0 && altitude < 450.0, "altitude {}", altitude);
        assert!((state.speed_km_s() - 7.66).abs() < 0.1);

        // Earth-fixed speed is slower for a prograde orbit
        let fixed = transforms::eci_to_ecef(&state);
        assert!(fixed.speed_km_s() < state.speed_km_s());
    }

    #[test]
    fn test_two_body_tracks_sgp4_over_short_arc() {
        let iss = OrbitalElementSet::from_tle(None, ISS_LINE1, ISS_LINE2).unwrap();
        let sgp4 = Sgp4Propagator::new();
        let two_body = TwoBodyPropagator::new();
        let at = iss.epoch + Duration::minutes(10);
        let a = sgp4.propagate(&iss, at).unwrap();
        let b = two_body.propagate(&iss, at).unwrap();
        // Mean vs osculating elements differ by tens of km at most
        assert!(a.separation_km(&b) < 60.0, "{}", a.separation_km(&b));
    }
}
