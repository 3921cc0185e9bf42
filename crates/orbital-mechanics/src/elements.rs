//! Mean orbital element sets
//!
//! Element sets are produced by the ingestion side and are read-only here.
//! Derived quantities (semi-major axis, perigee/apogee envelope, regime) feed
//! the pruner; `osculating` rebuilds an element set from a Cartesian state so
//! a maneuvered orbit can be propagated from its burn epoch.

use chrono::{DateTime, Duration, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::kepler::{eccentric_to_mean, true_to_eccentric, wrap_two_pi};
use crate::state::StateVector;
use crate::{OrbitalError, Result, EARTH_RADIUS_KM, MU_EARTH_KM3_S2, SECONDS_PER_DAY};

/// Eccentricity/inclination below which the orbit is treated as circular/equatorial
const SINGULARITY_EPS: f64 = 1e-10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TleLines {
    pub line1: String,
    pub line2: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ObjectType {
    #[default]
    Payload,
    RocketBody,
    Debris,
    Unknown,
}

impl ObjectType {
    pub fn is_maneuverable(self) -> bool {
        matches!(self, ObjectType::Payload)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MissionPriority {
    #[default]
    Routine,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrbitRegime {
    /// Very low Earth orbit (apogee below 450 km)
    Vleo,
    Leo,
    Meo,
    /// Geosynchronous belt (±500 km around 35,786 km)
    Geo,
    /// Highly elliptical, or beyond the GEO belt
    Heo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrbitalElementSet {
    pub id: String,
    #[serde(default)]
    pub norad_id: Option<u32>,
    #[serde(default)]
    pub name: String,
    pub epoch: DateTime<Utc>,
    pub inclination_deg: f64,
    pub raan_deg: f64,
    pub eccentricity: f64,
    pub arg_perigee_deg: f64,
    pub mean_anomaly_deg: f64,
    /// Mean motion (rev/day)
    pub mean_motion_rev_day: f64,
    #[serde(default)]
    pub bstar: f64,
    /// When the ingestion side last refreshed this set
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tle: Option<TleLines>,
    #[serde(default)]
    pub object_type: ObjectType,
    #[serde(default)]
    pub priority: MissionPriority,
}

impl OrbitalElementSet {
    /// Bare element set with payload defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        epoch: DateTime<Utc>,
        inclination_deg: f64,
        raan_deg: f64,
        eccentricity: f64,
        arg_perigee_deg: f64,
        mean_anomaly_deg: f64,
        mean_motion_rev_day: f64,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            norad_id: None,
            epoch,
            inclination_deg,
            raan_deg,
            eccentricity,
            arg_perigee_deg,
            mean_anomaly_deg,
            mean_motion_rev_day,
            bstar: 0.0,
            fetched_at: None,
            tle: None,
            object_type: ObjectType::Payload,
            priority: MissionPriority::Routine,
        }
    }

    /// Circular orbit at `radius_km`, positioned by argument of latitude.
    pub fn circular(
        id: impl Into<String>,
        epoch: DateTime<Utc>,
        radius_km: f64,
        inclination_deg: f64,
        raan_deg: f64,
        arg_latitude_deg: f64,
    ) -> Self {
        let n_rad_s = (MU_EARTH_KM3_S2 / radius_km.powi(3)).sqrt();
        Self::new(
            id,
            epoch,
            inclination_deg,
            raan_deg,
            0.0,
            0.0,
            arg_latitude_deg,
            n_rad_s * SECONDS_PER_DAY / TAU,
        )
    }

    /// Parse a TLE with the `sgp4` crate; keeps the raw lines for the SGP4 backend.
    pub fn from_tle(name: Option<String>, line1: &str, line2: &str) -> Result<Self> {
        let elements = sgp4::Elements::from_tle(name.clone(), line1.as_bytes(), line2.as_bytes())
            .map_err(|e| OrbitalError::InvalidTle(format!("{:?}", e)))?;

        let epoch = DateTime::<Utc>::from_naive_utc_and_offset(elements.datetime, Utc);
        let id = elements.norad_id.to_string();

        Ok(Self {
            name: elements.object_name.clone().or(name).unwrap_or_else(|| id.clone()),
            norad_id: u32::try_from(elements.norad_id).ok(),
            id,
            epoch,
            inclination_deg: elements.inclination,
            raan_deg: elements.right_ascension,
            eccentricity: elements.eccentricity,
            arg_perigee_deg: elements.argument_of_perigee,
            mean_anomaly_deg: elements.mean_anomaly,
            mean_motion_rev_day: elements.mean_motion,
            bstar: elements.drag_term,
            fetched_at: None,
            tle: Some(TleLines {
                line1: line1.trim_end().to_string(),
                line2: line2.trim_end().to_string(),
            }),
            object_type: ObjectType::Payload,
            priority: MissionPriority::Routine,
        })
    }

    /// Osculating two-body elements of an inertial state, with the state's epoch.
    pub fn osculating(id: impl Into<String>, state: &StateVector) -> Result<Self> {
        let id = id.into();
        let inertial = state.to_inertial();
        let r = inertial.position;
        let v = inertial.velocity;
        let r_mag = r.norm();
        let v_mag = v.norm();

        let diverged = |reason: String| OrbitalError::PropagationDivergence {
            id: id.clone(),
            reason,
        };

        let h = r.cross(&v);
        let h_mag = h.norm();
        if r_mag <= 0.0 || h_mag <= 0.0 || !h_mag.is_finite() {
            return Err(diverged("degenerate state (no orbit plane)".to_string()));
        }

        let energy = v_mag * v_mag / 2.0 - MU_EARTH_KM3_S2 / r_mag;
        if energy >= 0.0 {
            return Err(diverged(format!("unbound state, specific energy {:.4}", energy)));
        }
        let a = -MU_EARTH_KM3_S2 / (2.0 * energy);

        let e_vec = ((v_mag * v_mag - MU_EARTH_KM3_S2 / r_mag) * r - r.dot(&v) * v) / MU_EARTH_KM3_S2;
        let e = e_vec.norm();

        let h_hat = h / h_mag;
        let inclination = h_hat.z.clamp(-1.0, 1.0).acos();

        // Node line, falling back to +X for equatorial orbits
        let node = Vector3::z().cross(&h);
        let node_hat = node
            .try_normalize(SINGULARITY_EPS * h_mag)
            .unwrap_or_else(Vector3::x);
        let in_plane = h_hat.cross(&node_hat);

        let raan = node_hat.y.atan2(node_hat.x);
        let arg_latitude = r.dot(&in_plane).atan2(r.dot(&node_hat));
        let (arg_perigee, true_anomaly) = if e > SINGULARITY_EPS {
            let w = e_vec.dot(&in_plane).atan2(e_vec.dot(&node_hat));
            (w, arg_latitude - w)
        } else {
            (0.0, arg_latitude)
        };

        let mean_anomaly = eccentric_to_mean(true_to_eccentric(true_anomaly, e), e);
        let n_rad_s = (MU_EARTH_KM3_S2 / a.powi(3)).sqrt();

        let mut elements = Self::new(
            id,
            inertial.epoch,
            inclination.to_degrees(),
            wrap_two_pi(raan).to_degrees(),
            e,
            wrap_two_pi(arg_perigee).to_degrees(),
            wrap_two_pi(mean_anomaly).to_degrees(),
            n_rad_s * SECONDS_PER_DAY / TAU,
        );
        elements.name = state.source.to_string();
        Ok(elements)
    }

    pub fn mean_motion_rad_s(&self) -> f64 {
        self.mean_motion_rev_day * TAU / SECONDS_PER_DAY
    }

    pub fn semi_major_axis_km(&self) -> f64 {
        let n = self.mean_motion_rad_s();
        (MU_EARTH_KM3_S2 / (n * n)).cbrt()
    }

    pub fn period_seconds(&self) -> f64 {
        TAU / self.mean_motion_rad_s()
    }

    pub fn perigee_radius_km(&self) -> f64 {
        self.semi_major_axis_km() * (1.0 - self.eccentricity)
    }

    pub fn apogee_radius_km(&self) -> f64 {
        self.semi_major_axis_km() * (1.0 + self.eccentricity)
    }

    pub fn perigee_altitude_km(&self) -> f64 {
        self.perigee_radius_km() - EARTH_RADIUS_KM
    }

    pub fn apogee_altitude_km(&self) -> f64 {
        self.apogee_radius_km() - EARTH_RADIUS_KM
    }

    /// Speed at perigee (km/s), the fastest point of the orbit.
    pub fn max_speed_km_s(&self) -> f64 {
        let a = self.semi_major_axis_km();
        let e = self.eccentricity;
        (MU_EARTH_KM3_S2 * (1.0 + e) / (a * (1.0 - e))).sqrt()
    }

    pub fn regime(&self) -> OrbitRegime {
        let perigee = self.perigee_altitude_km();
        let apogee = self.apogee_altitude_km();
        if self.eccentricity > 0.25 {
            OrbitRegime::Heo
        } else if apogee < 450.0 {
            OrbitRegime::Vleo
        } else if apogee < 2_000.0 {
            OrbitRegime::Leo
        } else if perigee > 35_286.0 && apogee < 36_286.0 {
            OrbitRegime::Geo
        } else if apogee < 35_286.0 {
            OrbitRegime::Meo
        } else {
            OrbitRegime::Heo
        }
    }

    /// Distance in time between the element epoch and `at`.
    pub fn age_at(&self, at: DateTime<Utc>) -> Duration {
        let delta = at.signed_duration_since(self.epoch);
        if delta < Duration::zero() {
            -delta
        } else {
            delta
        }
    }

    /// Reject element sets with no bounded, above-surface solution.
    pub fn check_bounded(&self) -> Result<()> {
        let diverged = |reason: String| -> Result<()> {
            Err(OrbitalError::PropagationDivergence {
                id: self.id.clone(),
                reason,
            })
        };

        let values = [
            self.inclination_deg,
            self.raan_deg,
            self.eccentricity,
            self.arg_perigee_deg,
            self.mean_anomaly_deg,
            self.mean_motion_rev_day,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return diverged("non-finite element".to_string());
        }
        if !(0.0..1.0).contains(&self.eccentricity) {
            return diverged(format!("eccentricity {} outside [0, 1)", self.eccentricity));
        }
        if self.mean_motion_rev_day <= 0.0 {
            return diverged(format!("mean motion {} rev/day", self.mean_motion_rev_day));
        }
        if self.perigee_radius_km() <= EARTH_RADIUS_KM {
            return diverged(format!(
                "sub-orbital: perigee altitude {:.1} km",
                self.perigee_altitude_km()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::{Propagator, TwoBodyPropagator};
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 10, 6, 0, 0).unwrap()
    }

    #[test]
    fn test_circular_orbit_envelope() {
        let sat = OrbitalElementSet::circular("LEO-1", epoch(), 7_000.0, 51.6, 10.0, 0.0);
        assert!((sat.semi_major_axis_km() - 7_000.0).abs() < 1e-6);
        assert!((sat.perigee_radius_km() - sat.apogee_radius_km()).abs() < 1e-9);
        assert_eq!(sat.regime(), OrbitRegime::Leo);
        assert!((sat.max_speed_km_s() - (MU_EARTH_KM3_S2 / 7_000.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_regimes() {
        let geo = OrbitalElementSet::circular("GEO", epoch(), 42_164.0, 0.05, 0.0, 0.0);
        assert_eq!(geo.regime(), OrbitRegime::Geo);
        let meo = OrbitalElementSet::circular("GPS", epoch(), 26_560.0, 55.0, 0.0, 0.0);
        assert_eq!(meo.regime(), OrbitRegime::Meo);
        let vleo = OrbitalElementSet::circular("VLEO", epoch(), EARTH_RADIUS_KM + 300.0, 97.0, 0.0, 0.0);
        assert_eq!(vleo.regime(), OrbitRegime::Vleo);
        let mut molniya = OrbitalElementSet::new("MOL", epoch(), 63.4, 0.0, 0.72, 270.0, 0.0, 2.006);
        molniya.priority = MissionPriority::Critical;
        assert_eq!(molniya.regime(), OrbitRegime::Heo);
    }

    #[test]
    fn test_sub_orbital_is_rejected() {
        let decayed = OrbitalElementSet::new("DEC", epoch(), 51.0, 0.0, 0.3, 0.0, 0.0, 15.5);
        let err = decayed.check_bounded().unwrap_err();
        assert!(matches!(err, OrbitalError::PropagationDivergence { .. }));

        let hyperbolic = OrbitalElementSet::new("HYP", epoch(), 51.0, 0.0, 1.2, 0.0, 0.0, 15.5);
        assert!(hyperbolic.check_bounded().is_err());
    }

    #[test]
    fn test_osculating_round_trip_through_propagator() {
        let propagator = TwoBodyPropagator::keplerian();
        let original = OrbitalElementSet::new("ECC", epoch(), 63.0, 120.0, 0.05, 45.0, 200.0, 13.2);
        let state = propagator.propagate(&original, epoch()).unwrap();

        let rebuilt = OrbitalElementSet::osculating("ECC", &state).unwrap();
        assert!((rebuilt.eccentricity - 0.05).abs() < 1e-9);
        assert!((rebuilt.inclination_deg - 63.0).abs() < 1e-9);
        assert!((rebuilt.raan_deg - 120.0).abs() < 1e-7);
        assert!((rebuilt.mean_motion_rev_day - 13.2).abs() < 1e-9);

        let later = epoch() + Duration::minutes(37);
        let a = propagator.propagate(&original, later).unwrap();
        let b = propagator.propagate(&rebuilt, later).unwrap();
        assert!((a.position - b.position).norm() < 1e-5);
    }

    #[test]
    fn test_osculating_handles_circular_equatorial() {
        let propagator = TwoBodyPropagator::keplerian();
        let original = OrbitalElementSet::circular("EQ", epoch(), 7_200.0, 0.0, 0.0, 33.0);
        let state = propagator.propagate(&original, epoch()).unwrap();
        let rebuilt = OrbitalElementSet::osculating("EQ", &state).unwrap();

        let later = epoch() + Duration::minutes(50);
        let a = propagator.propagate(&original, later).unwrap();
        let b = propagator.propagate(&rebuilt, later).unwrap();
        assert!((a.position - b.position).norm() < 1e-5);
    }

    #[test]
    fn test_osculating_rejects_escape_velocity() {
        let state = StateVector::new(
            Vector3::new(7_000.0, 0.0, 0.0),
            Vector3::new(0.0, 11.5, 0.0),
            epoch(),
            "ESC",
        );
        assert!(OrbitalElementSet::osculating("ESC", &state).is_err());
    }

    #[test]
    fn test_element_set_json_defaults() {
        let json = r#"{
            "id": "25544",
            "epoch": "2025-04-10T06:00:00Z",
            "inclination_deg": 51.64,
            "raan_deg": 221.0,
            "eccentricity": 0.0004,
            "arg_perigee_deg": 89.0,
            "mean_anomaly_deg": 280.0,
            "mean_motion_rev_day": 15.49
        }"#;
        let sat: OrbitalElementSet = serde_json::from_str(json).unwrap();
        assert_eq!(sat.object_type, ObjectType::Payload);
        assert_eq!(sat.priority, MissionPriority::Routine);
        assert!(sat.tle.is_none());
        assert_eq!(sat.age_at(epoch() - Duration::hours(3)), Duration::hours(3));
    }
}
