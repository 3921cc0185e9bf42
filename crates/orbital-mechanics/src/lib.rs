//! Orbital Mechanics Library
//!
//! Propagation core for conjunction screening:
//!
//! - Mean element sets with derived envelope quantities (perigee, apogee, regime)
//! - A `Propagator` capability with two-body/J2 and SGP4 backends
//! - Lazy trajectory sampling over an analysis window
//! - Inertial, Earth-fixed and RIC frame transforms

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub mod elements;
pub mod kepler;
pub mod propagation;
pub mod sampler;
pub mod state;
pub mod transforms;

pub use elements::{MissionPriority, ObjectType, OrbitRegime, OrbitalElementSet, TleLines};
pub use propagation::{Propagator, Sgp4Propagator, TwoBodyPropagator};
pub use sampler::{SampleGrid, SampleIter, TrajectorySampler, MAX_GRID_SLICES};
pub use state::{Frame, StateVector, Trajectory};

/// Earth gravitational parameter (km³/s²)
pub const MU_EARTH_KM3_S2: f64 = 398_600.4418;
/// WGS84 equatorial radius (km)
pub const EARTH_RADIUS_KM: f64 = 6378.137;
/// Second zonal harmonic
pub const J2: f64 = 1.082_626_68e-3;
/// Earth rotation rate (rad/s)
pub const EARTH_ROTATION_RATE_RAD_S: f64 = 7.292_115_9e-5;
pub const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrbitalError {
    #[error("Invalid TLE format: {0}")]
    InvalidTle(String),
    #[error("Stale elements for {id}: epoch is {age_hours:.1} h from target, limit {max_age_hours:.1} h")]
    StaleElements {
        id: String,
        age_hours: f64,
        max_age_hours: f64,
    },
    #[error("Propagation diverged for {id}: {reason}")]
    PropagationDivergence { id: String, reason: String },
    #[error("Kepler solver did not converge for {id} after {iterations} iterations (M={mean_anomaly:.6}, e={eccentricity:.6})")]
    KeplerNonConvergence {
        id: String,
        iterations: usize,
        mean_anomaly: f64,
        eccentricity: f64,
    },
    #[error("Trajectory for {id} is not strictly increasing at {epoch}")]
    NonMonotonicTrajectory { id: String, epoch: DateTime<Utc> },
    #[error("Invalid sampling request: {0}")]
    InvalidSampling(String),
}

impl OrbitalError {
    /// True for failures that mean the physics model produced no bounded solution.
    pub fn is_divergence(&self) -> bool {
        matches!(
            self,
            OrbitalError::PropagationDivergence { .. } | OrbitalError::KeplerNonConvergence { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OrbitalError>;

/// Signed seconds from `from` to `to`, microsecond resolution.
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to.signed_duration_since(from);
    match delta.num_microseconds() {
        Some(us) => us as f64 * 1e-6,
        None => delta.num_milliseconds() as f64 * 1e-3,
    }
}

/// `epoch` shifted by a fractional number of seconds, rounded to the microsecond.
pub fn offset_seconds(epoch: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    epoch + Duration::microseconds((seconds * 1e6).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_seconds_between_round_trip() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let t1 = offset_seconds(t0, 5400.25);
        assert!((seconds_between(t0, t1) - 5400.25).abs() < 1e-6);
        assert!((seconds_between(t1, t0) + 5400.25).abs() < 1e-6);
    }

    #[test]
    fn test_divergence_classification() {
        let kepler = OrbitalError::KeplerNonConvergence {
            id: "X".into(),
            iterations: 50,
            mean_anomaly: 1.0,
            eccentricity: 0.99,
        };
        assert!(kepler.is_divergence());
        let stale = OrbitalError::StaleElements {
            id: "X".into(),
            age_hours: 200.0,
            max_age_hours: 168.0,
        };
        assert!(!stale.is_divergence());
    }
}
