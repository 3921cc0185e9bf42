//! State vectors and sampled trajectories

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::transforms;
use crate::{OrbitalError, Result};

/// Reference frame of a state vector.
///
/// `Inertial` is the propagators' output frame (TEME for SGP4, mean-of-epoch
/// for the two-body model); both are treated as the same inertial frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Frame {
    #[default]
    Inertial,
    EarthFixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateVector {
    /// Position (km)
    pub position: Vector3<f64>,
    /// Velocity (km/s)
    pub velocity: Vector3<f64>,
    pub epoch: DateTime<Utc>,
    /// Identifier of the element set this state was propagated from
    pub source: Arc<str>,
    #[serde(default)]
    pub frame: Frame,
}

impl StateVector {
    pub fn new(
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        epoch: DateTime<Utc>,
        source: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            position,
            velocity,
            epoch,
            source: source.into(),
            frame: Frame::Inertial,
        }
    }

    pub fn radius_km(&self) -> f64 {
        self.position.norm()
    }

    pub fn speed_km_s(&self) -> f64 {
        self.velocity.norm()
    }

    /// Same state expressed in the inertial frame.
    pub fn to_inertial(&self) -> StateVector {
        match self.frame {
            Frame::Inertial => self.clone(),
            Frame::EarthFixed => transforms::ecef_to_eci(self),
        }
    }

    /// Same state expressed in the Earth-fixed frame.
    pub fn to_earth_fixed(&self) -> StateVector {
        match self.frame {
            Frame::EarthFixed => self.clone(),
            Frame::Inertial => transforms::eci_to_ecef(self),
        }
    }

    /// Impulsive burn: same position, velocity shifted by `delta_v_km_s` (inertial).
    pub fn with_delta_v(&self, delta_v_km_s: &Vector3<f64>) -> StateVector {
        let mut burned = self.to_inertial();
        burned.velocity += delta_v_km_s;
        burned
    }

    /// Relative position `other - self` in the inertial frame (km).
    pub fn relative_position(&self, other: &StateVector) -> Vector3<f64> {
        other.to_inertial().position - self.to_inertial().position
    }

    /// Relative velocity `other - self` in the inertial frame (km/s).
    pub fn relative_velocity(&self, other: &StateVector) -> Vector3<f64> {
        other.to_inertial().velocity - self.to_inertial().velocity
    }

    pub fn separation_km(&self, other: &StateVector) -> f64 {
        self.relative_position(other).norm()
    }
}

/// Ordered samples for one satellite; timestamps strictly increasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    satellite_id: Arc<str>,
    samples: Vec<StateVector>,
}

impl Trajectory {
    pub fn new(satellite_id: impl Into<Arc<str>>) -> Self {
        Self::with_capacity(satellite_id, 0)
    }

    pub fn with_capacity(satellite_id: impl Into<Arc<str>>, capacity: usize) -> Self {
        Self {
            satellite_id: satellite_id.into(),
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Append a sample; rejects anything not strictly after the last one.
    pub fn push(&mut self, state: StateVector) -> Result<()> {
        if let Some(last) = self.samples.last() {
            if state.epoch <= last.epoch {
                return Err(OrbitalError::NonMonotonicTrajectory {
                    id: self.satellite_id.to_string(),
                    epoch: state.epoch,
                });
            }
        }
        self.samples.push(state);
        Ok(())
    }

    pub fn satellite_id(&self) -> &str {
        &self.satellite_id
    }

    pub fn samples(&self) -> &[StateVector] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&StateVector> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&StateVector> {
        self.samples.last()
    }

    /// Largest sampled speed (km/s)
    pub fn max_speed_km_s(&self) -> f64 {
        self.samples
            .iter()
            .map(StateVector::speed_km_s)
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn state_at(epoch: DateTime<Utc>) -> StateVector {
        StateVector::new(
            Vector3::new(7000.0, 0.0, 0.0),
            Vector3::new(0.0, 7.5, 0.0),
            epoch,
            "SAT-1",
        )
    }

    #[test]
    fn test_trajectory_rejects_non_increasing_epochs() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut trajectory = Trajectory::new("SAT-1");
        trajectory.push(state_at(t0)).unwrap();
        trajectory.push(state_at(t0 + Duration::seconds(60))).unwrap();

        let duplicate = trajectory.push(state_at(t0 + Duration::seconds(60)));
        assert!(matches!(
            duplicate,
            Err(OrbitalError::NonMonotonicTrajectory { .. })
        ));
        assert!(trajectory.push(state_at(t0)).is_err());
        assert_eq!(trajectory.len(), 2);
    }

    #[test]
    fn test_delta_v_keeps_position() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let state = state_at(t0);
        let burned = state.with_delta_v(&Vector3::new(0.0, 0.001, 0.0));
        assert_eq!(burned.position, state.position);
        assert!((burned.velocity.y - 7.501).abs() < 1e-12);
    }

    #[test]
    fn test_separation_is_frame_independent() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = state_at(t0);
        let mut b = state_at(t0);
        b.position.z += 3.0;
        let b_fixed = b.to_earth_fixed();
        assert_eq!(b_fixed.frame, Frame::EarthFixed);
        assert!((a.separation_km(&b_fixed) - 3.0).abs() < 1e-9);
    }
}
