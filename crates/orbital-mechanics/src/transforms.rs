//! Frame transforms
//!
//! - Inertial ↔ Earth-fixed rotation about the pole by GMST (IAU-82)
//! - Inertial ↔ RIC (radial, in-track, cross-track) local orbital frame

use chrono::{DateTime, Utc};
use nalgebra::{Matrix3, Vector3};
use std::f64::consts::TAU;

use crate::state::{Frame, StateVector};
use crate::EARTH_ROTATION_RATE_RAD_S;

const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const J2000_JD: f64 = 2_451_545.0;

/// Greenwich mean sidereal time (rad) at `epoch`.
pub fn gmst_rad(epoch: DateTime<Utc>) -> f64 {
    let unix_seconds =
        epoch.timestamp() as f64 + f64::from(epoch.timestamp_subsec_nanos()) * 1e-9;
    let jd = unix_seconds / 86_400.0 + UNIX_EPOCH_JD;
    let t = (jd - J2000_JD) / 36_525.0;
    let gmst_seconds = 67_310.548_41
        + (876_600.0 * 3600.0 + 8_640_184.812_866) * t
        + 0.093_104 * t * t
        - 6.2e-6 * t * t * t;
    (gmst_seconds.rem_euclid(86_400.0) / 240.0).to_radians().rem_euclid(TAU)
}

fn rotation_z(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, s, 0.0, -s, c, 0.0, 0.0, 0.0, 1.0)
}

fn earth_rate() -> Vector3<f64> {
    Vector3::new(0.0, 0.0, EARTH_ROTATION_RATE_RAD_S)
}

/// Inertial → Earth-fixed. States already Earth-fixed are returned unchanged.
pub fn eci_to_ecef(state: &StateVector) -> StateVector {
    if state.frame == Frame::EarthFixed {
        return state.clone();
    }
    let rot = rotation_z(gmst_rad(state.epoch));
    let position = rot * state.position;
    let velocity = rot * state.velocity - earth_rate().cross(&position);
    StateVector {
        position,
        velocity,
        epoch: state.epoch,
        source: state.source.clone(),
        frame: Frame::EarthFixed,
    }
}

/// Earth-fixed → inertial. States already inertial are returned unchanged.
pub fn ecef_to_eci(state: &StateVector) -> StateVector {
    if state.frame == Frame::Inertial {
        return state.clone();
    }
    let rot_t = rotation_z(gmst_rad(state.epoch)).transpose();
    let position = rot_t * state.position;
    let velocity = rot_t * (state.velocity + earth_rate().cross(&state.position));
    StateVector {
        position,
        velocity,
        epoch: state.epoch,
        source: state.source.clone(),
        frame: Frame::Inertial,
    }
}

/// RIC basis of an inertial state; columns are R̂, Î, Ĉ.
///
/// Returns `None` when position and velocity are parallel (no orbit plane).
pub fn ric_basis(position: &Vector3<f64>, velocity: &Vector3<f64>) -> Option<Matrix3<f64>> {
    let radial = position.try_normalize(1e-12)?;
    let cross_track = position.cross(velocity).try_normalize(1e-12)?;
    let in_track = cross_track.cross(&radial);
    Some(Matrix3::from_columns(&[radial, in_track, cross_track]))
}

/// Express an inertial vector in the RIC frame of `reference`.
pub fn eci_to_ric(vector: &Vector3<f64>, reference: &StateVector) -> Option<Vector3<f64>> {
    let inertial = reference.to_inertial();
    let basis = ric_basis(&inertial.position, &inertial.velocity)?;
    Some(basis.transpose() * vector)
}

/// Express a RIC vector of `reference` in the inertial frame.
pub fn ric_to_eci(vector: &Vector3<f64>, reference: &StateVector) -> Option<Vector3<f64>> {
    let inertial = reference.to_inertial();
    let basis = ric_basis(&inertial.position, &inertial.velocity)?;
    Some(basis * vector)
}

/// Rotate a RIC covariance of `reference` into the inertial frame.
pub fn ric_covariance_to_eci(
    covariance_ric: &Matrix3<f64>,
    reference: &StateVector,
) -> Option<Matrix3<f64>> {
    let inertial = reference.to_inertial();
    let basis = ric_basis(&inertial.position, &inertial.velocity)?;
    Some(basis * covariance_ric * basis.transpose())
}
