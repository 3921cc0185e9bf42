//! Collision risk assessment
//!
//! Geometry at TCA is projected onto the encounter plane (normal to the
//! relative velocity). The combined position covariance of both objects,
//! given per object as RIC standard deviations, is rotated into the inertial
//! frame, summed and projected onto that plane. Pc is the integral of the
//! resulting 2D Gaussian over the combined hard-body disk.
//!
//! In the covariance eigenframe (narrow axis `u`, wide axis `w`) the `w`
//! integral over each chord of the disk is an erf difference, leaving
//!
//! ```text
//! Pc = ∫ N(u; m_u, σ_u) · P(|w| ≤ √(R² − u²)) du,   u = R sin φ
//! ```
//!
//! The `u` range is clipped to the disk and to 8σ_u around the miss, and
//! the φ range is split into Gauss–Legendre panels no wider than σ_u/R, so
//! disks far larger than the uncertainty still land nodes on the mass.
//! Without a covariance for either object the assessment falls back to
//! miss-distance tiers and carries no probability.

use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use orbital_mechanics::transforms::ric_covariance_to_eci;
use orbital_mechanics::StateVector;
use serde::{Deserialize, Serialize};
use statrs::function::erf::{erf, erfc};
use std::f64::consts::{PI, SQRT_2, TAU};

use crate::config::{ConfigError, RiskConfig};
use crate::{ConjunctionEvent, RiskLevel};

/// Gauss–Legendre order inside each panel
const PANEL_NODES: usize = 16;
const MIN_PANELS: usize = 4;
const MAX_PANELS: usize = 1024;
/// Narrow-axis mass beyond this many σ from the miss is dropped
const TAIL_SIGMAS: f64 = 8.0;

/// Relative speeds below this leave the encounter plane undefined (km/s)
const MIN_RELATIVE_SPEED_KM_S: f64 = 1e-9;

/// 1σ position uncertainty in the object's own RIC frame (km)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RicSigma {
    pub radial_km: f64,
    pub in_track_km: f64,
    pub cross_track_km: f64,
}

impl Default for RicSigma {
    fn default() -> Self {
        Self {
            radial_km: 0.1,
            in_track_km: 0.5,
            cross_track_km: 0.1,
        }
    }
}

impl RicSigma {
    pub fn isotropic(sigma_km: f64) -> Self {
        Self {
            radial_km: sigma_km,
            in_track_km: sigma_km,
            cross_track_km: sigma_km,
        }
    }

    pub fn covariance_ric(&self) -> Matrix3<f64> {
        Matrix3::from_diagonal(&Vector3::new(
            self.radial_km.powi(2),
            self.in_track_km.powi(2),
            self.cross_track_km.powi(2),
        ))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("risk covariance radial_km", self.radial_km),
            ("risk covariance in_track_km", self.in_track_km),
            ("risk covariance cross_track_km", self.cross_track_km),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::NotPositive { field, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssessmentMethod {
    /// Pc integrated over the hard-body disk in the encounter plane
    EncounterPlane,
    /// Severity from miss distance alone, no probability
    MissDistanceOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub collision_probability: Option<f64>,
    pub risk_level: RiskLevel,
    pub method: AssessmentMethod,
    pub uncertainty_modeled: bool,
    /// Sum of both objects' radii (m)
    pub hard_body_radius_m: f64,
    pub primary_sigma: Option<RicSigma>,
    pub secondary_sigma: Option<RicSigma>,
    /// Combined covariance projected on the encounter plane (km²)
    pub encounter_covariance: Option<Matrix2<f64>>,
    /// Miss vector in encounter-plane coordinates (km)
    pub encounter_miss_km: Option<Vector2<f64>>,
    /// 1 inside the critical distance, 0 beyond the monitoring distance
    pub proximity_score: f64,
}

/// Gauss–Legendre nodes and weights on [-1, 1].
fn gauss_legendre(order: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; order];
    let mut weights = vec![0.0; order];
    let n = order as f64;
    for i in 0..order.div_ceil(2) {
        let mut x = (PI * (i as f64 + 0.75) / (n + 0.5)).cos();
        let mut derivative = 1.0;
        for _ in 0..100 {
            let (mut p0, mut p1) = (1.0, x);
            for k in 2..=order {
                let k = k as f64;
                let p2 = ((2.0 * k - 1.0) * x * p1 - (k - 1.0) * p0) / k;
                p0 = p1;
                p1 = p2;
            }
            derivative = n * (x * p1 - p0) / (x * x - 1.0);
            let dx = p1 / derivative;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let w = 2.0 / ((1.0 - x * x) * derivative * derivative);
        nodes[i] = -x;
        nodes[order - 1 - i] = x;
        weights[i] = w;
        weights[order - 1 - i] = w;
    }
    (nodes, weights)
}

/// P(lo < Z < hi) for a standard normal Z, using erfc in the tails.
fn normal_interval(lo: f64, hi: f64) -> f64 {
    if lo >= 0.0 {
        0.5 * (erfc(lo / SQRT_2) - erfc(hi / SQRT_2))
    } else if hi <= 0.0 {
        0.5 * (erfc(-hi / SQRT_2) - erfc(-lo / SQRT_2))
    } else {
        0.5 * (erf(hi / SQRT_2) - erf(lo / SQRT_2))
    }
}

/// Orthonormal encounter-plane axes for relative position `r` and velocity `v`.
///
/// The first axis points along the miss vector when one exists.
fn encounter_axes(r: &Vector3<f64>, v: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let any_perpendicular = |n: &Vector3<f64>| {
        let trial = if n.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
        n.cross(&trial).normalize()
    };

    let normal = match v.try_normalize(MIN_RELATIVE_SPEED_KM_S) {
        Some(n) => n,
        // Co-moving objects: any plane containing the miss vector
        None => r
            .try_normalize(1e-12)
            .map(|r_hat| any_perpendicular(&r_hat))
            .unwrap_or_else(Vector3::z),
    };
    let in_plane = r - normal * r.dot(&normal);
    let e1 = in_plane
        .try_normalize(1e-12)
        .unwrap_or_else(|| any_perpendicular(&normal));
    let e2 = normal.cross(&e1);
    (e1, e2)
}

pub struct RiskAssessor<'c> {
    config: &'c RiskConfig,
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl<'c> RiskAssessor<'c> {
    pub fn new(config: &'c RiskConfig) -> Self {
        let (nodes, weights) = gauss_legendre(PANEL_NODES);
        Self {
            config,
            nodes,
            weights,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        self.config
    }

    pub fn proximity_score(&self, miss_km: f64) -> f64 {
        let critical = self.config.critical_distance_km;
        let monitoring = self.config.monitoring_distance_km;
        ((monitoring - miss_km) / (monitoring - critical)).clamp(0.0, 1.0)
    }

    /// Probability that the miss vector `miss` (2D, km) falls inside a disk of
    /// `radius_km` under covariance `covariance`. `None` for singular covariances.
    pub fn disk_probability(
        &self,
        miss: &Vector2<f64>,
        covariance: &Matrix2<f64>,
        radius_km: f64,
    ) -> Option<f64> {
        if !(radius_km > 0.0) {
            return Some(0.0);
        }
        let symmetric = 0.5 * (covariance + covariance.transpose());
        if !symmetric.iter().all(|c| c.is_finite()) || symmetric.determinant() <= 0.0 {
            return None;
        }
        let eigen = symmetric.symmetric_eigen();
        let (narrow, wide) = if eigen.eigenvalues[0] <= eigen.eigenvalues[1] {
            (0, 1)
        } else {
            (1, 0)
        };
        if !(eigen.eigenvalues[narrow] > 0.0) {
            return None;
        }
        let sigma_u = eigen.eigenvalues[narrow].sqrt();
        let sigma_w = eigen.eigenvalues[wide].sqrt();
        let m_u = miss.dot(&eigen.eigenvectors.column(narrow));
        let m_w = miss.dot(&eigen.eigenvectors.column(wide));

        let lo = (m_u - TAIL_SIGMAS * sigma_u).max(-radius_km);
        let hi = (m_u + TAIL_SIGMAS * sigma_u).min(radius_km);
        if lo >= hi {
            return Some(0.0);
        }
        let phi_lo = (lo / radius_km).clamp(-1.0, 1.0).asin();
        let phi_hi = (hi / radius_km).clamp(-1.0, 1.0).asin();
        let span = phi_hi - phi_lo;
        let panels = ((span * radius_km / sigma_u).ceil() as usize).clamp(MIN_PANELS, MAX_PANELS);
        let width = span / panels as f64;
        let density = 1.0 / (sigma_u * TAU.sqrt());

        let mut total = 0.0;
        for panel in 0..panels {
            let left = phi_lo + panel as f64 * width;
            for (node, weight) in self.nodes.iter().zip(&self.weights) {
                let (sin, cos) = (left + 0.5 * width * (node + 1.0)).sin_cos();
                let u = radius_km * sin;
                // Half chord of the disk at u, also the Jacobian du/dφ
                let half_chord = radius_km * cos;
                let z = (u - m_u) / sigma_u;
                let chord_mass =
                    normal_interval((-half_chord - m_w) / sigma_w, (half_chord - m_w) / sigma_w);
                total += weight * density * (-0.5 * z * z).exp() * chord_mass * half_chord;
            }
        }
        let probability = 0.5 * width * total;
        Some(probability.clamp(0.0, 1.0))
    }

    /// Assess the geometry between two inertial states at (or near) TCA.
    pub fn assess_states(
        &self,
        primary_id: &str,
        primary: &StateVector,
        secondary_id: &str,
        secondary: &StateVector,
    ) -> RiskAssessment {
        let primary = primary.to_inertial();
        let secondary = secondary.to_inertial();
        let r = primary.relative_position(&secondary);
        let v = primary.relative_velocity(&secondary);
        let miss_km = r.norm();

        let hard_body_radius_m = self.config.hard_body_radius_m(primary_id)
            + self.config.hard_body_radius_m(secondary_id);
        let primary_sigma = self.config.covariance(primary_id);
        let secondary_sigma = self.config.covariance(secondary_id);

        let encounter = match (primary_sigma, secondary_sigma) {
            (Some(sa), Some(sb)) => {
                let ca = ric_covariance_to_eci(&sa.covariance_ric(), &primary);
                let cb = ric_covariance_to_eci(&sb.covariance_ric(), &secondary);
                ca.zip(cb).and_then(|(ca, cb)| {
                    let (e1, e2) = encounter_axes(&r, &v);
                    let combined = ca + cb;
                    let projected = Matrix2::new(
                        e1.dot(&(combined * e1)),
                        e1.dot(&(combined * e2)),
                        e2.dot(&(combined * e1)),
                        e2.dot(&(combined * e2)),
                    );
                    let miss = Vector2::new(r.dot(&e1), r.dot(&e2));
                    self.disk_probability(&miss, &projected, hard_body_radius_m / 1000.0)
                        .map(|pc| (pc, projected, miss))
                })
            }
            _ => None,
        };

        let proximity_score = self.proximity_score(miss_km);
        match encounter {
            Some((pc, projected, miss)) => RiskAssessment {
                collision_probability: Some(pc),
                risk_level: self.config.probability_thresholds.classify(pc),
                method: AssessmentMethod::EncounterPlane,
                uncertainty_modeled: true,
                hard_body_radius_m,
                primary_sigma,
                secondary_sigma,
                encounter_covariance: Some(projected),
                encounter_miss_km: Some(miss),
                proximity_score,
            },
            None => RiskAssessment {
                collision_probability: None,
                risk_level: self.config.miss_distance_thresholds.classify(miss_km),
                method: AssessmentMethod::MissDistanceOnly,
                uncertainty_modeled: false,
                hard_body_radius_m,
                primary_sigma,
                secondary_sigma,
                encounter_covariance: None,
                encounter_miss_km: None,
                proximity_score,
            },
        }
    }

    /// Attach a risk assessment to a detected event.
    pub fn assess(&self, mut event: ConjunctionEvent) -> ConjunctionEvent {
        event.risk = Some(self.assess_states(
            &event.primary_object,
            &event.primary_state,
            &event.secondary_object,
            &event.secondary_state,
        ));
        event
    }
}
