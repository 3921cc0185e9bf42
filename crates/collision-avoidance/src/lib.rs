//! Collision Avoidance Library
//!
//! Conjunction screening, collision risk assessment and avoidance maneuver
//! planning over a catalog of element sets. One call to
//! [`CollisionAssessment::run_cycle`] runs the whole pipeline:
//!
//! ```text
//! sample ─▶ prune ─▶ detect ─▶ assess ─▶ plan
//! ```
//!
//! - `pruner`: regime envelopes then spatial-temporal buckets → `CandidatePair`s
//! - `detector`: fine sampling and golden-section TCA refinement
//! - `risk`: encounter-plane Pc with per-object RIC covariances
//! - `maneuver`: axis bracketing plus pattern search for the cheapest safe Δv
//! - `pipeline`: the cycle on a rayon pool, warnings and partial results

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use orbital_mechanics::{OrbitalElementSet, OrbitalError, Propagator, StateVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod config;
pub mod context;
pub mod detector;
pub mod ephemeris;
pub mod maneuver;
pub mod pipeline;
pub mod pruner;
pub mod risk;

pub use config::{ConfigError, ScreeningConfig};
pub use context::{CancelToken, CycleContext};
pub use detector::{Approach, FineDetector};
pub use ephemeris::{ElementEphemeris, Ephemeris, ManeuveredEphemeris};
pub use maneuver::{ManeuverOptimizer, ManeuverProblem, Termination};
pub use pipeline::{CycleReport, CycleWarning, ManeuverFailure};
pub use pruner::{CandidatePair, PairPruner, PruneStats, SatelliteTrack};
pub use risk::{AssessmentMethod, RicSigma, RiskAssessment, RiskAssessor};

#[derive(Error, Debug)]
pub enum CollisionError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),
    #[error("Propagation failed: {0}")]
    PropagationFailed(#[from] OrbitalError),
    #[error("No feasible maneuver for event {event_id}: {reason}")]
    NoFeasibleManeuver {
        event_id: String,
        reason: String,
        /// Largest miss distance any evaluated candidate reached
        best_miss_km: Option<f64>,
    },
    #[error("Maneuver search for event {event_id} stopped after {evaluations} evaluations")]
    SearchInterrupted { event_id: String, evaluations: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),
    #[error("Worker pool unavailable: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, CollisionError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EncounterKind {
    Collision,
    /// Slow, very close approach: rendezvous, docking or formation flight
    Docking,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConjunctionEvent {
    pub id: String,
    pub primary_object: String,
    pub secondary_object: String,
    pub tca: DateTime<Utc>,
    pub miss_distance_km: f64,
    pub relative_velocity_km_s: f64,
    pub primary_state: StateVector,
    pub secondary_state: StateVector,
    pub kind: EncounterKind,
    /// TCA refinement fell back to the best sampled point
    pub reduced_confidence: bool,
    pub risk: Option<RiskAssessment>,
}

impl ConjunctionEvent {
    /// Deterministic id from the pair and the TCA (µs).
    pub fn event_id(primary: &str, secondary: &str, tca: DateTime<Utc>) -> String {
        let key = format!("{}|{}|{}", primary, secondary, tca.timestamp_micros());
        Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk
            .as_ref()
            .map(|r| r.risk_level)
            .unwrap_or_default()
    }

    pub fn collision_probability(&self) -> Option<f64> {
        self.risk.as_ref().and_then(|r| r.collision_probability)
    }

    /// Collision-class event at or above `threshold`.
    pub fn is_actionable(&self, threshold: RiskLevel) -> bool {
        self.kind == EncounterKind::Collision && self.risk_level() >= threshold
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ManeuverType {
    InTrack,
    CrossTrack,
    Radial,
    Combined,
}

impl ManeuverType {
    /// Dominant RIC axis of a Δv, or `Combined` when none carries 95% of it.
    pub fn from_ric(delta_v_ric: &Vector3<f64>) -> Self {
        let norm = delta_v_ric.norm();
        if norm == 0.0 {
            return ManeuverType::Combined;
        }
        let dominant = |c: f64| c.abs() >= 0.95 * norm;
        if dominant(delta_v_ric.y) {
            ManeuverType::InTrack
        } else if dominant(delta_v_ric.z) {
            ManeuverType::CrossTrack
        } else if dominant(delta_v_ric.x) {
            ManeuverType::Radial
        } else {
            ManeuverType::Combined
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManeuverPlan {
    pub id: String,
    pub event_id: String,
    /// Object that performs the burn
    pub target_object: String,
    pub other_object: String,
    pub maneuver_type: ManeuverType,
    pub burn_epoch: DateTime<Utc>,
    pub delta_v_eci_m_s: Vector3<f64>,
    /// Radial, in-track, cross-track at the burn epoch
    pub delta_v_ric_m_s: Vector3<f64>,
    pub delta_v_magnitude_m_s: f64,
    pub fuel_cost_kg: f64,
    pub original_miss_distance_km: f64,
    pub new_miss_distance_km: f64,
    pub new_tca: DateTime<Utc>,
    pub new_risk_level: RiskLevel,
    pub new_collision_probability: Option<f64>,
    pub required_miss_distance_km: f64,
    pub feasible: bool,
    pub iterations: usize,
    pub termination: Termination,
}

// ============================================================================
// Facade
// ============================================================================

/// Validated configuration plus propagator; runs screening cycles.
pub struct CollisionAssessment {
    config: ScreeningConfig,
    propagator: Box<dyn Propagator>,
}

impl CollisionAssessment {
    /// Validate `config` and build the propagator it selects.
    pub fn new(config: ScreeningConfig) -> Result<Self> {
        config.validate()?;
        let propagator = config.build_propagator();
        Ok(Self { config, propagator })
    }

    /// Use a caller-supplied propagation backend.
    pub fn with_propagator(config: ScreeningConfig, propagator: Box<dyn Propagator>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, propagator })
    }

    pub fn config(&self) -> &ScreeningConfig {
        &self.config
    }

    pub fn propagator(&self) -> &dyn Propagator {
        self.propagator.as_ref()
    }

    /// One cycle that only the configured timeout can stop.
    pub fn run_cycle(&self, catalog: &[OrbitalElementSet]) -> Result<pipeline::CycleReport> {
        self.run_cycle_with(catalog, CancelToken::new())
    }

    /// One cycle stopped early once `cancel` is cancelled. The token only
    /// governs this call; pass a fresh one per cycle.
    pub fn run_cycle_with(
        &self,
        catalog: &[OrbitalElementSet],
        cancel: CancelToken,
    ) -> Result<pipeline::CycleReport> {
        pipeline::run_cycle(catalog, &self.config, self.propagator.as_ref(), cancel)
    }

    /// Re-assess a single event against this configuration.
    pub fn assess_event(&self, event: ConjunctionEvent) -> ConjunctionEvent {
        RiskAssessor::new(&self.config.risk).assess(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_levels_are_ordered() {
        assert!(RiskLevel::None < RiskLevel::Low);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert!(RiskLevel::Medium >= RiskLevel::Medium);
    }

    #[test]
    fn test_event_id_is_deterministic() {
        let tca = DateTime::parse_from_rfc3339("2025-01-01T00:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = ConjunctionEvent::event_id("SAT-1", "SAT-2", tca);
        let b = ConjunctionEvent::event_id("SAT-1", "SAT-2", tca);
        let c = ConjunctionEvent::event_id("SAT-2", "SAT-1", tca);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_maneuver_type_from_dominant_axis() {
        assert_eq!(
            ManeuverType::from_ric(&Vector3::new(0.0, 0.3, 0.01)),
            ManeuverType::InTrack
        );
        assert_eq!(
            ManeuverType::from_ric(&Vector3::new(0.0, 0.0, -1.0)),
            ManeuverType::CrossTrack
        );
        assert_eq!(
            ManeuverType::from_ric(&Vector3::new(0.2, 0.0, 0.0)),
            ManeuverType::Radial
        );
        assert_eq!(
            ManeuverType::from_ric(&Vector3::new(0.2, 0.2, 0.0)),
            ManeuverType::Combined
        );
    }

    #[test]
    fn test_cancelled_cycle_does_not_stop_the_next() {
        use chrono::TimeZone;
        use orbital_mechanics::TwoBodyPropagator;

        let epoch = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let catalog = fuzz_harness::generators::crossing_circular_pair(
            epoch,
            epoch + chrono::Duration::hours(1),
            7_000.0,
            8.0,
        );
        let mut config = ScreeningConfig::default();
        config.window.duration_hours = 3.0;
        config.execution.worker_threads = 2;
        let assessment =
            CollisionAssessment::with_propagator(config, Box::new(TwoBodyPropagator::keplerian()))
                .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let stopped = assessment.run_cycle_with(&catalog, cancel.clone()).unwrap();
        assert!(stopped.timed_out);
        assert!(stopped.events.is_empty());

        let next = assessment.run_cycle(&catalog).unwrap();
        assert!(!next.timed_out);
        assert_eq!(next.events.len(), 1);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_invalid_config_rejected_by_facade() {
        let mut config = ScreeningConfig::default();
        config.maneuver.max_delta_v_m_s = -1.0;
        assert!(matches!(
            CollisionAssessment::new(config),
            Err(CollisionError::InvalidConfig(_))
        ));
    }
}
