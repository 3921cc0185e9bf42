//! Screening configuration
//!
//! Every threshold and budget the cycle depends on lives here. Sections map
//! onto pipeline stages:
//!
//! - `window` / `propagation`: what gets sampled and with which model
//! - `pruning` / `detection`: candidate generation and TCA refinement
//! - `risk`: hard-body radii, covariances, severity thresholds
//! - `maneuver`: optimizer budgets and the safety floor
//! - `execution`: worker pool size and cycle timeout
//!
//! A config is validated once, before any computation; an invalid config
//! rejects the whole cycle.

use chrono::{DateTime, Duration, Utc};
use orbital_mechanics::{Propagator, Sgp4Propagator, TwoBodyPropagator, MAX_GRID_SLICES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::risk::RicSigma;
use crate::RiskLevel;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("Probability thresholds must satisfy 0 < low <= medium <= high <= critical <= 1")]
    ThresholdOrder,
    #[error("Miss-distance thresholds must satisfy critical <= high <= medium <= low")]
    MissThresholdOrder,
    #[error("{field} exceeds {limit}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        limit: f64,
    },
    #[error("{field} would produce {samples} samples over the window, limit is {limit}")]
    TooManySamples {
        field: &'static str,
        samples: f64,
        limit: usize,
    },
    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Longest analysis window, lead time or evaluation span (one leap year)
pub const MAX_HORIZON_HOURS: f64 = 24.0 * 366.0;
/// Oldest element set the age gate may be configured to accept (hours)
pub const MAX_ELEMENT_AGE_LIMIT_HOURS: f64 = 100.0 * MAX_HORIZON_HOURS;

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Analysis window start; the newest element epoch in the catalog when unset
    pub start: Option<DateTime<Utc>>,
    pub duration_hours: f64,
    /// Coarse sampling step feeding the pruner
    pub sample_step_seconds: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start: None,
            duration_hours: 24.0,
            sample_step_seconds: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropagationModel {
    TwoBody,
    #[default]
    TwoBodyJ2,
    Sgp4,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PropagationConfig {
    pub model: PropagationModel,
    /// Maximum |target - epoch| before an element set counts as stale
    pub max_element_age_hours: f64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            model: PropagationModel::TwoBodyJ2,
            max_element_age_hours: 168.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PruningConfig {
    /// Added to the screening distance when widening perigee/apogee envelopes
    pub regime_margin_km: f64,
    /// Added to the screening distance when sizing bucket cells
    pub bucket_margin_km: f64,
    /// Inflation applied to the fastest orbital speed in the cell size
    pub speed_margin_factor: f64,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            regime_margin_km: 25.0,
            bucket_margin_km: 5.0,
            speed_margin_factor: 1.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub screening_distance_km: f64,
    pub fine_step_seconds: f64,
    pub tca_tolerance_seconds: f64,
    pub max_refine_iterations: usize,
    /// Below both of these an encounter is classified as docking/formation
    pub docking_distance_km: f64,
    pub docking_relative_speed_km_s: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            screening_distance_km: 10.0,
            fine_step_seconds: 5.0,
            tca_tolerance_seconds: 1e-3,
            max_refine_iterations: 100,
            docking_distance_km: 1.0,
            docking_relative_speed_km_s: 0.01,
        }
    }
}

/// Probability cut-offs for each severity tier (lower bounds)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbabilityThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for ProbabilityThresholds {
    fn default() -> Self {
        Self {
            low: 1e-6,
            medium: 1e-4,
            high: 1e-3,
            critical: 1e-2,
        }
    }
}

impl ProbabilityThresholds {
    pub fn classify(&self, probability: f64) -> RiskLevel {
        match probability {
            p if p >= self.critical => RiskLevel::Critical,
            p if p >= self.high => RiskLevel::High,
            p if p >= self.medium => RiskLevel::Medium,
            p if p >= self.low => RiskLevel::Low,
            _ => RiskLevel::None,
        }
    }
}

/// Miss-distance cut-offs used when no covariance is available (upper bounds, km)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MissDistanceThresholds {
    pub critical_km: f64,
    pub high_km: f64,
    pub medium_km: f64,
    pub low_km: f64,
}

impl Default for MissDistanceThresholds {
    fn default() -> Self {
        Self {
            critical_km: 0.5,
            high_km: 1.0,
            medium_km: 5.0,
            low_km: 10.0,
        }
    }
}

impl MissDistanceThresholds {
    pub fn classify(&self, miss_km: f64) -> RiskLevel {
        match miss_km {
            d if d <= self.critical_km => RiskLevel::Critical,
            d if d <= self.high_km => RiskLevel::High,
            d if d <= self.medium_km => RiskLevel::Medium,
            d if d <= self.low_km => RiskLevel::Low,
            _ => RiskLevel::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    pub default_hard_body_radius_m: f64,
    pub hard_body_radius_overrides_m: BTreeMap<String, f64>,
    /// Applied to every object without an override; `None` leaves it unmodeled
    pub default_covariance: Option<RicSigma>,
    pub covariance_overrides: BTreeMap<String, RicSigma>,
    pub probability_thresholds: ProbabilityThresholds,
    pub miss_distance_thresholds: MissDistanceThresholds,
    /// Events at or above this tier are sent to the maneuver optimizer
    pub action_threshold: RiskLevel,
    /// Proximity score is 1 at this distance and closer
    pub critical_distance_km: f64,
    /// Proximity score is 0 at this distance and beyond
    pub monitoring_distance_km: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            default_hard_body_radius_m: 5.0,
            hard_body_radius_overrides_m: BTreeMap::new(),
            default_covariance: Some(RicSigma::default()),
            covariance_overrides: BTreeMap::new(),
            probability_thresholds: ProbabilityThresholds::default(),
            miss_distance_thresholds: MissDistanceThresholds::default(),
            action_threshold: RiskLevel::High,
            critical_distance_km: 10.0,
            monitoring_distance_km: 75.0,
        }
    }
}

impl RiskConfig {
    pub fn hard_body_radius_m(&self, object_id: &str) -> f64 {
        self.hard_body_radius_overrides_m
            .get(object_id)
            .copied()
            .unwrap_or(self.default_hard_body_radius_m)
    }

    pub fn covariance(&self, object_id: &str) -> Option<RicSigma> {
        self.covariance_overrides
            .get(object_id)
            .copied()
            .or(self.default_covariance)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManeuverConfig {
    /// Fuel budget expressed as the largest allowed |Δv|
    pub max_delta_v_m_s: f64,
    /// Earliest burn, measured from the cycle reference time
    pub min_lead_time_minutes: f64,
    /// Preferred burn time before TCA
    pub preferred_lead_time_minutes: f64,
    /// Hard floor on the post-maneuver miss distance
    pub safety_floor_km: f64,
    /// Floor multiplier when either object is mission critical
    pub critical_margin_factor: f64,
    pub initial_delta_v_m_s: f64,
    /// Pattern-search convergence step
    pub min_step_m_s: f64,
    /// Candidate evaluations per event; the budget that shapes a plan
    pub max_iterations: usize,
    /// Wall-clock cap per event. A search cut short here reports
    /// `TimeBudget` and its plan depends on machine speed.
    pub time_budget_ms: u64,
    /// Improvements smaller than this count as a stall
    pub stall_epsilon_m_s: f64,
    pub stall_iterations: usize,
    /// Candidate evaluation covers TCA ± this many seconds
    pub evaluation_half_window_seconds: f64,
    pub spacecraft_mass_kg: f64,
    pub specific_impulse_s: f64,
}

impl Default for ManeuverConfig {
    fn default() -> Self {
        Self {
            max_delta_v_m_s: 2.0,
            min_lead_time_minutes: 30.0,
            preferred_lead_time_minutes: 60.0,
            safety_floor_km: 2.0,
            critical_margin_factor: 1.5,
            initial_delta_v_m_s: 0.05,
            min_step_m_s: 1e-3,
            max_iterations: 200,
            time_budget_ms: 60_000,
            stall_epsilon_m_s: 1e-4,
            stall_iterations: 8,
            evaluation_half_window_seconds: 600.0,
            spacecraft_mass_kg: 500.0,
            specific_impulse_s: 220.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Rayon pool size; 0 uses every available core
    pub worker_threads: usize,
    pub cycle_timeout_ms: Option<u64>,
}

// ============================================================================
// Top level
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ScreeningConfig {
    pub window: WindowConfig,
    pub propagation: PropagationConfig,
    pub pruning: PruningConfig,
    pub detection: DetectionConfig,
    pub risk: RiskConfig,
    pub maneuver: ManeuverConfig,
    pub execution: ExecutionConfig,
}

impl ScreeningConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading screening config from {:?}", path);
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn window_duration(&self) -> Duration {
        duration_from_seconds(self.window.duration_hours * 3600.0)
    }

    pub fn sample_step(&self) -> Duration {
        duration_from_seconds(self.window.sample_step_seconds)
    }

    pub fn max_element_age(&self) -> Duration {
        duration_from_seconds(self.propagation.max_element_age_hours * 3600.0)
    }

    pub fn cycle_timeout(&self) -> Option<Duration> {
        self.execution
            .cycle_timeout_ms
            .map(|ms| Duration::milliseconds(ms as i64))
    }

    /// Backend selected by `propagation.model`, with the configured age limit.
    pub fn build_propagator(&self) -> Box<dyn Propagator> {
        let max_age = Some(self.max_element_age());
        match self.propagation.model {
            PropagationModel::TwoBody => Box::new(
                TwoBodyPropagator::keplerian().with_max_element_age(max_age),
            ),
            PropagationModel::TwoBodyJ2 => {
                Box::new(TwoBodyPropagator::new().with_max_element_age(max_age))
            }
            PropagationModel::Sgp4 => Box::new(Sgp4Propagator::new().with_max_element_age(max_age)),
        }
    }

    /// Reject the config before any computation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let window = &self.window;
        positive("window.duration_hours", window.duration_hours)?;
        at_most("window.duration_hours", window.duration_hours, MAX_HORIZON_HOURS)?;
        positive("window.sample_step_seconds", window.sample_step_seconds)?;
        sample_count(
            "window.sample_step_seconds",
            window.duration_hours,
            window.sample_step_seconds,
        )?;
        positive(
            "propagation.max_element_age_hours",
            self.propagation.max_element_age_hours,
        )?;
        at_most(
            "propagation.max_element_age_hours",
            self.propagation.max_element_age_hours,
            MAX_ELEMENT_AGE_LIMIT_HOURS,
        )?;

        let pruning = &self.pruning;
        non_negative("pruning.regime_margin_km", pruning.regime_margin_km)?;
        non_negative("pruning.bucket_margin_km", pruning.bucket_margin_km)?;
        if !(pruning.speed_margin_factor >= 1.0) {
            return Err(ConfigError::Inconsistent(format!(
                "pruning.speed_margin_factor must be at least 1, got {}",
                pruning.speed_margin_factor
            )));
        }

        let detection = &self.detection;
        positive("detection.screening_distance_km", detection.screening_distance_km)?;
        positive("detection.fine_step_seconds", detection.fine_step_seconds)?;
        positive("detection.tca_tolerance_seconds", detection.tca_tolerance_seconds)?;
        positive(
            "detection.max_refine_iterations",
            detection.max_refine_iterations as f64,
        )?;
        non_negative("detection.docking_distance_km", detection.docking_distance_km)?;
        non_negative(
            "detection.docking_relative_speed_km_s",
            detection.docking_relative_speed_km_s,
        )?;
        if detection.fine_step_seconds > window.sample_step_seconds {
            return Err(ConfigError::Inconsistent(format!(
                "detection.fine_step_seconds ({}) exceeds window.sample_step_seconds ({})",
                detection.fine_step_seconds, window.sample_step_seconds
            )));
        }
        sample_count(
            "detection.fine_step_seconds",
            window.duration_hours,
            detection.fine_step_seconds,
        )?;

        let risk = &self.risk;
        non_negative("risk.default_hard_body_radius_m", risk.default_hard_body_radius_m)?;
        for radius in risk.hard_body_radius_overrides_m.values() {
            non_negative("risk.hard_body_radius_overrides_m", *radius)?;
        }
        for sigma in risk.default_covariance.iter().chain(risk.covariance_overrides.values()) {
            sigma.validate()?;
        }
        let p = &risk.probability_thresholds;
        let ordered = 0.0 < p.low && p.low <= p.medium && p.medium <= p.high && p.high <= p.critical;
        if !ordered || p.critical > 1.0 {
            return Err(ConfigError::ThresholdOrder);
        }
        let m = &risk.miss_distance_thresholds;
        let ordered = 0.0 <= m.critical_km
            && m.critical_km <= m.high_km
            && m.high_km <= m.medium_km
            && m.medium_km <= m.low_km;
        if !ordered {
            return Err(ConfigError::MissThresholdOrder);
        }
        if risk.action_threshold == RiskLevel::None {
            return Err(ConfigError::Inconsistent(
                "risk.action_threshold None would maneuver on every event".to_string(),
            ));
        }
        positive("risk.monitoring_distance_km", risk.monitoring_distance_km)?;
        non_negative("risk.critical_distance_km", risk.critical_distance_km)?;
        if risk.critical_distance_km >= risk.monitoring_distance_km {
            return Err(ConfigError::Inconsistent(
                "risk.critical_distance_km must be below risk.monitoring_distance_km".to_string(),
            ));
        }

        let maneuver = &self.maneuver;
        positive("maneuver.max_delta_v_m_s", maneuver.max_delta_v_m_s)?;
        non_negative("maneuver.min_lead_time_minutes", maneuver.min_lead_time_minutes)?;
        non_negative(
            "maneuver.preferred_lead_time_minutes",
            maneuver.preferred_lead_time_minutes,
        )?;
        let horizon_minutes = MAX_HORIZON_HOURS * 60.0;
        at_most("maneuver.min_lead_time_minutes", maneuver.min_lead_time_minutes, horizon_minutes)?;
        at_most(
            "maneuver.preferred_lead_time_minutes",
            maneuver.preferred_lead_time_minutes,
            horizon_minutes,
        )?;
        positive("maneuver.safety_floor_km", maneuver.safety_floor_km)?;
        if !(maneuver.critical_margin_factor >= 1.0) {
            return Err(ConfigError::Inconsistent(format!(
                "maneuver.critical_margin_factor must be at least 1, got {}",
                maneuver.critical_margin_factor
            )));
        }
        positive("maneuver.initial_delta_v_m_s", maneuver.initial_delta_v_m_s)?;
        positive("maneuver.min_step_m_s", maneuver.min_step_m_s)?;
        positive("maneuver.max_iterations", maneuver.max_iterations as f64)?;
        positive("maneuver.time_budget_ms", maneuver.time_budget_ms as f64)?;
        non_negative("maneuver.stall_epsilon_m_s", maneuver.stall_epsilon_m_s)?;
        positive("maneuver.stall_iterations", maneuver.stall_iterations as f64)?;
        positive(
            "maneuver.evaluation_half_window_seconds",
            maneuver.evaluation_half_window_seconds,
        )?;
        at_most(
            "maneuver.evaluation_half_window_seconds",
            maneuver.evaluation_half_window_seconds,
            MAX_HORIZON_HOURS * 3600.0,
        )?;
        positive("maneuver.spacecraft_mass_kg", maneuver.spacecraft_mass_kg)?;
        positive("maneuver.specific_impulse_s", maneuver.specific_impulse_s)?;
        if maneuver.initial_delta_v_m_s > maneuver.max_delta_v_m_s {
            return Err(ConfigError::Inconsistent(
                "maneuver.initial_delta_v_m_s exceeds maneuver.max_delta_v_m_s".to_string(),
            ));
        }

        if let Some(timeout) = self.execution.cycle_timeout_ms {
            positive("execution.cycle_timeout_ms", timeout as f64)?;
            at_most(
                "execution.cycle_timeout_ms",
                timeout as f64,
                MAX_HORIZON_HOURS * 3_600_000.0,
            )?;
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Negative { field, value })
    }
}

fn at_most(field: &'static str, value: f64, limit: f64) -> Result<(), ConfigError> {
    if value <= limit {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, limit })
    }
}

/// Slices a grid over `window_hours` at `step_seconds` would hold
fn sample_count(
    field: &'static str,
    window_hours: f64,
    step_seconds: f64,
) -> Result<(), ConfigError> {
    let samples = (window_hours * 3600.0 / step_seconds).ceil() + 1.0;
    if samples < MAX_GRID_SLICES as f64 {
        Ok(())
    } else {
        Err(ConfigError::TooManySamples {
            field,
            samples,
            limit: MAX_GRID_SLICES,
        })
    }
}

fn duration_from_seconds(seconds: f64) -> Duration {
    Duration::microseconds((seconds * 1e6).round() as i64)
}
