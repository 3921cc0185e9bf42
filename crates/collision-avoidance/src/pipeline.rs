//! Screening cycle
//!
//! One cycle over a frozen catalog:
//!
//! 1. Validate config and catalog (fatal on failure)
//! 2. Sample every satellite on the coarse grid, in parallel; satellites
//!    whose propagation fails are excluded with a warning
//! 3. Prune pairs (completes before any detection starts)
//! 4. Fine detection per candidate window, in parallel
//! 5. Risk assessment, deterministic ordering
//! 6. Maneuver search per actionable event, in parallel
//!
//! Cancellation and the cycle timeout stop new work at every stage; whatever
//! was finalized is still returned with `timed_out` set.

use chrono::{DateTime, Utc};
use orbital_mechanics::{OrbitalElementSet, Propagator, SampleGrid, Trajectory, TrajectorySampler};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::ScreeningConfig;
use crate::context::{CancelToken, CycleContext};
use crate::detector::FineDetector;
use crate::maneuver::{ManeuverOptimizer, ManeuverProblem};
use crate::pruner::{CandidatePair, PairPruner, PruneStats, SatelliteTrack};
use crate::risk::RiskAssessor;
use crate::{CollisionError, ConjunctionEvent, ManeuverPlan, Result};

/// Degraded or skipped work, recorded alongside the normal output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleWarning {
    SatelliteExcluded {
        satellite: String,
        reason: String,
    },
    PairSkipped {
        primary: String,
        secondary: String,
        window_start: DateTime<Utc>,
        reason: String,
    },
    ReducedConfidence {
        event_id: String,
        primary: String,
        secondary: String,
    },
    StageSkipped {
        stage: String,
        reason: String,
    },
}

/// An actionable event the optimizer could not resolve; needs an operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManeuverFailure {
    pub event_id: String,
    pub primary: String,
    pub secondary: String,
    pub reason: String,
    pub best_miss_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub propagator: String,
    pub satellites_screened: usize,
    pub events: Vec<ConjunctionEvent>,
    pub plans: Vec<ManeuverPlan>,
    pub maneuver_failures: Vec<ManeuverFailure>,
    pub warnings: Vec<CycleWarning>,
    pub prune_stats: PruneStats,
    pub timed_out: bool,
}

impl CycleReport {
    fn empty(ctx: &CycleContext<'_>) -> Self {
        Self {
            window_start: ctx.window_start,
            window_end: ctx.window_end,
            propagator: ctx.propagator().name().to_string(),
            satellites_screened: 0,
            events: Vec::new(),
            plans: Vec::new(),
            maneuver_failures: Vec::new(),
            warnings: Vec::new(),
            prune_stats: PruneStats::default(),
            timed_out: false,
        }
    }

    fn skipped(&mut self, stage: &str, reason: String) {
        warn!("Stage {} skipped: {}", stage, reason);
        self.warnings.push(CycleWarning::StageSkipped {
            stage: stage.to_string(),
            reason,
        });
    }

    /// Fold one search outcome into the report. `false` when the search was
    /// stopped before it reached a plan or a verdict.
    fn record_plan(&mut self, event: &ConjunctionEvent, outcome: Result<ManeuverPlan>) -> bool {
        match outcome {
            Ok(plan) => self.plans.push(plan),
            Err(CollisionError::SearchInterrupted { evaluations, .. }) => {
                debug!(
                    "Maneuver search for event {} stopped after {} evaluations",
                    event.id, evaluations
                );
                return false;
            }
            Err(e) => {
                warn!("No maneuver for event {}: {}", event.id, e);
                let best_miss_km = match &e {
                    CollisionError::NoFeasibleManeuver { best_miss_km, .. } => *best_miss_km,
                    _ => None,
                };
                self.maneuver_failures.push(ManeuverFailure {
                    event_id: event.id.clone(),
                    primary: event.primary_object.clone(),
                    secondary: event.secondary_object.clone(),
                    reason: e.to_string(),
                    best_miss_km,
                });
            }
        }
        true
    }
}

/// Reject catalogs with empty or duplicate identifiers.
pub fn validate_catalog(catalog: &[OrbitalElementSet]) -> Result<()> {
    let mut seen = HashSet::with_capacity(catalog.len());
    for elements in catalog {
        if elements.id.trim().is_empty() {
            return Err(CollisionError::InvalidCatalog(
                "element set with empty identifier".to_string(),
            ));
        }
        if !seen.insert(elements.id.as_str()) {
            return Err(CollisionError::InvalidCatalog(format!(
                "duplicate identifier {}",
                elements.id
            )));
        }
    }
    Ok(())
}

/// Configured window start, else the newest element epoch.
fn window_start(catalog: &[OrbitalElementSet], config: &ScreeningConfig) -> Result<DateTime<Utc>> {
    config
        .window
        .start
        .or_else(|| catalog.iter().map(|e| e.epoch).max())
        .ok_or_else(|| {
            CollisionError::InvalidCatalog("empty catalog and no window start configured".to_string())
        })
}

/// Run one screening cycle over `catalog`.
pub fn run_cycle(
    catalog: &[OrbitalElementSet],
    config: &ScreeningConfig,
    propagator: &dyn Propagator,
    cancel: CancelToken,
) -> Result<CycleReport> {
    config.validate()?;
    validate_catalog(catalog)?;
    let start = window_start(catalog, config)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.execution.worker_threads)
        .build()
        .map_err(|e| CollisionError::ThreadPool(e.to_string()))?;

    let ctx = CycleContext::new(config, propagator, catalog, start, cancel);
    pool.install(|| run_stages(&ctx, catalog))
}

fn run_stages(ctx: &CycleContext<'_>, catalog: &[OrbitalElementSet]) -> Result<CycleReport> {
    let config = ctx.config;
    let mut report = CycleReport::empty(ctx);
    info!(
        "Screening {} satellites over {} .. {} with {}",
        catalog.len(),
        ctx.window_start,
        ctx.window_end,
        report.propagator
    );

    // ------------------------------------------------------------------------
    // Sampling
    // ------------------------------------------------------------------------
    let grid = SampleGrid::new(ctx.window_start, ctx.window_end, config.sample_step())?;
    let sampled: Vec<Option<orbital_mechanics::Result<Trajectory>>> = catalog
        .par_iter()
        .map(|elements| {
            if ctx.should_stop() {
                return None;
            }
            let trajectory = elements.check_bounded().and_then(|_| {
                TrajectorySampler::on_grid(ctx.propagator(), elements, grid).trajectory()
            });
            Some(trajectory)
        })
        .collect();

    let mut tracks = Vec::with_capacity(catalog.len());
    let mut unsampled = 0;
    for (elements, outcome) in catalog.iter().zip(sampled) {
        match outcome {
            Some(Ok(trajectory)) => {
                debug!(
                    "{} [{:?}] sampled {} states",
                    elements.id,
                    elements.regime(),
                    trajectory.len()
                );
                tracks.push(SatelliteTrack::new(elements, trajectory));
            }
            Some(Err(e)) => {
                warn!("Excluding {}: {}", elements.id, e);
                report.warnings.push(CycleWarning::SatelliteExcluded {
                    satellite: elements.id.clone(),
                    reason: e.to_string(),
                });
            }
            None => unsampled += 1,
        }
    }
    report.satellites_screened = tracks.len();
    if unsampled > 0 {
        report.skipped("sampling", format!("{} satellites not sampled before stop", unsampled));
        report.timed_out = true;
        return Ok(report);
    }

    // ------------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------------
    let (candidates, stats) = PairPruner::from_config(config).prune(&tracks, &grid);
    info!(
        "Pruned {} pairs to {} candidate windows",
        stats.pairs_total, stats.candidate_windows
    );
    report.prune_stats = stats;
    drop(tracks);

    // ------------------------------------------------------------------------
    // Fine detection
    // ------------------------------------------------------------------------
    let detector = FineDetector::from_config(config);
    let detected: Vec<Option<std::result::Result<Vec<ConjunctionEvent>, String>>> = candidates
        .par_iter()
        .map(|pair| {
            if ctx.should_stop() {
                return None;
            }
            Some(detect_pair(ctx, &detector, pair))
        })
        .collect();

    let assessor = RiskAssessor::new(&config.risk);
    let mut events = Vec::new();
    let mut undetected = 0;
    for (pair, outcome) in candidates.iter().zip(detected) {
        match outcome {
            Some(Ok(found)) => events.extend(found.into_iter().map(|e| assessor.assess(e))),
            Some(Err(reason)) => {
                warn!("Skipping {}/{}: {}", pair.primary, pair.secondary, reason);
                report.warnings.push(CycleWarning::PairSkipped {
                    primary: pair.primary.clone(),
                    secondary: pair.secondary.clone(),
                    window_start: pair.window_start,
                    reason,
                });
            }
            None => undetected += 1,
        }
    }
    events.sort_by(|a, b| {
        a.tca
            .cmp(&b.tca)
            .then_with(|| a.primary_object.cmp(&b.primary_object))
            .then_with(|| a.secondary_object.cmp(&b.secondary_object))
    });
    events.dedup_by(|a, b| a.id == b.id);
    for event in events.iter().filter(|e| e.reduced_confidence) {
        report.warnings.push(CycleWarning::ReducedConfidence {
            event_id: event.id.clone(),
            primary: event.primary_object.clone(),
            secondary: event.secondary_object.clone(),
        });
    }
    info!("Detected {} conjunction events", events.len());
    if undetected > 0 {
        report.skipped(
            "detection",
            format!("{} candidate windows not screened before stop", undetected),
        );
    }

    // ------------------------------------------------------------------------
    // Maneuver planning
    // ------------------------------------------------------------------------
    let threshold = config.risk.action_threshold;
    let actionable: Vec<&ConjunctionEvent> =
        events.iter().filter(|e| e.is_actionable(threshold)).collect();
    let optimizer = ManeuverOptimizer::new(config);
    let planned: Vec<Option<Result<ManeuverPlan>>> = actionable
        .par_iter()
        .map(|event| {
            if ctx.should_stop() {
                return None;
            }
            let should_stop = || ctx.should_stop();
            Some(
                ManeuverProblem::new(ctx, &assessor, event)
                    .and_then(|problem| optimizer.optimize(&problem, &should_stop)),
            )
        })
        .collect();

    let mut unplanned = 0;
    for (event, outcome) in actionable.iter().zip(planned) {
        let settled = outcome.map_or(false, |outcome| report.record_plan(event, outcome));
        if !settled {
            unplanned += 1;
        }
    }
    if unplanned > 0 {
        report.skipped(
            "maneuver",
            format!("{} actionable events not planned before stop", unplanned),
        );
    }

    report.events = events;
    report.timed_out = ctx.was_interrupted();
    info!(
        "Cycle complete: {} events, {} plans, {} maneuver failures, {} warnings{}",
        report.events.len(),
        report.plans.len(),
        report.maneuver_failures.len(),
        report.warnings.len(),
        if report.timed_out { " (interrupted)" } else { "" }
    );
    Ok(report)
}

fn detect_pair(
    ctx: &CycleContext<'_>,
    detector: &FineDetector<'_>,
    pair: &CandidatePair,
) -> std::result::Result<Vec<ConjunctionEvent>, String> {
    let primary = ctx
        .ephemeris(&pair.primary)
        .ok_or_else(|| format!("{} not in catalog", pair.primary))?;
    let secondary = ctx
        .ephemeris(&pair.secondary)
        .ok_or_else(|| format!("{} not in catalog", pair.secondary))?;
    detector
        .detect(pair, &primary, &secondary)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PropagationModel;
    use chrono::{Duration, TimeZone};
    use fuzz_harness::generators::crossing_circular_pair;
    use orbital_mechanics::TwoBodyPropagator;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap()
    }

    fn config() -> ScreeningConfig {
        let mut config = ScreeningConfig::default();
        config.propagation.model = PropagationModel::TwoBody;
        config.window.duration_hours = 3.0;
        config.execution.worker_threads = 2;
        config
    }

    #[test]
    fn test_duplicate_ids_reject_cycle() {
        let catalog = vec![
            OrbitalElementSet::circular("DUP", epoch(), 7_000.0, 0.0, 0.0, 0.0),
            OrbitalElementSet::circular("DUP", epoch(), 7_100.0, 10.0, 0.0, 0.0),
        ];
        let propagator = TwoBodyPropagator::keplerian();
        let result = run_cycle(&catalog, &config(), &propagator, CancelToken::new());
        assert!(matches!(result, Err(CollisionError::InvalidCatalog(_))));
    }

    #[test]
    fn test_invalid_config_rejects_cycle() {
        let mut config = config();
        config.detection.screening_distance_km = 0.0;
        let propagator = TwoBodyPropagator::keplerian();
        let result = run_cycle(&[], &config, &propagator, CancelToken::new());
        assert!(matches!(result, Err(CollisionError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_catalog_without_start_rejected() {
        let propagator = TwoBodyPropagator::keplerian();
        let result = run_cycle(&[], &config(), &propagator, CancelToken::new());
        assert!(matches!(result, Err(CollisionError::InvalidCatalog(_))));
    }

    #[test]
    fn test_stale_satellite_excluded_with_warning() {
        let tca = epoch() + Duration::hours(1);
        let mut catalog = crossing_circular_pair(epoch(), tca, 7_000.0, 8.0).to_vec();
        catalog.push(OrbitalElementSet::circular(
            "OLD",
            epoch() - Duration::days(30),
            7_300.0,
            70.0,
            0.0,
            0.0,
        ));
        let mut config = config();
        config.window.start = Some(epoch());
        let propagator = config.build_propagator();

        let report = run_cycle(&catalog, &config, propagator.as_ref(), CancelToken::new()).unwrap();
        assert_eq!(report.satellites_screened, 2);
        assert!(report.warnings.iter().any(|w| matches!(
            w,
            CycleWarning::SatelliteExcluded { satellite, .. } if satellite == "OLD"
        )));
        assert_eq!(report.events.len(), 1);
        assert!(!report.timed_out);
    }

    #[test]
    fn test_cancelled_cycle_returns_partial_report() {
        let tca = epoch() + Duration::hours(1);
        let catalog = crossing_circular_pair(epoch(), tca, 7_000.0, 8.0);
        let propagator = TwoBodyPropagator::keplerian();
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = run_cycle(&catalog, &config(), &propagator, cancel).unwrap();
        assert!(report.timed_out);
        assert!(report.events.is_empty());
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, CycleWarning::StageSkipped { stage, .. } if stage == "sampling")));
    }

    #[test]
    fn test_interrupted_search_is_not_a_maneuver_failure() {
        let tca = epoch() + Duration::hours(1);
        let catalog = crossing_circular_pair(epoch(), tca, 7_000.0, 8.0);
        let propagator = TwoBodyPropagator::keplerian();
        let mut report = run_cycle(&catalog, &config(), &propagator, CancelToken::new()).unwrap();
        let event = report.events[0].clone();
        let failures = report.maneuver_failures.len();

        let interrupted = Err(CollisionError::SearchInterrupted {
            event_id: event.id.clone(),
            evaluations: 0,
        });
        assert!(!report.record_plan(&event, interrupted));
        assert_eq!(report.maneuver_failures.len(), failures);

        let infeasible = Err(CollisionError::NoFeasibleManeuver {
            event_id: event.id.clone(),
            reason: "budget".to_string(),
            best_miss_km: Some(1.5),
        });
        assert!(report.record_plan(&event, infeasible));
        assert_eq!(report.maneuver_failures.len(), failures + 1);
        assert_eq!(report.maneuver_failures[failures].best_miss_km, Some(1.5));
    }

    #[test]
    fn test_report_serializes() {
        let tca = epoch() + Duration::hours(1);
        let catalog = crossing_circular_pair(epoch(), tca, 7_000.0, 8.0);
        let propagator = TwoBodyPropagator::keplerian();
        let report = run_cycle(&catalog, &config(), &propagator, CancelToken::new()).unwrap();

        let json = serde_json::to_string(&report).unwrap();
        let back: CycleReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.events.len(), report.events.len());
        assert_eq!(back.window_start, report.window_start);
    }
}
