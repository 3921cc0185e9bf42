//! Avoidance maneuver optimization
//!
//! A `ManeuverProblem` fixes everything about one flagged event except the
//! Δv: which object burns, when, over which window the result is judged and
//! what miss distance counts as safe. `ManeuverOptimizer` then searches RIC
//! Δv space for the cheapest feasible burn:
//!
//! 1. **Bracketing**: along ±in-track, ±radial, ±cross-track, grow the
//!    magnitude geometrically from the initial guess up to the budget until
//!    feasible, then bisect back down to the feasibility edge.
//! 2. **Pattern search**: from the best bracketed point, poll ±step on each
//!    RIC axis plus a pure magnitude reduction; accept only feasible, cheaper
//!    candidates; halve the step when a poll finds nothing.
//!
//! A candidate is feasible when its miss distance reaches the required floor,
//! its re-assessed severity is below the action threshold and it fits the
//! Δv budget.

use chrono::{DateTime, Duration, Utc};
use nalgebra::Vector3;
use orbital_mechanics::transforms::ric_to_eci;
use orbital_mechanics::{MissionPriority, OrbitalError, StateVector};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::{ManeuverConfig, PropagationModel, ScreeningConfig};
use crate::context::CycleContext;
use crate::detector::{Approach, FineDetector};
use crate::ephemeris::{ElementEphemeris, Ephemeris, ManeuveredEphemeris};
use crate::risk::{RiskAssessment, RiskAssessor};
use crate::{CollisionError, ConjunctionEvent, ManeuverPlan, ManeuverType, Result};

/// Standard gravity for the rocket equation (m/s²)
const G0_M_S2: f64 = 9.806_65;

/// Why the search stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Termination {
    /// Pattern step fell below the minimum
    Converged,
    /// Accepted moves stopped improving the cost
    Stalled,
    IterationBudget,
    TimeBudget,
    Cancelled,
}

/// Outcome of one candidate Δv.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub delta_v_ric_m_s: Vector3<f64>,
    pub delta_v_eci_m_s: Vector3<f64>,
    pub approach: Approach,
    pub risk: RiskAssessment,
    pub feasible: bool,
}

impl Evaluation {
    pub fn cost_m_s(&self) -> f64 {
        self.delta_v_ric_m_s.norm()
    }
}

/// Tsiolkovsky propellant mass for `delta_v_m_s`.
pub fn fuel_mass_kg(delta_v_m_s: f64, spacecraft_mass_kg: f64, specific_impulse_s: f64) -> f64 {
    spacecraft_mass_kg * (1.0 - (-delta_v_m_s / (specific_impulse_s * G0_M_S2)).exp())
}

// ============================================================================
// Problem
// ============================================================================

pub struct ManeuverProblem<'p> {
    config: &'p ScreeningConfig,
    detector: FineDetector<'p>,
    assessor: &'p RiskAssessor<'p>,
    event: &'p ConjunctionEvent,
    target: ElementEphemeris<'p>,
    other: ElementEphemeris<'p>,
    target_is_primary: bool,
    burn_state: StateVector,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    required_miss_km: f64,
    j2: bool,
}

impl<'p> ManeuverProblem<'p> {
    /// Pick the burning object, burn epoch and evaluation window for `event`.
    pub fn new(
        ctx: &CycleContext<'p>,
        assessor: &'p RiskAssessor<'p>,
        event: &'p ConjunctionEvent,
    ) -> Result<Self> {
        let config = ctx.config;
        let maneuver = &config.maneuver;
        let infeasible = |reason: String| CollisionError::NoFeasibleManeuver {
            event_id: event.id.clone(),
            reason,
            best_miss_km: None,
        };

        let primary = ctx
            .ephemeris(&event.primary_object)
            .ok_or_else(|| CollisionError::ObjectNotFound(event.primary_object.clone()))?;
        let secondary = ctx
            .ephemeris(&event.secondary_object)
            .ok_or_else(|| CollisionError::ObjectNotFound(event.secondary_object.clone()))?;

        let (target, other, target_is_primary) =
            if primary.elements().object_type.is_maneuverable() {
                (primary, secondary, true)
            } else if secondary.elements().object_type.is_maneuverable() {
                (secondary, primary, false)
            } else {
                return Err(infeasible("neither object is maneuverable".to_string()));
            };

        let critical = [primary.elements(), secondary.elements()]
            .iter()
            .any(|e| e.priority == MissionPriority::Critical);
        let required_miss_km = if critical {
            maneuver.safety_floor_km * maneuver.critical_margin_factor
        } else {
            maneuver.safety_floor_km
        };

        let preferred = event.tca - minutes(maneuver.preferred_lead_time_minutes);
        let earliest = ctx.reference_time + minutes(maneuver.min_lead_time_minutes);
        let burn_epoch = preferred.max(earliest);
        if burn_epoch >= event.tca {
            return Err(infeasible(format!(
                "TCA {} leaves no burn opportunity after {}",
                event.tca, earliest
            )));
        }

        let half_window = Duration::microseconds(
            (maneuver.evaluation_half_window_seconds * 1e6).round() as i64,
        );
        let window_start = (event.tca - half_window).max(burn_epoch);
        let window_end = event.tca + half_window;

        let burn_state = target.state_at(burn_epoch)?;

        Ok(Self {
            config,
            detector: FineDetector::from_config(config),
            assessor,
            event,
            target,
            other,
            target_is_primary,
            burn_state,
            window_start,
            window_end,
            required_miss_km,
            j2: config.propagation.model != PropagationModel::TwoBody,
        })
    }

    pub fn event(&self) -> &ConjunctionEvent {
        self.event
    }

    pub fn target_id(&self) -> &str {
        self.target.object_id()
    }

    pub fn other_id(&self) -> &str {
        self.other.object_id()
    }

    pub fn burn_epoch(&self) -> DateTime<Utc> {
        self.burn_state.epoch
    }

    pub fn required_miss_km(&self) -> f64 {
        self.required_miss_km
    }

    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.window_start, self.window_end)
    }

    /// Closest approach without any burn, over the evaluation window.
    pub fn unmaneuvered(&self) -> orbital_mechanics::Result<Approach> {
        self.closest(&self.target)
    }

    fn closest(&self, target: &dyn Ephemeris) -> orbital_mechanics::Result<Approach> {
        if self.target_is_primary {
            self.detector
                .closest_approach(target, &self.other, self.window_start, self.window_end)
        } else {
            self.detector
                .closest_approach(&self.other, target, self.window_start, self.window_end)
        }
    }

    /// Apply `delta_v_ric_m_s` at the burn epoch and judge the result.
    pub fn evaluate(&self, delta_v_ric_m_s: &Vector3<f64>) -> orbital_mechanics::Result<Evaluation> {
        let delta_v_eci_m_s = ric_to_eci(delta_v_ric_m_s, &self.burn_state).ok_or_else(|| {
            OrbitalError::PropagationDivergence {
                id: self.target_id().to_string(),
                reason: "no RIC frame at burn epoch".to_string(),
            }
        })?;
        let maneuvered = ManeuveredEphemeris::new(
            self.target,
            self.burn_epoch(),
            delta_v_eci_m_s / 1000.0,
            self.j2,
        )?;
        let approach = self.closest(&maneuvered)?;
        let risk = self.assessor.assess_states(
            &self.event.primary_object,
            &approach.primary_state,
            &self.event.secondary_object,
            &approach.secondary_state,
        );
        let feasible = approach.miss_distance_km >= self.required_miss_km
            && risk.risk_level < self.config.risk.action_threshold
            && delta_v_ric_m_s.norm() <= self.config.maneuver.max_delta_v_m_s;
        Ok(Evaluation {
            delta_v_ric_m_s: *delta_v_ric_m_s,
            delta_v_eci_m_s,
            approach,
            risk,
            feasible,
        })
    }
}

// ============================================================================
// Optimizer
// ============================================================================

/// Search state shared by both phases.
struct Search<'s, 'p> {
    problem: &'s ManeuverProblem<'p>,
    config: &'s ManeuverConfig,
    should_stop: &'s dyn Fn() -> bool,
    started: Instant,
    iterations: usize,
    best: Option<Evaluation>,
    best_miss_km: Option<f64>,
}

impl Search<'_, '_> {
    fn exhausted(&self) -> Option<Termination> {
        if (self.should_stop)() {
            Some(Termination::Cancelled)
        } else if self.iterations >= self.config.max_iterations {
            Some(Termination::IterationBudget)
        } else if self.started.elapsed().as_millis() >= u128::from(self.config.time_budget_ms) {
            Some(Termination::TimeBudget)
        } else {
            None
        }
    }

    /// Evaluate one candidate; propagation failures count as infeasible.
    fn try_candidate(&mut self, delta_v_ric_m_s: Vector3<f64>) -> Option<Evaluation> {
        self.iterations += 1;
        match self.problem.evaluate(&delta_v_ric_m_s) {
            Ok(evaluation) => {
                let miss = evaluation.approach.miss_distance_km;
                self.best_miss_km = Some(self.best_miss_km.map_or(miss, |m| m.max(miss)));
                evaluation.feasible.then_some(evaluation)
            }
            Err(e) => {
                debug!("Candidate {:?} m/s not evaluable: {}", delta_v_ric_m_s.as_slice(), e);
                None
            }
        }
    }

    fn offer(&mut self, evaluation: Evaluation) -> bool {
        let cheaper = self
            .best
            .as_ref()
            .map_or(true, |b| evaluation.cost_m_s() < b.cost_m_s());
        if cheaper {
            self.best = Some(evaluation);
        }
        cheaper
    }

    /// Phase 1 along one unit direction. `Err` carries an early termination.
    fn bracket(&mut self, direction: Vector3<f64>) -> std::result::Result<(), Termination> {
        let max = self.config.max_delta_v_m_s;
        let mut infeasible_below = 0.0;
        let mut magnitude = self.config.initial_delta_v_m_s.min(max);

        let mut feasible_at = loop {
            if let Some(stop) = self.exhausted() {
                return Err(stop);
            }
            // Never try magnitudes the current best already undercuts
            if let Some(best) = &self.best {
                if magnitude >= best.cost_m_s() {
                    return Ok(());
                }
            }
            match self.try_candidate(direction * magnitude) {
                Some(evaluation) => {
                    self.offer(evaluation);
                    break magnitude;
                }
                None if magnitude >= max => return Ok(()),
                None => {
                    infeasible_below = magnitude;
                    magnitude = (magnitude * 2.0).min(max);
                }
            }
        };

        while feasible_at - infeasible_below > self.config.min_step_m_s {
            if let Some(stop) = self.exhausted() {
                return Err(stop);
            }
            let mid = 0.5 * (feasible_at + infeasible_below);
            match self.try_candidate(direction * mid) {
                Some(evaluation) => {
                    self.offer(evaluation);
                    feasible_at = mid;
                }
                None => infeasible_below = mid,
            }
        }
        Ok(())
    }

    /// Phase 2 around the best bracketed point.
    fn pattern(&mut self) -> Termination {
        let Some(start) = self.best.as_ref().map(|b| b.cost_m_s()) else {
            return Termination::Converged;
        };
        let mut step = (0.25 * start).max(self.config.min_step_m_s);
        let mut stalled = 0;

        loop {
            if step < self.config.min_step_m_s {
                return Termination::Converged;
            }
            let Some(center) = self.best.as_ref().map(|b| b.delta_v_ric_m_s) else {
                return Termination::Converged;
            };
            let cost = center.norm();

            let mut polls = Vec::with_capacity(7);
            if cost > step {
                polls.push(center * (1.0 - step / cost));
            }
            for axis in [Vector3::y(), Vector3::x(), Vector3::z()] {
                polls.push(center + axis * step);
                polls.push(center - axis * step);
            }

            let mut accepted = false;
            for candidate in polls {
                if candidate.norm() >= cost || candidate.norm() > self.config.max_delta_v_m_s {
                    continue;
                }
                if let Some(stop) = self.exhausted() {
                    return stop;
                }
                if let Some(evaluation) = self.try_candidate(candidate) {
                    let improvement = cost - evaluation.cost_m_s();
                    if self.offer(evaluation) {
                        accepted = true;
                        if improvement < self.config.stall_epsilon_m_s {
                            stalled += 1;
                        } else {
                            stalled = 0;
                        }
                        break;
                    }
                }
            }

            if stalled >= self.config.stall_iterations {
                return Termination::Stalled;
            }
            if !accepted {
                step *= 0.5;
            }
        }
    }
}

pub struct ManeuverOptimizer<'c> {
    config: &'c ScreeningConfig,
}

impl<'c> ManeuverOptimizer<'c> {
    pub fn new(config: &'c ScreeningConfig) -> Self {
        Self { config }
    }

    /// Cheapest feasible burn for `problem`. `NoFeasibleManeuver` when the
    /// budgets ran out without one, `SearchInterrupted` when `should_stop`
    /// fired first.
    pub fn optimize(
        &self,
        problem: &ManeuverProblem<'_>,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<ManeuverPlan> {
        let config = &self.config.maneuver;
        let mut search = Search {
            problem,
            config,
            should_stop,
            started: Instant::now(),
            iterations: 0,
            best: None,
            best_miss_km: None,
        };

        let directions = [
            Vector3::y(),
            -Vector3::y(),
            Vector3::x(),
            -Vector3::x(),
            Vector3::z(),
            -Vector3::z(),
        ];
        let mut early = None;
        for direction in directions {
            if let Err(stop) = search.bracket(direction) {
                early = Some(stop);
                break;
            }
        }
        let termination = match early {
            Some(stop) => stop,
            None => search.pattern(),
        };

        let event = problem.event();
        if search.best.is_none() && termination == Termination::Cancelled {
            return Err(CollisionError::SearchInterrupted {
                event_id: event.id.clone(),
                evaluations: search.iterations,
            });
        }
        let Some(best) = search.best else {
            return Err(CollisionError::NoFeasibleManeuver {
                event_id: event.id.clone(),
                reason: format!(
                    "no candidate within {:.3} m/s reached {:.3} km below {:?} ({:?} after {} evaluations)",
                    config.max_delta_v_m_s,
                    problem.required_miss_km(),
                    self.config.risk.action_threshold,
                    termination,
                    search.iterations
                ),
                best_miss_km: search.best_miss_km,
            });
        };

        debug!(
            "Event {}: {:.4} m/s burn on {} after {} evaluations ({:?})",
            event.id,
            best.cost_m_s(),
            problem.target_id(),
            search.iterations,
            termination
        );
        Ok(self.plan(problem, best, search.iterations, termination))
    }

    fn plan(
        &self,
        problem: &ManeuverProblem<'_>,
        best: Evaluation,
        iterations: usize,
        termination: Termination,
    ) -> ManeuverPlan {
        let event = problem.event();
        let config = &self.config.maneuver;
        let burn_epoch = problem.burn_epoch();
        let magnitude = best.cost_m_s();
        let key = format!("{}|{}|{}", event.id, problem.target_id(), burn_epoch.timestamp_micros());
        ManeuverPlan {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string(),
            event_id: event.id.clone(),
            target_object: problem.target_id().to_string(),
            other_object: problem.other_id().to_string(),
            maneuver_type: ManeuverType::from_ric(&best.delta_v_ric_m_s),
            burn_epoch,
            delta_v_eci_m_s: best.delta_v_eci_m_s,
            delta_v_ric_m_s: best.delta_v_ric_m_s,
            delta_v_magnitude_m_s: magnitude,
            fuel_cost_kg: fuel_mass_kg(magnitude, config.spacecraft_mass_kg, config.specific_impulse_s),
            original_miss_distance_km: event.miss_distance_km,
            new_miss_distance_km: best.approach.miss_distance_km,
            new_tca: best.approach.tca,
            new_risk_level: best.risk.risk_level,
            new_collision_probability: best.risk.collision_probability,
            required_miss_distance_km: problem.required_miss_km(),
            feasible: best.feasible,
            iterations,
            termination,
        }
    }
}

fn minutes(value: f64) -> Duration {
    Duration::microseconds((value * 60e6).round() as i64)
}
