//! Fine conjunction detection
//!
//! The relative distance of a candidate pair is sampled at the fine step
//! across its window. Every sample-local minimum (window endpoints included)
//! is bracketed by its neighbouring samples and refined with a
//! golden-section search. A minimum whose refinement does not converge, or
//! whose refinement hits a propagation failure, keeps the sampled point and
//! is marked reduced-confidence.

use chrono::{DateTime, Duration, Utc};
use orbital_mechanics::{offset_seconds, seconds_between, Result, SampleGrid, StateVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DetectionConfig, ScreeningConfig};
use crate::ephemeris::Ephemeris;
use crate::pruner::CandidatePair;
use crate::{ConjunctionEvent, EncounterKind};

/// 1/φ
const INV_GOLDEN: f64 = 0.618_033_988_749_894_8;

/// A local minimum of the separation between two objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Approach {
    pub tca: DateTime<Utc>,
    pub miss_distance_km: f64,
    pub primary_state: StateVector,
    pub secondary_state: StateVector,
    pub reduced_confidence: bool,
}

impl Approach {
    fn at(primary_state: StateVector, secondary_state: StateVector) -> Self {
        Self {
            tca: primary_state.epoch,
            miss_distance_km: primary_state.separation_km(&secondary_state),
            primary_state,
            secondary_state,
            reduced_confidence: false,
        }
    }

    pub fn relative_speed_km_s(&self) -> f64 {
        self.primary_state
            .relative_velocity(&self.secondary_state)
            .norm()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FineDetector<'c> {
    config: &'c DetectionConfig,
}

impl<'c> FineDetector<'c> {
    pub fn new(config: &'c DetectionConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &'c ScreeningConfig) -> Self {
        Self::new(&config.detection)
    }

    fn approach_at(
        &self,
        primary: &dyn Ephemeris,
        secondary: &dyn Ephemeris,
        at: DateTime<Utc>,
    ) -> Result<Approach> {
        Ok(Approach::at(primary.state_at(at)?, secondary.state_at(at)?))
    }

    /// Every local separation minimum in `[start, end]`, refined.
    ///
    /// Propagation failures on the fine grid are returned to the caller;
    /// failures during refinement only degrade confidence.
    pub fn local_minima(
        &self,
        primary: &dyn Ephemeris,
        secondary: &dyn Ephemeris,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Approach>> {
        let step = Duration::microseconds((self.config.fine_step_seconds * 1e6).round() as i64);
        let grid = SampleGrid::new(start, end, step)?;
        let samples = grid
            .epochs()
            .map(|at| self.approach_at(primary, secondary, at))
            .collect::<Result<Vec<_>>>()?;

        let n = samples.len();
        let mut minima = Vec::new();
        for k in 0..n {
            let d = samples[k].miss_distance_km;
            let falling = k == 0 || samples[k - 1].miss_distance_km > d;
            let rising = k + 1 == n || d <= samples[k + 1].miss_distance_km;
            if !(falling && rising) {
                continue;
            }
            let lo = grid.epoch(k.saturating_sub(1));
            let hi = grid.epoch((k + 1).min(n - 1));
            minima.push(self.refine(primary, secondary, lo, hi, &samples[k]));
        }
        Ok(minima)
    }

    /// Golden-section search for the separation minimum inside `[lo, hi]`.
    fn refine(
        &self,
        primary: &dyn Ephemeris,
        secondary: &dyn Ephemeris,
        lo: DateTime<Utc>,
        hi: DateTime<Utc>,
        sampled: &Approach,
    ) -> Approach {
        let fallback = || Approach {
            reduced_confidence: true,
            ..sampled.clone()
        };
        let distance = |t: f64| -> Result<f64> {
            Ok(self
                .approach_at(primary, secondary, offset_seconds(lo, t))?
                .miss_distance_km)
        };

        let search = || -> Result<Option<f64>> {
            let (mut a, mut b) = (0.0, seconds_between(lo, hi));
            let mut x1 = b - INV_GOLDEN * (b - a);
            let mut x2 = a + INV_GOLDEN * (b - a);
            let mut f1 = distance(x1)?;
            let mut f2 = distance(x2)?;
            let mut iterations = 0;
            while b - a > self.config.tca_tolerance_seconds {
                if iterations >= self.config.max_refine_iterations {
                    return Ok(None);
                }
                if f1 <= f2 {
                    b = x2;
                    x2 = x1;
                    f2 = f1;
                    x1 = b - INV_GOLDEN * (b - a);
                    f1 = distance(x1)?;
                } else {
                    a = x1;
                    x1 = x2;
                    f1 = f2;
                    x2 = a + INV_GOLDEN * (b - a);
                    f2 = distance(x2)?;
                }
                iterations += 1;
            }
            Ok(Some(0.5 * (a + b)))
        };

        match search() {
            Ok(Some(t)) => match self.approach_at(primary, secondary, offset_seconds(lo, t)) {
                Ok(refined) if refined.miss_distance_km <= sampled.miss_distance_km => refined,
                Ok(_) => sampled.clone(),
                Err(e) => {
                    debug!("TCA refinement lost propagation: {}", e);
                    fallback()
                }
            },
            Ok(None) => {
                debug!(
                    "TCA refinement {}/{} did not converge in {} iterations",
                    primary.object_id(),
                    secondary.object_id(),
                    self.config.max_refine_iterations
                );
                fallback()
            }
            Err(e) => {
                debug!("TCA refinement lost propagation: {}", e);
                fallback()
            }
        }
    }

    /// The deepest minimum in `[start, end]`; earliest wins ties.
    pub fn closest_approach(
        &self,
        primary: &dyn Ephemeris,
        secondary: &dyn Ephemeris,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Approach> {
        let minima = self.local_minima(primary, secondary, start, end)?;
        let mut best: Option<Approach> = None;
        for approach in minima {
            if best
                .as_ref()
                .map_or(true, |b| approach.miss_distance_km < b.miss_distance_km)
            {
                best = Some(approach);
            }
        }
        match best {
            Some(approach) => Ok(approach),
            // A non-empty grid always has a minimum
            None => self.approach_at(primary, secondary, start),
        }
    }

    pub fn classify(&self, approach: &Approach) -> EncounterKind {
        if approach.miss_distance_km < self.config.docking_distance_km
            && approach.relative_speed_km_s() < self.config.docking_relative_speed_km_s
        {
            EncounterKind::Docking
        } else {
            EncounterKind::Collision
        }
    }

    /// Events for every minimum of `pair` below the screening distance.
    ///
    /// `primary` and `secondary` must be the ephemerides of `pair.primary`
    /// and `pair.secondary`.
    pub fn detect(
        &self,
        pair: &CandidatePair,
        primary: &dyn Ephemeris,
        secondary: &dyn Ephemeris,
    ) -> Result<Vec<ConjunctionEvent>> {
        let minima = self.local_minima(primary, secondary, pair.window_start, pair.window_end)?;
        let events = minima
            .into_iter()
            .filter(|a| a.miss_distance_km < self.config.screening_distance_km)
            .map(|approach| ConjunctionEvent {
                id: ConjunctionEvent::event_id(&pair.primary, &pair.secondary, approach.tca),
                primary_object: pair.primary.clone(),
                secondary_object: pair.secondary.clone(),
                tca: approach.tca,
                miss_distance_km: approach.miss_distance_km,
                relative_velocity_km_s: approach.relative_speed_km_s(),
                kind: self.classify(&approach),
                reduced_confidence: approach.reduced_confidence,
                primary_state: approach.primary_state,
                secondary_state: approach.secondary_state,
                risk: None,
            })
            .collect::<Vec<_>>();
        if !events.is_empty() {
            debug!(
                "{}/{}: {} event(s) in window {} .. {}",
                pair.primary,
                pair.secondary,
                events.len(),
                pair.window_start,
                pair.window_end
            );
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::ElementEphemeris;
    use chrono::TimeZone;
    use orbital_mechanics::{OrbitalElementSet, TwoBodyPropagator};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 9, 0, 0, 0).unwrap()
    }

    /// A equatorial at 7000 km, B polar at 7000 km + `gap`, both at +X at epoch.
    fn crossing(gap_km: f64) -> Vec<OrbitalElementSet> {
        vec![
            OrbitalElementSet::circular("A", epoch(), 7_000.0, 0.0, 0.0, 0.0),
            OrbitalElementSet::circular("B", epoch(), 7_000.0 + gap_km, 90.0, 0.0, 0.0),
        ]
    }

    fn pair(start: DateTime<Utc>, end: DateTime<Utc>) -> CandidatePair {
        CandidatePair {
            primary: "A".into(),
            secondary: "B".into(),
            window_start: start,
            window_end: end,
        }
    }

    #[test]
    fn test_refines_crossing_to_known_tca() {
        let catalog = crossing(3.0);
        let propagator = TwoBodyPropagator::keplerian();
        let a = ElementEphemeris::new(&propagator, &catalog[0]);
        let b = ElementEphemeris::new(&propagator, &catalog[1]);

        let config = DetectionConfig::default();
        let detector = FineDetector::new(&config);
        // Window deliberately off-grid relative to the crossing
        let start = epoch() - Duration::milliseconds(123_457);
        let events = detector
            .detect(&pair(start, epoch() + Duration::seconds(100)), &a, &b)
            .unwrap();

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!((event.miss_distance_km - 3.0).abs() < 1e-4, "miss {}", event.miss_distance_km);
        assert!(
            seconds_between(epoch(), event.tca).abs() < 0.01,
            "tca off by {} s",
            seconds_between(epoch(), event.tca)
        );
        assert!(!event.reduced_confidence);
        assert_eq!(event.kind, EncounterKind::Collision);
        assert!(event.risk.is_none());
    }

    #[test]
    fn test_minimum_beyond_screening_distance_dropped() {
        let catalog = crossing(15.0);
        let propagator = TwoBodyPropagator::keplerian();
        let a = ElementEphemeris::new(&propagator, &catalog[0]);
        let b = ElementEphemeris::new(&propagator, &catalog[1]);

        let config = DetectionConfig::default();
        let events = FineDetector::new(&config)
            .detect(
                &pair(epoch() - Duration::seconds(60), epoch() + Duration::seconds(60)),
                &a,
                &b,
            )
            .unwrap();
        assert!(events.is_empty());
    }

    /// Object at 7000 km on +X; with `offset` it sits 5 + 3cos(2πt/100) km
    /// further out, t seconds after `origin`.
    struct Oscillating {
        id: &'static str,
        origin: DateTime<Utc>,
        offset: bool,
    }

    impl Ephemeris for Oscillating {
        fn object_id(&self) -> &str {
            self.id
        }

        fn state_at(&self, at: DateTime<Utc>) -> Result<StateVector> {
            let t = seconds_between(self.origin, at);
            let w = std::f64::consts::TAU / 100.0;
            let (d, rate) = if self.offset {
                (5.0 + 3.0 * (w * t).cos(), -3.0 * w * (w * t).sin())
            } else {
                (0.0, 0.0)
            };
            Ok(StateVector::new(
                nalgebra::Vector3::new(7_000.0 + d, 0.0, 0.0),
                nalgebra::Vector3::new(rate, 7.546, 0.0),
                at,
                self.id,
            ))
        }
    }

    #[test]
    fn test_every_periodic_minimum_becomes_an_event() {
        let a = Oscillating {
            id: "A",
            origin: epoch(),
            offset: false,
        };
        let b = Oscillating {
            id: "B",
            origin: epoch(),
            offset: true,
        };
        let config = DetectionConfig::default();
        let events = FineDetector::new(&config)
            .detect(&pair(epoch(), epoch() + Duration::seconds(200)), &a, &b)
            .unwrap();

        assert_eq!(events.len(), 2);
        for (event, expected_s) in events.iter().zip([50.0, 150.0]) {
            assert!(
                (seconds_between(epoch(), event.tca) - expected_s).abs() < 0.01,
                "tca {}",
                event.tca
            );
            assert!((event.miss_distance_km - 2.0).abs() < 1e-6);
            assert!(!event.reduced_confidence);
            assert_eq!(event.kind, EncounterKind::Collision);
        }
        assert_ne!(events[0].id, events[1].id);
    }

    #[test]
    fn test_endpoint_minimum_reported() {
        let catalog = crossing(3.0);
        let propagator = TwoBodyPropagator::keplerian();
        let a = ElementEphemeris::new(&propagator, &catalog[0]);
        let b = ElementEphemeris::new(&propagator, &catalog[1]);

        let config = DetectionConfig::default();
        // Window closes half a second before the crossing
        let end = epoch() - Duration::milliseconds(500);
        let minima = FineDetector::new(&config)
            .local_minima(&a, &b, end - Duration::seconds(30), end)
            .unwrap();
        assert_eq!(minima.len(), 1);
        assert!(seconds_between(minima[0].tca, end).abs() < 0.01);
    }

    #[test]
    fn test_iteration_cap_marks_reduced_confidence() {
        let catalog = crossing(3.0);
        let propagator = TwoBodyPropagator::keplerian();
        let a = ElementEphemeris::new(&propagator, &catalog[0]);
        let b = ElementEphemeris::new(&propagator, &catalog[1]);

        let config = DetectionConfig {
            max_refine_iterations: 2,
            ..DetectionConfig::default()
        };
        let start = epoch() - Duration::milliseconds(2_500);
        let approach = FineDetector::new(&config)
            .closest_approach(&a, &b, start, epoch() + Duration::seconds(30))
            .unwrap();
        assert!(approach.reduced_confidence);
        // Best sampled point: the fine grid sits 2.5 s off the crossing
        assert!(seconds_between(epoch(), approach.tca).abs() <= 2.5 + 1e-6);
    }

    #[test]
    fn test_co_moving_pair_classified_as_docking() {
        let catalog = vec![
            OrbitalElementSet::circular("A", epoch(), 7_000.0, 51.6, 0.0, 0.0),
            OrbitalElementSet::circular("B", epoch(), 7_000.0, 51.6, 0.0, 0.004),
        ];
        let propagator = TwoBodyPropagator::keplerian();
        let a = ElementEphemeris::new(&propagator, &catalog[0]);
        let b = ElementEphemeris::new(&propagator, &catalog[1]);

        let config = DetectionConfig::default();
        let detector = FineDetector::new(&config);
        let approach = detector
            .closest_approach(&a, &b, epoch(), epoch() + Duration::seconds(60))
            .unwrap();
        assert!(approach.miss_distance_km < 1.0);
        assert_eq!(detector.classify(&approach), EncounterKind::Docking);
    }
}
