//! Pair pruning
//!
//! Two cascaded filters cut the O(n²) pair set down before fine analysis.
//! Both are conservative: a pair the fine detector would flag always
//! survives.
//!
//! - **Regime filter**: radial envelopes (perigee..apogee, widened by the
//!   screening distance plus a margin) must overlap. Sweep over envelopes
//!   sorted by their lower bound.
//! - **Bucket filter**: each coarse sample is binned into a cubic cell per
//!   time slice. Pairs whose cells are equal or adjacent (27-neighbourhood)
//!   at the same or an adjacent slice are hits; consecutive hits are merged
//!   into one candidate window.
//!
//! The cell edge is `D + margin + k·v_max·Δt`. At the sample nearest a true
//! conjunction (≤ Δt/2 away) each object has moved at most `v_max·Δt/2`, so
//! the pair is within one cell edge on every axis and lands in adjacent
//! cells.

use chrono::{DateTime, Utc};
use orbital_mechanics::{OrbitRegime, OrbitalElementSet, SampleGrid, Trajectory};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::config::{PruningConfig, ScreeningConfig};

type CellKey = (i64, i64, i64);

/// A sampled satellite entering the pruner.
#[derive(Debug, Clone)]
pub struct SatelliteTrack<'a> {
    pub elements: &'a OrbitalElementSet,
    pub trajectory: Trajectory,
}

impl<'a> SatelliteTrack<'a> {
    pub fn new(elements: &'a OrbitalElementSet, trajectory: Trajectory) -> Self {
        Self {
            elements,
            trajectory,
        }
    }

    /// (lowest, highest) geocentric radius the object can reach, km.
    pub fn radial_envelope(&self) -> (f64, f64) {
        self.trajectory.samples().iter().map(|s| s.radius_km()).fold(
            (
                self.elements.perigee_radius_km(),
                self.elements.apogee_radius_km(),
            ),
            |(lo, hi), r| (lo.min(r), hi.max(r)),
        )
    }

    pub fn max_speed_km_s(&self) -> f64 {
        self.trajectory
            .max_speed_km_s()
            .max(self.elements.max_speed_km_s())
    }
}

/// Two satellites (ids in ascending order) and the sub-window they may conjunct in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CandidatePair {
    pub primary: String,
    pub secondary: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PruneStats {
    pub satellites: usize,
    pub pairs_total: usize,
    pub pairs_after_regime: usize,
    pub pairs_after_bucket: usize,
    pub candidate_windows: usize,
    pub cell_edge_km: f64,
    pub regimes: BTreeMap<OrbitRegime, usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct PairPruner<'c> {
    screening_distance_km: f64,
    config: &'c PruningConfig,
}

impl<'c> PairPruner<'c> {
    pub fn new(screening_distance_km: f64, config: &'c PruningConfig) -> Self {
        Self {
            screening_distance_km,
            config,
        }
    }

    pub fn from_config(config: &'c ScreeningConfig) -> Self {
        Self::new(config.detection.screening_distance_km, &config.pruning)
    }

    /// Index pairs `(i, j)`, `i < j`, whose radial envelopes overlap.
    pub fn regime_filter(&self, tracks: &[SatelliteTrack<'_>]) -> Vec<(usize, usize)> {
        let widen = self.screening_distance_km + self.config.regime_margin_km;
        let mut envelopes: Vec<(f64, f64, usize)> = tracks
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let (lo, hi) = t.radial_envelope();
                (lo, hi + widen, i)
            })
            .collect();
        envelopes.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.2.cmp(&b.2)));

        let mut pairs = Vec::new();
        for (k, &(_, hi, i)) in envelopes.iter().enumerate() {
            for &(lo_j, _, j) in envelopes[k + 1..].iter() {
                if lo_j > hi {
                    break;
                }
                pairs.push((i.min(j), i.max(j)));
            }
        }
        pairs.sort_unstable();
        pairs
    }

    pub fn cell_edge_km(&self, tracks: &[SatelliteTrack<'_>], step_seconds: f64) -> f64 {
        let v_max = tracks
            .iter()
            .map(|t| t.max_speed_km_s())
            .fold(0.0_f64, f64::max);
        self.screening_distance_km
            + self.config.bucket_margin_km
            + self.config.speed_margin_factor * v_max * step_seconds
    }

    /// Candidate windows for the `allowed` index pairs.
    pub fn bucket_filter(
        &self,
        tracks: &[SatelliteTrack<'_>],
        grid: &SampleGrid,
        allowed: &[(usize, usize)],
        cell_edge_km: f64,
    ) -> Vec<CandidatePair> {
        let allowed: HashSet<(usize, usize)> = allowed.iter().copied().collect();
        if allowed.is_empty() {
            return Vec::new();
        }
        let slices = tracks
            .iter()
            .map(|t| t.trajectory.len())
            .min()
            .unwrap_or(0)
            .min(grid.len());

        let cell_map = |slice: usize| -> HashMap<CellKey, Vec<usize>> {
            let mut map: HashMap<CellKey, Vec<usize>> = HashMap::new();
            for (i, track) in tracks.iter().enumerate() {
                let p = track.trajectory.samples()[slice].position;
                map.entry(cell_of(&[p.x, p.y, p.z], cell_edge_km))
                    .or_default()
                    .push(i);
            }
            map
        };

        let mut hits: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        let mut previous: Option<HashMap<CellKey, Vec<usize>>> = None;
        let mut current = if slices > 0 { Some(cell_map(0)) } else { None };

        for k in 0..slices {
            let next = (k + 1 < slices).then(|| cell_map(k + 1));
            let Some(cur) = current.as_ref() else {
                break;
            };

            for (i, track) in tracks.iter().enumerate() {
                let p = track.trajectory.samples()[k].position;
                let (cx, cy, cz) = cell_of(&[p.x, p.y, p.z], cell_edge_km);
                for map in [previous.as_ref(), Some(cur), next.as_ref()].into_iter().flatten() {
                    for dx in -1..=1 {
                        for dy in -1..=1 {
                            for dz in -1..=1 {
                                let Some(others) = map.get(&(cx + dx, cy + dy, cz + dz)) else {
                                    continue;
                                };
                                for &j in others {
                                    let pair = (i.min(j), i.max(j));
                                    if i == j || !allowed.contains(&pair) {
                                        continue;
                                    }
                                    let slices_hit = hits.entry(pair).or_default();
                                    if slices_hit.last() != Some(&k) {
                                        slices_hit.push(k);
                                    }
                                }
                            }
                        }
                    }
                }
            }

            previous = current;
            current = next;
        }

        let last = slices.saturating_sub(1);
        let mut candidates = Vec::new();
        for ((i, j), slice_hits) in hits {
            let (primary, secondary) = ordered_ids(tracks[i].elements, tracks[j].elements);
            for (first, end) in merge_runs(&slice_hits) {
                candidates.push(CandidatePair {
                    primary: primary.to_string(),
                    secondary: secondary.to_string(),
                    window_start: grid.epoch(first.saturating_sub(1)),
                    window_end: grid.epoch((end + 1).min(last)),
                });
            }
        }
        candidates.sort();
        candidates
    }

    /// Both filters in sequence.
    pub fn prune(
        &self,
        tracks: &[SatelliteTrack<'_>],
        grid: &SampleGrid,
    ) -> (Vec<CandidatePair>, PruneStats) {
        let mut stats = PruneStats {
            satellites: tracks.len(),
            pairs_total: tracks.len() * tracks.len().saturating_sub(1) / 2,
            ..PruneStats::default()
        };
        for track in tracks {
            *stats.regimes.entry(track.elements.regime()).or_default() += 1;
        }

        let allowed = self.regime_filter(tracks);
        stats.pairs_after_regime = allowed.len();
        debug!(
            "Regime filter kept {} of {} pairs",
            stats.pairs_after_regime, stats.pairs_total
        );

        stats.cell_edge_km = self.cell_edge_km(tracks, grid.step_seconds());
        let candidates = self.bucket_filter(tracks, grid, &allowed, stats.cell_edge_km);

        let mut distinct: Vec<(&str, &str)> = candidates
            .iter()
            .map(|c| (c.primary.as_str(), c.secondary.as_str()))
            .collect();
        distinct.dedup();
        stats.pairs_after_bucket = distinct.len();
        stats.candidate_windows = candidates.len();
        debug!(
            "Bucket filter (cell {:.1} km) kept {} pairs in {} windows",
            stats.cell_edge_km, stats.pairs_after_bucket, stats.candidate_windows
        );

        (candidates, stats)
    }
}

fn cell_of(position: &[f64; 3], edge: f64) -> CellKey {
    (
        (position[0] / edge).floor() as i64,
        (position[1] / edge).floor() as i64,
        (position[2] / edge).floor() as i64,
    )
}

fn ordered_ids<'e>(a: &'e OrbitalElementSet, b: &'e OrbitalElementSet) -> (&'e str, &'e str) {
    if a.id <= b.id {
        (&a.id, &b.id)
    } else {
        (&b.id, &a.id)
    }
}

/// Merge sorted slice indices into runs, bridging single-slice gaps.
fn merge_runs(slices: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &k in slices {
        match runs.last_mut() {
            Some((_, end)) if k <= *end + 2 => *end = k,
            _ => runs.push((k, k)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use orbital_mechanics::{TrajectorySampler, TwoBodyPropagator};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 20, 0, 0, 0).unwrap()
    }

    fn tracks<'a>(
        catalog: &'a [OrbitalElementSet],
        propagator: &TwoBodyPropagator,
        grid: SampleGrid,
    ) -> Vec<SatelliteTrack<'a>> {
        catalog
            .iter()
            .map(|e| {
                let trajectory = TrajectorySampler::on_grid(propagator, e, grid)
                    .trajectory()
                    .unwrap();
                SatelliteTrack::new(e, trajectory)
            })
            .collect()
    }

    #[test]
    fn test_merge_runs_bridges_single_gaps() {
        assert_eq!(merge_runs(&[3, 4, 6, 10, 11]), vec![(3, 6), (10, 11)]);
        assert_eq!(merge_runs(&[]), Vec::<(usize, usize)>::new());
    }

    #[test]
    fn test_regime_filter_separates_leo_and_geo() {
        let catalog = vec![
            OrbitalElementSet::circular("LEO-1", epoch(), 7_000.0, 98.0, 0.0, 0.0),
            OrbitalElementSet::circular("GEO-1", epoch(), 42_164.0, 0.1, 0.0, 0.0),
            OrbitalElementSet::circular("LEO-2", epoch(), 7_020.0, 53.0, 0.0, 0.0),
        ];
        let propagator = TwoBodyPropagator::keplerian();
        let grid = SampleGrid::new(epoch(), epoch() + Duration::hours(1), Duration::seconds(60)).unwrap();
        let tracks = tracks(&catalog, &propagator, grid);

        let config = PruningConfig::default();
        let pruner = PairPruner::new(10.0, &config);
        assert_eq!(pruner.regime_filter(&tracks), vec![(0, 2)]);
    }

    #[test]
    fn test_crossing_pair_survives_with_window_around_crossing() {
        // Both cross +X at t = 0 from different planes
        let catalog = vec![
            OrbitalElementSet::circular("A", epoch(), 7_000.0, 0.0, 0.0, 0.0),
            OrbitalElementSet::circular("B", epoch(), 7_005.0, 90.0, 0.0, 0.0),
        ];
        let propagator = TwoBodyPropagator::keplerian();
        let start = epoch() - Duration::minutes(30);
        let grid = SampleGrid::new(start, epoch() + Duration::minutes(30), Duration::seconds(60)).unwrap();
        let tracks = tracks(&catalog, &propagator, grid);

        let config = PruningConfig::default();
        let (candidates, stats) = PairPruner::new(10.0, &config).prune(&tracks, &grid);

        assert_eq!(stats.pairs_after_regime, 1);
        assert!(!candidates.is_empty());
        let window = candidates
            .iter()
            .find(|c| c.window_start <= epoch() && epoch() <= c.window_end)
            .expect("crossing instant inside a candidate window");
        assert_eq!(window.primary, "A");
        assert_eq!(window.secondary, "B");
    }

    #[test]
    fn test_phased_coplanar_pair_pruned() {
        // Same orbit, half a revolution apart: never closer than the diameter
        let catalog = vec![
            OrbitalElementSet::circular("LEAD", epoch(), 7_000.0, 51.6, 10.0, 0.0),
            OrbitalElementSet::circular("TRAIL", epoch(), 7_000.0, 51.6, 10.0, 180.0),
        ];
        let propagator = TwoBodyPropagator::keplerian();
        let grid = SampleGrid::new(epoch(), epoch() + Duration::hours(3), Duration::seconds(60)).unwrap();
        let tracks = tracks(&catalog, &propagator, grid);

        let config = PruningConfig::default();
        let (candidates, stats) = PairPruner::new(10.0, &config).prune(&tracks, &grid);
        assert_eq!(stats.pairs_after_regime, 1);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_cell_edge_covers_motion_between_samples() {
        let catalog = vec![OrbitalElementSet::circular("A", epoch(), 7_000.0, 0.0, 0.0, 0.0)];
        let propagator = TwoBodyPropagator::keplerian();
        let grid = SampleGrid::new(epoch(), epoch() + Duration::minutes(10), Duration::seconds(60)).unwrap();
        let tracks = tracks(&catalog, &propagator, grid);

        let config = PruningConfig::default();
        let edge = PairPruner::new(10.0, &config).cell_edge_km(&tracks, 60.0);
        let v = catalog[0].max_speed_km_s();
        assert!((edge - (15.0 + 1.05 * v * 60.0)).abs() < 1e-6);
    }
}
