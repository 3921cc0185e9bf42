//! Trajectory sampling
//!
//! A `TrajectorySampler` describes a fixed time grid; every call to `iter`
//! starts a fresh lazy pass over it. The grid is computed in whole
//! microseconds so every satellite sampled over the same window shares the
//! exact same slice epochs.

use chrono::{DateTime, Duration, Utc};

use crate::elements::OrbitalElementSet;
use crate::propagation::Propagator;
use crate::state::{StateVector, Trajectory};
use crate::{OrbitalError, Result};

/// Most slices a single grid may hold
pub const MAX_GRID_SLICES: usize = 10_000_000;

/// Fixed sampling grid over `[start, end]`; the last slice lands on `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleGrid {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    step_us: i64,
    steps: usize,
}

impl SampleGrid {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step: Duration) -> Result<Self> {
        let step_us = step
            .num_microseconds()
            .filter(|us| *us > 0)
            .ok_or_else(|| OrbitalError::InvalidSampling(format!("step {} must be positive", step)))?;
        if end < start {
            return Err(OrbitalError::InvalidSampling(format!(
                "window end {} precedes start {}",
                end, start
            )));
        }
        let span_us = end
            .signed_duration_since(start)
            .num_microseconds()
            .ok_or_else(|| OrbitalError::InvalidSampling("window too long".to_string()))?;
        let steps = ((span_us + step_us - 1) / step_us) as usize;
        if steps >= MAX_GRID_SLICES {
            return Err(OrbitalError::InvalidSampling(format!(
                "{} slices exceed the limit of {}",
                steps.saturating_add(1),
                MAX_GRID_SLICES
            )));
        }
        Ok(Self {
            start,
            end,
            step_us,
            steps,
        })
    }

    /// Number of slices, both ends included.
    pub fn len(&self) -> usize {
        self.steps + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn step(&self) -> Duration {
        Duration::microseconds(self.step_us)
    }

    pub fn step_seconds(&self) -> f64 {
        self.step_us as f64 * 1e-6
    }

    /// Epoch of slice `index`, clamped to `end`.
    pub fn epoch(&self, index: usize) -> DateTime<Utc> {
        if index >= self.steps {
            self.end
        } else {
            self.start + Duration::microseconds(self.step_us * index as i64)
        }
    }

    pub fn epochs(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..self.len()).map(move |k| self.epoch(k))
    }
}

/// Drives a propagator across a sample grid for one element set.
#[derive(Debug, Clone, Copy)]
pub struct TrajectorySampler<'a> {
    propagator: &'a dyn Propagator,
    elements: &'a OrbitalElementSet,
    grid: SampleGrid,
}

impl<'a> TrajectorySampler<'a> {
    pub fn new(
        propagator: &'a dyn Propagator,
        elements: &'a OrbitalElementSet,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Self> {
        Ok(Self::on_grid(propagator, elements, SampleGrid::new(start, end, step)?))
    }

    pub fn on_grid(
        propagator: &'a dyn Propagator,
        elements: &'a OrbitalElementSet,
        grid: SampleGrid,
    ) -> Self {
        Self {
            propagator,
            elements,
            grid,
        }
    }

    pub fn grid(&self) -> &SampleGrid {
        &self.grid
    }

    /// Fresh lazy pass over the grid.
    pub fn iter(&self) -> SampleIter<'a> {
        SampleIter {
            propagator: self.propagator,
            elements: self.elements,
            grid: self.grid,
            index: 0,
        }
    }

    /// Collect every sample, stopping at the first propagation failure.
    pub fn trajectory(&self) -> Result<Trajectory> {
        let mut trajectory = Trajectory::with_capacity(self.elements.id.as_str(), self.grid.len());
        for state in self.iter() {
            trajectory.push(state?)?;
        }
        Ok(trajectory)
    }
}

impl<'a> IntoIterator for &TrajectorySampler<'a> {
    type Item = Result<StateVector>;
    type IntoIter = SampleIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct SampleIter<'a> {
    propagator: &'a dyn Propagator,
    elements: &'a OrbitalElementSet,
    grid: SampleGrid,
    index: usize,
}

impl Iterator for SampleIter<'_> {
    type Item = Result<StateVector>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.grid.len() {
            return None;
        }
        let at = self.grid.epoch(self.index);
        self.index += 1;
        Some(self.propagator.propagate(self.elements, at))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.len() - self.index.min(self.grid.len());
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SampleIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::TwoBodyPropagator;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 10, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_grid_ends_exactly_on_window_end() {
        let grid = SampleGrid::new(epoch(), epoch() + Duration::seconds(130), Duration::seconds(60)).unwrap();
        let epochs: Vec<_> = grid.epochs().collect();
        assert_eq!(epochs.len(), 4);
        assert_eq!(epochs[1], epoch() + Duration::seconds(60));
        assert_eq!(epochs[3], epoch() + Duration::seconds(130));
    }

    #[test]
    fn test_grid_divisible_span() {
        let grid = SampleGrid::new(epoch(), epoch() + Duration::hours(24), Duration::seconds(60)).unwrap();
        assert_eq!(grid.len(), 1441);
        assert_eq!(grid.epoch(1440), epoch() + Duration::hours(24));
    }

    #[test]
    fn test_invalid_grid() {
        assert!(SampleGrid::new(epoch(), epoch(), Duration::zero()).is_err());
        assert!(SampleGrid::new(epoch(), epoch() - Duration::seconds(1), Duration::seconds(1)).is_err());
        assert_eq!(SampleGrid::new(epoch(), epoch(), Duration::seconds(5)).unwrap().len(), 1);
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let limit = MAX_GRID_SLICES as i64;
        let oversized = SampleGrid::new(epoch(), epoch() + Duration::seconds(limit), Duration::seconds(1));
        assert!(matches!(oversized, Err(OrbitalError::InvalidSampling(_))));
        let widest = SampleGrid::new(epoch(), epoch() + Duration::seconds(limit - 2), Duration::seconds(1)).unwrap();
        assert_eq!(widest.len(), MAX_GRID_SLICES - 1);
    }

    #[test]
    fn test_sampler_is_restartable() {
        let propagator = TwoBodyPropagator::new();
        let sat = OrbitalElementSet::circular("S", epoch(), 7_000.0, 53.0, 0.0, 0.0);
        let sampler = TrajectorySampler::new(
            &propagator,
            &sat,
            epoch(),
            epoch() + Duration::minutes(10),
            Duration::seconds(60),
        )
        .unwrap();

        let first: Vec<_> = sampler.iter().map(|s| s.unwrap()).collect();
        let second: Vec<_> = sampler.iter().map(|s| s.unwrap()).collect();
        assert_eq!(first.len(), 11);
        assert_eq!(first, second);
        assert_eq!(sampler.iter().len(), 11);

        let trajectory = sampler.trajectory().unwrap();
        assert_eq!(trajectory.len(), 11);
        assert_eq!(trajectory.satellite_id(), "S");
        assert!(trajectory
            .samples()
            .windows(2)
            .all(|w| w[0].epoch < w[1].epoch));
    }

    #[test]
    fn test_sampler_surfaces_propagation_errors() {
        let propagator = TwoBodyPropagator::new().with_max_element_age(Some(Duration::minutes(5)));
        let sat = OrbitalElementSet::circular("S", epoch(), 7_000.0, 53.0, 0.0, 0.0);
        let sampler = TrajectorySampler::new(
            &propagator,
            &sat,
            epoch(),
            epoch() + Duration::minutes(10),
            Duration::seconds(60),
        )
        .unwrap();
        let results: Vec<_> = sampler.iter().collect();
        assert!(results[..6].iter().all(|r| r.is_ok()));
        assert!(results[6..].iter().all(|r| r.is_err()));
        assert!(sampler.trajectory().is_err());
    }
}
