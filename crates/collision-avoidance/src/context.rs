//! Cycle-scoped context
//!
//! Everything one screening cycle shares between its stages: the validated
//! config, the propagator, a read-only view of the catalog and the cycle's
//! clock (window, reference time, deadline, cancellation). A context is built
//! per cycle and dropped with it, so concurrent cycles never see each other.

use chrono::{DateTime, Utc};
use orbital_mechanics::{OrbitalElementSet, Propagator};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::ScreeningConfig;
use crate::ephemeris::ElementEphemeris;

/// Shared flag an operator (or a caller's own timeout) flips to stop a cycle.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct CycleContext<'a> {
    pub config: &'a ScreeningConfig,
    propagator: &'a dyn Propagator,
    catalog: BTreeMap<&'a str, &'a OrbitalElementSet>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Lead-time constraints are measured from here
    pub reference_time: DateTime<Utc>,
    deadline: Option<Instant>,
    cancel: CancelToken,
    interrupted: AtomicBool,
}

impl<'a> CycleContext<'a> {
    pub fn new(
        config: &'a ScreeningConfig,
        propagator: &'a dyn Propagator,
        catalog: &'a [OrbitalElementSet],
        window_start: DateTime<Utc>,
        cancel: CancelToken,
    ) -> Self {
        let deadline = config
            .execution
            .cycle_timeout_ms
            .map(|ms| Instant::now() + std::time::Duration::from_millis(ms));
        Self {
            config,
            propagator,
            catalog: catalog.iter().map(|e| (e.id.as_str(), e)).collect(),
            window_start,
            window_end: window_start + config.window_duration(),
            reference_time: window_start,
            deadline,
            cancel,
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn propagator(&self) -> &'a dyn Propagator {
        self.propagator
    }

    pub fn elements(&self, id: &str) -> Option<&'a OrbitalElementSet> {
        self.catalog.get(id).copied()
    }

    pub fn ephemeris(&self, id: &str) -> Option<ElementEphemeris<'a>> {
        self.elements(id)
            .map(|elements| ElementEphemeris::new(self.propagator, elements))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the cycle is cancelled or past its deadline; latches.
    pub fn should_stop(&self) -> bool {
        if self.interrupted.load(Ordering::Relaxed) {
            return true;
        }
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        if expired || self.cancel.is_cancelled() {
            self.interrupted.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use orbital_mechanics::TwoBodyPropagator;

    fn catalog(epoch: DateTime<Utc>) -> Vec<OrbitalElementSet> {
        vec![
            OrbitalElementSet::circular("A", epoch, 7000.0, 0.0, 0.0, 0.0),
            OrbitalElementSet::circular("B", epoch, 7100.0, 45.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn test_lookup_and_window() {
        let epoch = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let config = ScreeningConfig::default();
        let propagator = TwoBodyPropagator::new();
        let catalog = catalog(epoch);
        let ctx = CycleContext::new(&config, &propagator, &catalog, epoch, CancelToken::new());

        assert_eq!(ctx.window_end - ctx.window_start, chrono::Duration::hours(24));
        assert_eq!(ctx.reference_time, epoch);
        assert_eq!(ctx.elements("B").map(|e| e.id.as_str()), Some("B"));
        assert!(ctx.elements("C").is_none());
        assert!(ctx.ephemeris("A").is_some());
    }

    #[test]
    fn test_cancel_latches() {
        let epoch = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let config = ScreeningConfig::default();
        let propagator = TwoBodyPropagator::new();
        let catalog = catalog(epoch);
        let cancel = CancelToken::new();
        let ctx = CycleContext::new(&config, &propagator, &catalog, epoch, cancel.clone());

        assert!(!ctx.should_stop());
        cancel.cancel();
        assert!(ctx.should_stop());
        assert!(ctx.was_interrupted());
    }

    #[test]
    fn test_zero_timeout_expires() {
        let epoch = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut config = ScreeningConfig::default();
        config.execution.cycle_timeout_ms = Some(0);
        let propagator = TwoBodyPropagator::new();
        let catalog = catalog(epoch);
        let ctx = CycleContext::new(&config, &propagator, &catalog, epoch, CancelToken::new());
        assert!(ctx.should_stop());
    }
}
