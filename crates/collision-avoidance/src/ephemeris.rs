//! Object ephemerides
//!
//! The detector only needs "state of this object at time t". `Ephemeris`
//! gives it that without caring whether the answer comes straight from the
//! catalog's element set or from a trajectory altered by an impulsive burn.

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use orbital_mechanics::{
    OrbitalElementSet, Propagator, Result, StateVector, TwoBodyPropagator,
};

pub trait Ephemeris: Send + Sync {
    fn object_id(&self) -> &str;

    /// Inertial state at `at`.
    fn state_at(&self, at: DateTime<Utc>) -> Result<StateVector>;
}

/// Catalog element set driven by the cycle's propagator.
#[derive(Debug, Clone, Copy)]
pub struct ElementEphemeris<'a> {
    propagator: &'a dyn Propagator,
    elements: &'a OrbitalElementSet,
}

impl<'a> ElementEphemeris<'a> {
    pub fn new(propagator: &'a dyn Propagator, elements: &'a OrbitalElementSet) -> Self {
        Self {
            propagator,
            elements,
        }
    }

    pub fn elements(&self) -> &'a OrbitalElementSet {
        self.elements
    }
}

impl Ephemeris for ElementEphemeris<'_> {
    fn object_id(&self) -> &str {
        &self.elements.id
    }

    fn state_at(&self, at: DateTime<Utc>) -> Result<StateVector> {
        Ok(self.propagator.propagate(self.elements, at)?.to_inertial())
    }
}

/// Post-burn arcs, as osculating two-body orbits from the burn state.
#[derive(Debug, Clone)]
struct BurnArcs {
    burned: OrbitalElementSet,
    coasting: OrbitalElementSet,
    propagator: TwoBodyPropagator,
}

/// An element-set ephemeris with one impulsive Δv applied at `burn_epoch`.
///
/// After the burn the state is the base ephemeris plus the difference
/// between the burned and un-burned two-body arcs from the burn state, so
/// the base model's own accuracy carries through and a zero Δv changes
/// nothing at all.
#[derive(Debug, Clone)]
pub struct ManeuveredEphemeris<'a> {
    base: ElementEphemeris<'a>,
    burn_epoch: DateTime<Utc>,
    delta_v_km_s: Vector3<f64>,
    arcs: Option<BurnArcs>,
}

impl<'a> ManeuveredEphemeris<'a> {
    /// `delta_v_km_s` is inertial; `j2` selects secular drift on the post-burn arcs.
    pub fn new(
        base: ElementEphemeris<'a>,
        burn_epoch: DateTime<Utc>,
        delta_v_km_s: Vector3<f64>,
        j2: bool,
    ) -> Result<Self> {
        let arcs = if delta_v_km_s.iter().all(|c| *c == 0.0) {
            None
        } else {
            let state = base.state_at(burn_epoch)?;
            let id = base.object_id().to_string();
            Some(BurnArcs {
                burned: OrbitalElementSet::osculating(id.clone(), &state.with_delta_v(&delta_v_km_s))?,
                coasting: OrbitalElementSet::osculating(id, &state)?,
                propagator: TwoBodyPropagator::new()
                    .with_j2(j2)
                    .with_max_element_age(None),
            })
        };
        Ok(Self {
            base,
            burn_epoch,
            delta_v_km_s,
            arcs,
        })
    }

    pub fn burn_epoch(&self) -> DateTime<Utc> {
        self.burn_epoch
    }

    pub fn delta_v_km_s(&self) -> &Vector3<f64> {
        &self.delta_v_km_s
    }
}

impl Ephemeris for ManeuveredEphemeris<'_> {
    fn object_id(&self) -> &str {
        self.base.object_id()
    }

    fn state_at(&self, at: DateTime<Utc>) -> Result<StateVector> {
        let base = self.base.state_at(at)?;
        let Some(arcs) = self.arcs.as_ref().filter(|_| at >= self.burn_epoch) else {
            return Ok(base);
        };
        let burned = arcs.propagator.propagate(&arcs.burned, at)?;
        let coasting = arcs.propagator.propagate(&arcs.coasting, at)?;
        Ok(StateVector {
            position: base.position + (burned.position - coasting.position),
            velocity: base.velocity + (burned.velocity - coasting.velocity),
            ..base
        })
    }
}
