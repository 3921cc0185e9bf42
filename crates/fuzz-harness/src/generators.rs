//! Orbital generators for property-based testing
//!
//! Angles are degrees, distances km, times UTC. Element sets come out of
//! the same constructors production code uses, so every generated value is
//! something the propagators accept.

use chrono::{DateTime, Duration, TimeZone, Utc};
use nalgebra::{Rotation3, Unit, Vector3};
use orbital_mechanics::{
    offset_seconds, seconds_between, OrbitalElementSet, Propagator, StateVector,
    TwoBodyPropagator, EARTH_RADIUS_KM, MU_EARTH_KM3_S2,
};
use proptest::prelude::*;

/// Lowest perigee altitude a generated orbit may have (km)
pub const MIN_PERIGEE_ALTITUDE_KM: f64 = 200.0;

// ============================================================================
// Element Ranges
// ============================================================================

/// LEO altitude (300-1500 km)
pub fn altitude_leo_km() -> impl Strategy<Value = f64> {
    300.0f64..1_500.0
}

/// Near-circular eccentricity (0-0.01)
pub fn eccentricity_circular() -> impl Strategy<Value = f64> {
    0.0f64..0.01
}

/// Inclination in degrees (0-180)
pub fn inclination_deg() -> impl Strategy<Value = f64> {
    0.0f64..=180.0
}

/// RAAN (0-360 deg)
pub fn raan_deg() -> impl Strategy<Value = f64> {
    0.0f64..360.0
}

/// Argument of perigee (0-360 deg)
pub fn arg_perigee_deg() -> impl Strategy<Value = f64> {
    0.0f64..360.0
}

/// Mean anomaly (0-360 deg)
pub fn mean_anomaly_deg() -> impl Strategy<Value = f64> {
    0.0f64..360.0
}

// ============================================================================
// Identity and Time
// ============================================================================

/// NORAD ID (5-digit range)
pub fn norad_id() -> impl Strategy<Value = u32> {
    10_000u32..99_999u32
}

/// Generic satellite name
pub fn sat_name() -> impl Strategy<Value = String> {
    "[A-Z]{1,3}-[0-9]{1,4}".prop_map(|s| s.to_string())
}

/// Epoch within 2025, whole seconds
pub fn epoch() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..365 * 86_400).prop_map(|s| base_epoch() + Duration::seconds(s))
}

fn base_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

// ============================================================================
// Element Sets
// ============================================================================

/// Near-circular LEO element set with the given id, epoch at 2025-01-01.
pub fn leo_elements(id: &'static str) -> impl Strategy<Value = OrbitalElementSet> {
    (
        altitude_leo_km(),
        eccentricity_circular(),
        inclination_deg(),
        raan_deg(),
        arg_perigee_deg(),
        mean_anomaly_deg(),
    )
        .prop_filter_map(
            "perigee too low",
            move |(altitude, e, inc, raan, argp, m)| {
                let a = EARTH_RADIUS_KM + altitude;
                if a * (1.0 - e) - EARTH_RADIUS_KM < MIN_PERIGEE_ALTITUDE_KM {
                    return None;
                }
                let n_rev_day = (MU_EARTH_KM3_S2 / a.powi(3)).sqrt() * 86_400.0
                    / std::f64::consts::TAU;
                Some(OrbitalElementSet::new(
                    id,
                    base_epoch(),
                    inc,
                    raan,
                    e,
                    argp,
                    m,
                    n_rev_day,
                ))
            },
        )
}

/// Two circular orbits meeting at +X at `crossing`: "A" equatorial at
/// `radius_km`, "B" polar at `radius_km + gap_km`. Under Keplerian motion
/// the separation at `crossing` is exactly `gap_km`, and it is the closest
/// approach.
pub fn crossing_circular_pair(
    epoch: DateTime<Utc>,
    crossing: DateTime<Utc>,
    radius_km: f64,
    gap_km: f64,
) -> [OrbitalElementSet; 2] {
    let dt = seconds_between(epoch, crossing);
    let phase_deg = |radius: f64| {
        let n = (MU_EARTH_KM3_S2 / radius.powi(3)).sqrt();
        (-(n * dt).to_degrees()).rem_euclid(360.0)
    };
    let outer = radius_km + gap_km;
    [
        OrbitalElementSet::circular("A", epoch, radius_km, 0.0, 0.0, phase_deg(radius_km)),
        OrbitalElementSet::circular("B", epoch, outer, 90.0, 0.0, phase_deg(outer)),
    ]
}

/// A generated conjunction: B is built from A's state at `crossing`, displaced
/// by less than `max_offset_km` and flying a rotated velocity.
#[derive(Debug, Clone)]
pub struct CrossingPair {
    pub primary: OrbitalElementSet,
    pub secondary: OrbitalElementSet,
    pub crossing: DateTime<Utc>,
    /// Separation at `crossing` (km); an upper bound on the true miss distance
    pub separation_km: f64,
}

/// Crossing pairs within `[0, window_seconds]` of 2025-01-01, Keplerian.
pub fn crossing_pair(
    window_seconds: f64,
    max_offset_km: f64,
) -> impl Strategy<Value = CrossingPair> {
    (
        leo_elements("A"),
        0.05f64..0.95,
        20.0f64..160.0,
        -0.002f64..0.002,
        (-1.0f64..1.0, -1.0f64..1.0, -1.0f64..1.0),
        0.0f64..1.0,
    )
        .prop_filter_map(
            "crossing pair not bounded",
            move |(primary, fraction, turn_deg, speed_change, direction, scale)| {
                let crossing = offset_seconds(primary.epoch, fraction * window_seconds);
                let state = TwoBodyPropagator::keplerian()
                    .with_max_element_age(None)
                    .propagate(&primary, crossing)
                    .ok()?;

                let offset = Vector3::new(direction.0, direction.1, direction.2)
                    .try_normalize(1e-6)?
                    * (scale * max_offset_km);
                let radial = Unit::try_new(state.position, 1e-9)?;
                let velocity = Rotation3::from_axis_angle(&radial, turn_deg.to_radians())
                    * state.velocity
                    * (1.0 + speed_change);
                let secondary_state = StateVector::new(
                    state.position + offset,
                    velocity,
                    crossing,
                    "B",
                );

                let secondary = OrbitalElementSet::osculating("B", &secondary_state).ok()?;
                if secondary.perigee_altitude_km() < MIN_PERIGEE_ALTITUDE_KM
                    || secondary.check_bounded().is_err()
                {
                    return None;
                }
                Some(CrossingPair {
                    primary,
                    secondary,
                    crossing,
                    separation_km: offset.norm(),
                })
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_circular_pair_meets_at_crossing() {
        let t0 = base_epoch();
        let crossing = t0 + Duration::hours(5);
        let [a, b] = crossing_circular_pair(t0, crossing, 7_000.0, 8.0);
        let propagator = TwoBodyPropagator::keplerian();
        let sa = propagator.propagate(&a, crossing).unwrap();
        let sb = propagator.propagate(&b, crossing).unwrap();
        assert!((sa.separation_km(&sb) - 8.0).abs() < 1e-6);
        assert!(sa.position.x > 6_999.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_leo_elements_bounded(elements in leo_elements("SAT")) {
            prop_assert!(elements.check_bounded().is_ok());
            prop_assert!(elements.perigee_altitude_km() >= MIN_PERIGEE_ALTITUDE_KM);
        }

        #[test]
        fn test_crossing_pair_separation(pair in crossing_pair(86_400.0, 5.0)) {
            let propagator = TwoBodyPropagator::keplerian().with_max_element_age(None);
            let a = propagator.propagate(&pair.primary, pair.crossing).unwrap();
            let b = propagator.propagate(&pair.secondary, pair.crossing).unwrap();
            prop_assert!((a.separation_km(&b) - pair.separation_km).abs() < 1e-3);
            prop_assert!(pair.separation_km <= 5.0);
        }
    }
}
