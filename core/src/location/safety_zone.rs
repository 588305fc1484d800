//! Safety zones
//!
//! A safety zone is a circle the user marks (home, office) inside which Wave
//! is switched off automatically so nobody can discover them there. Leaving
//! the zone can optionally switch Wave back on.

use super::LocationFix;
use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default zone radius in meters
pub const DEFAULT_SAFETY_ZONE_RADIUS_M: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyZone {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Radius in meters
    pub radius: f64,
    pub is_enabled: bool,
    /// Turn Wave back on after leaving the zone
    pub enable_wave_after_exit: bool,
}

impl Default for SafetyZone {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            radius: DEFAULT_SAFETY_ZONE_RADIUS_M,
            is_enabled: false,
            enable_wave_after_exit: true,
        }
    }
}

impl SafetyZone {
    pub fn new(latitude: f64, longitude: f64, radius: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            radius,
            is_enabled: true,
            ..Default::default()
        }
    }

    /// Enabled and has a center
    pub fn is_active(&self) -> bool {
        self.is_enabled && self.latitude.is_some() && self.longitude.is_some() && self.radius > 0.0
    }

    /// Whether the fix lies inside the zone. Inactive zones contain nothing.
    pub fn contains(&self, fix: &LocationFix) -> bool {
        match (self.is_active(), self.latitude, self.longitude) {
            (true, Some(lat), Some(lon)) => {
                haversine_distance_m(lat, lon, fix.latitude, fix.longitude) <= self.radius
            }
            _ => false,
        }
    }
}

/// Great-circle distance between two coordinates in meters
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneTransition {
    Entered,
    Exited,
}

/// Edge-triggered zone membership tracker
#[derive(Debug, Default)]
pub struct SafetyZoneTracker {
    zone: Option<SafetyZone>,
    inside: Option<bool>,
}

impl SafetyZoneTracker {
    pub fn new(zone: Option<SafetyZone>) -> Self {
        Self { zone, inside: None }
    }

    pub fn zone(&self) -> Option<&SafetyZone> {
        self.zone.as_ref()
    }

    /// Whether the last observed fix was inside an active zone
    pub fn is_inside(&self) -> bool {
        self.inside == Some(true)
    }

    /// Replace the zone; membership is re-evaluated on the next fix
    pub fn set_zone(&mut self, zone: Option<SafetyZone>) {
        self.zone = zone;
        self.inside = None;
    }

    /// Feed a fix; returns a transition when membership changes.
    ///
    /// The first fix inside the zone counts as entering it. The first fix
    /// outside establishes the baseline without a transition.
    pub fn observe(&mut self, fix: &LocationFix) -> Option<ZoneTransition> {
        let zone = match &self.zone {
            Some(zone) if zone.is_active() => zone,
            _ => {
                self.inside = None;
                return None;
            }
        };

        let now_inside = zone.contains(fix);
        let previous = self.inside.replace(now_inside);

        match (previous, now_inside) {
            (None, true) | (Some(false), true) => Some(ZoneTransition::Entered),
            (Some(true), false) => Some(ZoneTransition::Exited),
            _ => None,
        }
    }
}
