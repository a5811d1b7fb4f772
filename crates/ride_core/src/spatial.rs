//! Spatial helpers: H3 cells, haversine distance and pickup ETA estimates.
//!
//! Lat/lng positions map to H3 cells at resolution 9 (~240m). Distances and
//! ETAs work for cells of any resolution.

use h3o::{CellIndex, LatLng, Resolution};

use crate::clock::ONE_SEC_MS;

pub const DEFAULT_RESOLUTION: Resolution = Resolution::Nine;

/// Great-circle distance between two cell centers in kilometers.
pub fn distance_km_between_cells(a: CellIndex, b: CellIndex) -> f64 {
    let a: LatLng = a.into();
    let b: LatLng = b.into();
    let (lat1, lon1) = (a.lat().to_radians(), a.lng().to_radians());
    let (lat2, lon2) = (b.lat().to_radians(), b.lng().to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    6371.0 * c
}

/// Pickup ETA for a straight-line distance at `speed_kmh`. Never below one second.
pub fn pickup_eta_ms(distance_km: f64, speed_kmh: f64) -> u64 {
    if distance_km <= 0.0 || speed_kmh <= 0.0 {
        return ONE_SEC_MS;
    }
    let hours = distance_km / speed_kmh;
    (hours * 3_600_000.0).max(ONE_SEC_MS as f64) as u64
}

/// True when `b` lies within `radius` grid steps of `a`. Cells too far apart
/// for H3 to measure count as out of range.
pub fn within_grid_radius(a: CellIndex, b: CellIndex, radius: u32) -> bool {
    let dist = a.grid_distance(b).unwrap_or(i32::MAX);
    dist >= 0 && dist <= radius as i32
}

pub fn cell_from_lat_lng(lat: f64, lng: f64) -> Option<CellIndex> {
    LatLng::new(lat, lng)
        .ok()
        .map(|coord| coord.to_cell(DEFAULT_RESOLUTION))
}

/// Serializes a [CellIndex] as its raw `u64` so snapshots stay plain JSON.
pub mod cell_serde {
    use h3o::CellIndex;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cell: &CellIndex, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::from(*cell))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CellIndex, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        CellIndex::try_from(raw).map_err(D::Error::custom)
    }
}
