use crate::model::Coordinate;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lng - a.lng).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Where a point falls relative to a straight segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    /// Position along the segment, 0.0 at the start and 1.0 at the end.
    pub fraction: f64,
    /// Distance in meters from the point to the closest point of the segment.
    pub offset_m: f64,
}

/// Projects `point` onto the segment `start`..`end`.
///
/// Uses an equirectangular plane centred on `start`, which is accurate at
/// the scale of a single stop-to-stop connection.
pub fn project_onto_segment(point: Coordinate, start: Coordinate, end: Coordinate) -> Projection {
    let meters_per_deg = EARTH_RADIUS_M.to_radians();
    let lng_scale = start.lat.to_radians().cos() * meters_per_deg;

    let bx = (end.lng - start.lng) * lng_scale;
    let by = (end.lat - start.lat) * meters_per_deg;
    let px = (point.lng - start.lng) * lng_scale;
    let py = (point.lat - start.lat) * meters_per_deg;

    let len_sq = bx * bx + by * by;
    let fraction = if len_sq <= f64::EPSILON {
        0.0
    } else {
        ((px * bx + py * by) / len_sq).clamp(0.0, 1.0)
    };

    let dx = px - fraction * bx;
    let dy = py - fraction * by;

    Projection {
        fraction,
        offset_m: (dx * dx + dy * dy).sqrt(),
    }
}
