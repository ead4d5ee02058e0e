use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capture timestamp, stored as nanoseconds on an arbitrary monotonic clock.
///
/// [`Stamp::LATEST`] (the zero stamp) is a sentinel: transform lookups treat
/// it as "the newest available sample" rather than a point in time.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Stamp(u64);

impl Stamp {
    /// Sentinel selecting the newest stored sample in graph lookups.
    pub const LATEST: Stamp = Stamp(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Stamp(nanos)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Stamp((secs.max(0.0) * 1e9) as u64)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 * 1e-9
    }

    pub const fn is_latest(self) -> bool {
        self.0 == 0
    }

    /// Stamp shifted into the past by `d`, saturating at the clock origin.
    pub fn saturating_sub(self, d: Duration) -> Stamp {
        Stamp(self.0.saturating_sub(d.as_nanos() as u64))
    }

    /// Stamp shifted into the future by `d`.
    pub fn advanced(self, d: Duration) -> Stamp {
        Stamp(self.0 + d.as_nanos() as u64)
    }
}

/// Errors describing a corner quadrilateral unusable for pose estimation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum QuadGeometryError {
    #[error("corners {a} and {b} are {dist:.2} px apart (minimum {min:.2} px)")]
    CornersTooClose {
        a: usize,
        b: usize,
        dist: f64,
        min: f64,
    },
    #[error("corners are collinear or not in convex winding order")]
    NotConvex,
}

/// One detected marker in one image: id plus the four corner pixels.
///
/// Corners follow a fixed winding order: top-left, top-right, bottom-right,
/// bottom-left, as seen on the upright marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerObservation {
    pub id: u32,
    pub corners: [Point2<f64>; 4],
    /// Name of the camera frame the corners were observed in.
    pub frame_id: String,
    pub stamp: Stamp,
}

impl MarkerObservation {
    /// Check that the corners form a convex quadrilateral in the expected
    /// winding order with sufficient spread.
    ///
    /// Degenerate quads (collinear corners, bow-ties, reversed winding) make
    /// the planar pose problem ill-posed and must be rejected before any
    /// solve is attempted.
    pub fn validate_quad(&self, min_separation_px: f64) -> Result<(), QuadGeometryError> {
        for a in 0..4 {
            for b in (a + 1)..4 {
                let dist = (self.corners[a] - self.corners[b]).norm();
                if dist < min_separation_px {
                    return Err(QuadGeometryError::CornersTooClose {
                        a,
                        b,
                        dist,
                        min: min_separation_px,
                    });
                }
            }
        }

        // In image coordinates (y down) the top-left, top-right, bottom-right,
        // bottom-left order yields a positive z-component for every successive
        // edge cross product. Any non-positive turn means the quad is concave,
        // self-intersecting, or wound backwards.
        for i in 0..4 {
            let p0 = self.corners[i];
            let p1 = self.corners[(i + 1) % 4];
            let p2 = self.corners[(i + 2) % 4];
            let e0 = p1 - p0;
            let e1 = p2 - p1;
            let cross = e0.x * e1.y - e0.y * e1.x;
            if cross <= 0.0 {
                return Err(QuadGeometryError::NotConvex);
            }
        }
        Ok(())
    }
}
