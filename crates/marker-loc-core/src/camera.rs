use nalgebra::{Point2, Point3, Unit, Vector3};
use serde::{Deserialize, Serialize};

/// Maximum number of fixed-point iterations when inverting the distortion model.
const UNDISTORT_MAX_ITERS: usize = 20;
/// Convergence tolerance for distortion inversion, in normalized image units.
const UNDISTORT_TOL: f64 = 1e-12;

/// Errors raised by camera projection and unprojection.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("point at depth {depth:.4} is behind the camera")]
    BehindCamera { depth: f64 },
    #[error("distortion inversion did not converge within {iterations} iterations")]
    DistortionDiverged { iterations: usize },
}

/// Plumb-bob (radial-tangential) distortion coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// Apply the distortion model to a normalized image point.
    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xd = x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (xd, yd)
    }

    fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0 && self.k3 == 0.0
    }
}

/// Calibrated pinhole camera with plumb-bob distortion.
///
/// Immutable after construction; all methods take `&self`, so a single model
/// can be shared read-only across concurrent estimation calls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraModel {
    /// Project a camera-frame point onto the image plane.
    ///
    /// Fails with [`ProjectionError::BehindCamera`] when the point has
    /// non-positive depth.
    pub fn project(&self, point: &Point3<f64>) -> Result<Point2<f64>, ProjectionError> {
        if point.z <= 0.0 {
            return Err(ProjectionError::BehindCamera { depth: point.z });
        }
        let x = point.x / point.z;
        let y = point.y / point.z;
        let (xd, yd) = self.distortion.apply(x, y);
        Ok(Point2::new(self.fx * xd + self.cx, self.fy * yd + self.cy))
    }

    /// Map a pixel to undistorted normalized image coordinates.
    ///
    /// Inverts the distortion model by fixed-point iteration; fails with
    /// [`ProjectionError::DistortionDiverged`] if the iteration does not
    /// settle within the bounded iteration count.
    pub fn undistort(&self, pixel: &Point2<f64>) -> Result<Point2<f64>, ProjectionError> {
        let xd = (pixel.x - self.cx) / self.fx;
        let yd = (pixel.y - self.cy) / self.fy;
        if self.distortion.is_zero() {
            return Ok(Point2::new(xd, yd));
        }

        let d = &self.distortion;
        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_MAX_ITERS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (d.k1 + r2 * (d.k2 + r2 * d.k3));
            let dx = 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
            let dy = d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;
            let x_next = (xd - dx) / radial;
            let y_next = (yd - dy) / radial;
            let step = (x_next - x).abs().max((y_next - y).abs());
            x = x_next;
            y = y_next;
            if step < UNDISTORT_TOL {
                return Ok(Point2::new(x, y));
            }
        }
        Err(ProjectionError::DistortionDiverged {
            iterations: UNDISTORT_MAX_ITERS,
        })
    }

    /// Unit ray through a pixel, expressed in the camera frame.
    pub fn unproject(&self, pixel: &Point2<f64>) -> Result<Unit<Vector3<f64>>, ProjectionError> {
        let n = self.undistort(pixel)?;
        Ok(Unit::new_normalize(Vector3::new(n.x, n.y, 1.0)))
    }
}
