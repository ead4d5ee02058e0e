use log::debug;
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};

use marker_loc_core::{CameraModel, Iso3, MarkerObservation, ProjectionError, QuadGeometryError, Stamp};

use crate::homography::homography_from_corners;
use crate::refine::{alternate_rotation, orthogonal_iteration, pose_from_homography};

/// Errors that drop a single marker observation from the current frame.
///
/// None of these abort the pipeline: a degenerate observation is logged and
/// skipped, and the remaining markers of the frame are processed normally.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EstimateError {
    #[error("degenerate corner geometry: {0}")]
    DegenerateCorners(#[from] QuadGeometryError),
    #[error("corner correspondences admit no homography")]
    SingularHomography,
    #[error("pose solve did not converge: residual {residual_px:.3} px above limit {limit_px:.3}")]
    NotConverged { residual_px: f64, limit_px: f64 },
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Tuning knobs for the single-marker pose solve.
#[derive(Clone, Debug)]
pub struct EstimatorParams {
    /// Reject the observation when the best branch's RMS reprojection error
    /// exceeds this many pixels.
    pub max_rms_px: f64,
    /// Orthogonal-iteration refinement steps per solution branch.
    pub refine_iterations: u32,
    /// Minimum rotation angle (rad) between the two branches before the
    /// alternative is considered distinct and refined.
    pub ambiguity_min_angle_rad: f64,
    /// Minimum pixel distance between any two observed corners.
    pub min_corner_separation_px: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            max_rms_px: 4.0,
            refine_iterations: 50,
            ambiguity_min_angle_rad: 0.1,
            min_corner_separation_px: 4.0,
        }
    }
}

/// Pose of one marker in the camera optical frame, with its quality signal.
#[derive(Clone, Debug)]
pub struct PoseEstimate {
    pub id: u32,
    pub stamp: Stamp,
    /// Marker frame -> camera optical frame.
    pub pose: Iso3,
    /// RMS pixel reprojection error of the chosen solution branch.
    pub residual_px: f64,
    /// Residual of the rejected branch, when the two-fold planar ambiguity
    /// produced a distinct second solution.
    pub alt_residual_px: Option<f64>,
    /// Canonical corners re-projected through the estimated pose. These, not
    /// the raw detector pixels, are what downstream consumers render by
    /// default: the solve smooths single-pixel detector jitter.
    pub reprojected_corners: [Point2<f64>; 4],
}

/// Marker-local 3D corners of an upright square of the given side length,
/// ordered to match the observation winding (top-left, top-right,
/// bottom-right, bottom-left).
pub fn canonical_corners(side_length: f64) -> [Point3<f64>; 4] {
    let s = side_length / 2.0;
    [
        Point3::new(-s, s, 0.0),
        Point3::new(s, s, 0.0),
        Point3::new(s, -s, 0.0),
        Point3::new(-s, -s, 0.0),
    ]
}

/// Recovers marker poses in the camera optical frame from corner pixels.
pub struct MarkerPoseEstimator {
    camera: CameraModel,
    params: EstimatorParams,
}

impl MarkerPoseEstimator {
    pub fn new(camera: CameraModel, params: EstimatorParams) -> Self {
        Self { camera, params }
    }

    #[inline]
    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    #[inline]
    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    /// Estimate the pose of one observed marker of known side length.
    ///
    /// Both solution branches of the planar four-point problem are refined;
    /// the branch with the lower pixel reprojection error wins and the other
    /// branch's residual is reported alongside it.
    pub fn estimate(
        &self,
        observation: &MarkerObservation,
        side_length: f64,
    ) -> Result<PoseEstimate, EstimateError> {
        observation.validate_quad(self.params.min_corner_separation_px)?;

        let model = canonical_corners(side_length);
        let model_plane = model.map(|p| Point2::new(p.x, p.y));

        let mut normalized = [Point2::origin(); 4];
        for (n, px) in normalized.iter_mut().zip(observation.corners.iter()) {
            *n = self.camera.undistort(px)?;
        }

        let h = homography_from_corners(&model_plane, &normalized)
            .ok_or(EstimateError::SingularHomography)?;
        let (r_init, t_init) =
            pose_from_homography(&h).ok_or(EstimateError::SingularHomography)?;

        let rays = normalized.map(|n| Vector3::new(n.x, n.y, 1.0));

        let (r_best, t_best, _) = orthogonal_iteration(
            &rays,
            &model,
            &r_init,
            &t_init,
            self.params.refine_iterations,
        );
        let res_best = self.reprojection_rms(&r_best, &t_best, &model, &observation.corners);

        // Second basin of the planar ambiguity: reflect about the viewing
        // axis and refine again, then keep whichever branch reprojects best.
        let alternate = alternate_rotation(&r_best, &t_best, self.params.ambiguity_min_angle_rad)
            .map(|r_alt| {
                let (r, t, _) = orthogonal_iteration(
                    &rays,
                    &model,
                    &r_alt,
                    &t_best,
                    self.params.refine_iterations,
                );
                let res = self.reprojection_rms(&r, &t, &model, &observation.corners);
                (r, t, res)
            });

        let (r, t, residual_px, alt_residual_px) = match alternate {
            Some((r_alt, t_alt, res_alt)) if res_alt < res_best => {
                debug!(
                    "marker {}: ambiguous pose, alternate branch wins ({:.3} px < {:.3} px)",
                    observation.id, res_alt, res_best
                );
                (r_alt, t_alt, res_alt, Some(res_best))
            }
            Some((_, _, res_alt)) => (r_best, t_best, res_best, Some(res_alt)),
            None => (r_best, t_best, res_best, None),
        };

        if !residual_px.is_finite() || residual_px > self.params.max_rms_px {
            return Err(EstimateError::NotConverged {
                residual_px,
                limit_px: self.params.max_rms_px,
            });
        }

        let pose = Iso3::from_parts(
            Translation3::from(t),
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r)),
        );

        let mut reprojected_corners = [Point2::origin(); 4];
        for (out, p) in reprojected_corners.iter_mut().zip(model.iter()) {
            *out = self.camera.project(&pose.transform_point(p))?;
        }

        Ok(PoseEstimate {
            id: observation.id,
            stamp: observation.stamp,
            pose,
            residual_px,
            alt_residual_px,
            reprojected_corners,
        })
    }

    /// RMS pixel distance between reprojected canonical corners and the raw
    /// observation. Infinite when a corner lands behind the camera, which
    /// invalidates that branch.
    fn reprojection_rms(
        &self,
        r: &Matrix3<f64>,
        t: &Vector3<f64>,
        model: &[Point3<f64>; 4],
        observed: &[Point2<f64>; 4],
    ) -> f64 {
        let mut sum = 0.0;
        for (p, obs) in model.iter().zip(observed.iter()) {
            let pc = Point3::from(r * p.coords + t);
            match self.camera.project(&pc) {
                Ok(px) => sum += (px - obs).norm_squared(),
                Err(_) => return f64::INFINITY,
            }
        }
        (sum / model.len() as f64).sqrt()
    }
}
