//! Confidence-weighted fusion of per-marker pose estimates.

use log::debug;
use nalgebra::{Matrix6, Translation3, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use marker_loc_core::{average_quaternions, Iso3, Stamp};
use marker_loc_pose::PoseEstimate;

use crate::map::MarkerMap;

/// Fused map<->camera pose for one camera frame.
///
/// `pose` places the map origin in the camera optical frame (map frame ->
/// camera frame). Covariance rows/columns are ordered as three translation
/// then three rotation degrees of freedom. Superseded by the next frame's
/// fusion; never cached across frames.
#[derive(Clone, Debug)]
pub struct FusedPose {
    pub pose: Iso3,
    pub covariance: Matrix6<f64>,
    pub stamp: Stamp,
    /// The camera optical frame the pose is expressed in.
    pub parent_frame: String,
    /// The map origin frame.
    pub child_frame: String,
}

/// Tuning knobs for pose fusion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FusionParams {
    /// Added to the squared residual in the weight denominator. Keeps a
    /// near-perfect residual from dominating the average and guards the
    /// division for exact-zero residuals.
    pub weight_epsilon: f64,
    /// Covariance reported when exactly one mapped marker is visible: a
    /// single estimate carries no internal spread measure.
    pub single_marker_covariance: Matrix6<f64>,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            weight_epsilon: 1e-4,
            single_marker_covariance: Matrix6::from_diagonal(&Vector6::new(
                1e-2, 1e-2, 1e-2, 1e-2, 1e-2, 1e-2,
            )),
        }
    }
}

/// Combines single-marker estimates of mapped markers into one map<->camera
/// pose with covariance.
pub struct PoseFuser {
    params: FusionParams,
}

impl PoseFuser {
    pub fn new(params: FusionParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &FusionParams {
        &self.params
    }

    /// Fuse the current frame's estimates.
    ///
    /// Estimates whose id is not in the map contribute nothing. Returns
    /// `None` when no mapped marker is visible, the expected "nothing to
    /// fuse this frame" outcome, not an error.
    pub fn fuse(
        &self,
        estimates: &[PoseEstimate],
        map: &MarkerMap,
        camera_frame: &str,
        map_frame: &str,
    ) -> Option<FusedPose> {
        let mut candidates: Vec<(Iso3, f64)> = Vec::with_capacity(estimates.len());
        let mut stamp = Stamp::LATEST;
        for est in estimates {
            let Some(entry) = map.get(est.id) else {
                continue;
            };
            // (map -> camera) = (marker -> camera) * (map -> marker).
            let candidate = est.pose * entry.pose.inverse();
            let weight = 1.0 / (est.residual_px * est.residual_px + self.params.weight_epsilon);
            candidates.push((candidate, weight));
            stamp = stamp.max(est.stamp);
        }

        if candidates.is_empty() {
            debug!("no mapped markers visible, skipping fusion");
            return None;
        }

        let weight_sum: f64 = candidates.iter().map(|(_, w)| w).sum();
        let translation: Vector3<f64> = candidates
            .iter()
            .map(|(c, w)| c.translation.vector * *w)
            .sum::<Vector3<f64>>()
            / weight_sum;

        let rotations: Vec<(UnitQuaternion<f64>, f64)> =
            candidates.iter().map(|(c, w)| (c.rotation, *w)).collect();
        let rotation = average_quaternions(&rotations)?;

        let covariance = if candidates.len() == 1 {
            self.params.single_marker_covariance
        } else {
            self.sample_covariance(&candidates, weight_sum, &translation, &rotation)
        };

        debug!(
            "fused {} marker(s) into {} -> {}",
            candidates.len(),
            camera_frame,
            map_frame
        );

        Some(FusedPose {
            pose: Iso3::from_parts(Translation3::from(translation), rotation),
            covariance,
            stamp,
            parent_frame: camera_frame.to_owned(),
            child_frame: map_frame.to_owned(),
        })
    }

    /// Weighted sample covariance of the candidates about the fused mean,
    /// in the local tangent space (translation residuals plus the rotation
    /// vector of `q_mean^T q_i`), scaled by the unbiased effective-sample
    /// factor.
    fn sample_covariance(
        &self,
        candidates: &[(Iso3, f64)],
        weight_sum: f64,
        translation: &Vector3<f64>,
        rotation: &UnitQuaternion<f64>,
    ) -> Matrix6<f64> {
        let rotation_inv = rotation.inverse();
        let mut acc = Matrix6::<f64>::zeros();
        let mut norm_sq_sum = 0.0;
        for (candidate, weight) in candidates {
            let wn = weight / weight_sum;
            norm_sq_sum += wn * wn;
            let dt = candidate.translation.vector - translation;
            let dr = (rotation_inv * candidate.rotation).scaled_axis();
            let residual = Vector6::new(dt.x, dt.y, dt.z, dr.x, dr.y, dr.z);
            acc += wn * residual * residual.transpose();
        }

        let n_eff = 1.0 / norm_sq_sum;
        if n_eff > 1.0 + 1e-9 {
            acc * (n_eff / (n_eff - 1.0))
        } else {
            // One candidate dominates completely; the measured spread
            // carries no information.
            self.params.single_marker_covariance
        }
    }
}
