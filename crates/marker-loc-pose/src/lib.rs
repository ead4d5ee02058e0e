//! Pose recovery for a single square marker.
//!
//! Given the four observed corner pixels of a marker of known physical side
//! length and a calibrated [`CameraModel`](marker_loc_core::CameraModel), the
//! estimator recovers the rigid transform placing the marker in the camera's
//! optical frame. Planar four-point pose is a two-valued inverse problem for
//! shallow viewing angles; both solution branches are refined and the one
//! with the lower pixel reprojection error wins, with the losing branch's
//! residual exposed so downstream fusion can down-weight uncertain picks.

mod estimator;
mod homography;
mod refine;

pub use estimator::{
    canonical_corners, EstimateError, EstimatorParams, MarkerPoseEstimator, PoseEstimate,
};
pub use homography::homography_from_corners;
