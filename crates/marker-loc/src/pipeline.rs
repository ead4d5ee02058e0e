//! Per-frame ingestion: observations -> estimates -> fusion -> frame graph.

use std::sync::Arc;

use log::{debug, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use frame_graph::{FrameGraph, GraphError};
use marker_loc_core::{CameraModel, Iso3, MarkerObservation};
use marker_loc_map::{FusedPose, FusionParams, MarkerMap, PoseFuser};
use marker_loc_pose::{EstimatorParams, MarkerPoseEstimator, PoseEstimate};

/// Naming scheme for the frames the pipeline maintains.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameNaming {
    /// Name of the map origin frame.
    pub map_frame: String,
    /// Prefix of per-detection marker frames, completed with the marker id.
    pub marker_prefix: String,
    /// Prefix of the static map-authored marker frames.
    pub map_marker_prefix: String,
}

impl Default for FrameNaming {
    fn default() -> Self {
        Self {
            map_frame: "map".into(),
            marker_prefix: "marker_".into(),
            map_marker_prefix: "map_marker_".into(),
        }
    }
}

impl FrameNaming {
    pub fn marker_frame(&self, id: u32) -> String {
        format!("{}{}", self.marker_prefix, id)
    }

    pub fn map_marker_frame(&self, id: u32) -> String {
        format!("{}{}", self.map_marker_prefix, id)
    }
}

/// Which corner pixels to report per detected marker.
///
/// Whether consumers should see the detector's raw pixels or the corners
/// re-projected through the estimated pose is a policy question, so it is
/// configuration rather than hard-wired behavior. Reprojection is the
/// default: it smooths single-pixel detector jitter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CornerPolicy {
    #[default]
    Reprojected,
    DetectorRaw,
}

/// Pipeline configuration.
#[derive(Clone, Debug, Default)]
pub struct PipelineParams {
    pub estimator: EstimatorParams,
    pub fusion: FusionParams,
    pub naming: FrameNaming,
    pub corner_policy: CornerPolicy,
    /// Side length assumed for visible markers that are not in the map.
    /// `None` skips unmapped markers entirely.
    pub default_marker_length: Option<f64>,
}

/// Per-marker output record of one processed frame.
#[derive(Clone, Debug)]
pub struct DetectedMarker {
    pub id: u32,
    pub length: f64,
    /// Marker frame -> camera optical frame.
    pub pose: Iso3,
    /// Corner pixels selected by the configured [`CornerPolicy`].
    pub corners: [Point2<f64>; 4],
}

/// Everything one frame produced.
#[derive(Clone, Debug, Default)]
pub struct FrameResult {
    pub markers: Vec<DetectedMarker>,
    /// Present when at least one mapped marker was visible.
    pub fused: Option<FusedPose>,
}

/// Sequential per-frame processing pipeline.
///
/// One instance is the single writer of its [`FrameGraph`]; readers query
/// the shared graph concurrently. Frames are processed one at a time and a
/// frame's graph insertions are complete when [`process_frame`] returns.
///
/// [`process_frame`]: LocalizationPipeline::process_frame
pub struct LocalizationPipeline {
    estimator: MarkerPoseEstimator,
    map: MarkerMap,
    fuser: PoseFuser,
    naming: FrameNaming,
    corner_policy: CornerPolicy,
    default_marker_length: Option<f64>,
    graph: Arc<FrameGraph>,
}

impl LocalizationPipeline {
    /// Build the pipeline and author the static map edges of the graph.
    pub fn new(
        camera: CameraModel,
        map: MarkerMap,
        params: PipelineParams,
        graph: Arc<FrameGraph>,
    ) -> Result<Self, GraphError> {
        for entry in map.iter() {
            graph.insert_static(
                &params.naming.map_frame,
                &params.naming.map_marker_frame(entry.id),
                entry.pose,
            )?;
        }
        debug!("authored {} static map marker frame(s)", map.len());

        Ok(Self {
            estimator: MarkerPoseEstimator::new(camera, params.estimator),
            map,
            fuser: PoseFuser::new(params.fusion),
            naming: params.naming,
            corner_policy: params.corner_policy,
            default_marker_length: params.default_marker_length,
            graph,
        })
    }

    #[inline]
    pub fn graph(&self) -> &Arc<FrameGraph> {
        &self.graph
    }

    #[inline]
    pub fn map(&self) -> &MarkerMap {
        &self.map
    }

    /// Process one camera frame's detections.
    ///
    /// Degenerate observations are dropped with a warning and never abort
    /// the frame. The only propagated error is [`GraphError::CycleDetected`],
    /// which indicates a frame-naming misconfiguration and must never occur
    /// in correct operation.
    pub fn process_frame(
        &self,
        observations: &[MarkerObservation],
    ) -> Result<FrameResult, GraphError> {
        let Some(camera_frame) = observations.first().map(|o| o.frame_id.clone()) else {
            return Ok(FrameResult::default());
        };

        let mut markers = Vec::with_capacity(observations.len());
        let mut estimates: Vec<PoseEstimate> = Vec::with_capacity(observations.len());

        for obs in observations {
            let Some(length) = self
                .map
                .get(obs.id)
                .map(|e| e.length)
                .or(self.default_marker_length)
            else {
                debug!("marker {} not in map and no default length, skipping", obs.id);
                continue;
            };

            let est = match self.estimator.estimate(obs, length) {
                Ok(est) => est,
                Err(err) => {
                    warn!("dropping marker {} this frame: {err}", obs.id);
                    continue;
                }
            };

            self.graph.insert(
                &camera_frame,
                &self.naming.marker_frame(obs.id),
                est.pose,
                est.stamp,
            )?;

            let corners = match self.corner_policy {
                CornerPolicy::Reprojected => est.reprojected_corners,
                CornerPolicy::DetectorRaw => obs.corners,
            };
            markers.push(DetectedMarker {
                id: obs.id,
                length,
                pose: est.pose,
                corners,
            });
            estimates.push(est);
        }

        let fused = self
            .fuser
            .fuse(&estimates, &self.map, &camera_frame, &self.naming.map_frame);
        if let Some(f) = &fused {
            self.graph
                .insert(&f.parent_frame, &f.child_frame, f.pose, f.stamp)?;
        }

        Ok(FrameResult { markers, fused })
    }
}
