//! High-level facade crate for the `marker-loc-*` workspace.
//!
//! This crate provides:
//! - stable, convenient re-exports of the underlying crates
//! - the [`LocalizationPipeline`] wiring detector observations through
//!   single-marker pose estimation, map fusion, and the frame graph.
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::sync::Arc;
//! use marker_loc::{
//!     CameraModel, FrameGraph, LocalizationPipeline, MarkerMap, PipelineParams,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let camera = CameraModel {
//!     fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0,
//!     width: 640, height: 480,
//!     distortion: Default::default(),
//! };
//! let map = MarkerMap::load_json("map.json")?;
//! let graph = Arc::new(FrameGraph::default());
//!
//! let pipeline = LocalizationPipeline::new(camera, map, PipelineParams::default(), graph)?;
//! // per frame: pipeline.process_frame(&observations)?
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `marker_loc::core`: camera model, observations, timestamps, quaternion math.
//! - `marker_loc::pose`: single square-marker pose recovery.
//! - `marker_loc::map`: marker map registry and pose fusion.
//! - `marker_loc::graph`: named-frame transform graph with blocking lookups.

pub use frame_graph as graph;
pub use marker_loc_core as core;
pub use marker_loc_map as map;
pub use marker_loc_pose as pose;

pub use frame_graph::{FrameGraph, GraphConfig, GraphError};
pub use marker_loc_core::{CameraModel, Distortion, Iso3, MarkerObservation, Stamp};
pub use marker_loc_map::{FusedPose, FusionParams, MarkerMap, MarkerMapEntry, PoseFuser};
pub use marker_loc_pose::{EstimatorParams, MarkerPoseEstimator, PoseEstimate};

mod pipeline;
pub use pipeline::{
    CornerPolicy, DetectedMarker, FrameNaming, FrameResult, LocalizationPipeline, PipelineParams,
};
