//! Marker map registry and multi-marker pose fusion.
//!
//! The [`MarkerMap`] is a read-only registry of markers with known poses
//! relative to a common map origin, built once at startup from static
//! configuration. The [`PoseFuser`] turns the per-frame single-marker pose
//! estimates of mapped markers into one map<->camera pose with a 6x6
//! covariance.

mod fusion;
mod map;

pub use fusion::{FusedPose, FusionParams, PoseFuser};
pub use map::{MapConfigError, MarkerEntryConfig, MarkerMap, MarkerMapConfig, MarkerMapEntry};
