//! Core types for fiducial-marker localization.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete marker detector or image type: observations arrive
//! as corner pixel coordinates, and everything downstream works on poses.

mod camera;
mod logger;
mod observation;
mod quat;

pub use camera::{CameraModel, Distortion, ProjectionError};
pub use observation::{MarkerObservation, QuadGeometryError, Stamp};
pub use quat::average_quaternions;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;

/// Rigid transform from a child frame into a parent frame.
pub type Iso3 = nalgebra::Isometry3<f64>;
