//! A time-varying forest of named coordinate frames.
//!
//! Frames are linked by either *static* edges (authored once, valid at any
//! query time) or *dynamic* edges (stamped samples kept in a bounded
//! per-edge history). A single writer inserts transforms while any number of
//! reader threads compose lookups between frames; a reader asking for data
//! that has not arrived yet can block, bounded by a timeout, until the next
//! relevant insertion.

mod graph;
mod history;

pub use graph::{FrameGraph, GraphConfig, GraphError};
