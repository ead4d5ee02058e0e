//! Static registry of mapped markers, built once from configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nalgebra::{Quaternion, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use marker_loc_core::Iso3;

/// Errors raised while building a [`MarkerMap`]. All of these are fatal at
/// startup; a running pipeline never sees them.
#[derive(thiserror::Error, Debug)]
pub enum MapConfigError {
    #[error("duplicate marker id {0} in map config")]
    DuplicateId(u32),
    #[error("marker {id} has non-positive side length {length}")]
    NonPositiveLength { id: u32, length: f64 },
    #[error("marker {id} has a near-zero orientation quaternion")]
    InvalidOrientation { id: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One marker of the map: id, physical side length, and its pose relative
/// to the map origin frame (marker frame -> map frame).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkerMapEntry {
    pub id: u32,
    pub length: f64,
    pub pose: Iso3,
}

fn identity_orientation() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

/// Serialized form of one map entry.
///
/// Orientation is an `[x, y, z, w]` quaternion and defaults to identity,
/// which covers the common flat-floor layout where only positions vary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkerEntryConfig {
    pub id: u32,
    pub length: f64,
    #[serde(default)]
    pub position: [f64; 3],
    #[serde(default = "identity_orientation")]
    pub orientation: [f64; 4],
}

impl MarkerEntryConfig {
    fn build(&self) -> Result<MarkerMapEntry, MapConfigError> {
        let [x, y, z, w] = self.orientation;
        let q = Quaternion::new(w, x, y, z);
        if q.norm() < 1e-9 {
            return Err(MapConfigError::InvalidOrientation { id: self.id });
        }
        Ok(MarkerMapEntry {
            id: self.id,
            length: self.length,
            pose: Iso3::from_parts(
                Translation3::new(self.position[0], self.position[1], self.position[2]),
                UnitQuaternion::from_quaternion(q),
            ),
        })
    }
}

/// JSON description of the full marker layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkerMapConfig {
    pub markers: Vec<MarkerEntryConfig>,
}

impl MarkerMapConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, MapConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), MapConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Validate the entries and build the immutable map.
    pub fn build(&self) -> Result<MarkerMap, MapConfigError> {
        let entries = self
            .markers
            .iter()
            .map(MarkerEntryConfig::build)
            .collect::<Result<Vec<_>, _>>()?;
        MarkerMap::from_entries(entries)
    }
}

/// Read-only registry of mapped markers, keyed by id.
///
/// Built once at startup; lookups afterwards require no locking.
#[derive(Clone, Debug, Default)]
pub struct MarkerMap {
    entries: BTreeMap<u32, MarkerMapEntry>,
}

impl MarkerMap {
    /// Build a map from entries, rejecting duplicate ids and non-positive
    /// side lengths.
    pub fn from_entries(
        entries: impl IntoIterator<Item = MarkerMapEntry>,
    ) -> Result<Self, MapConfigError> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if entry.length <= 0.0 {
                return Err(MapConfigError::NonPositiveLength {
                    id: entry.id,
                    length: entry.length,
                });
            }
            let id = entry.id;
            if map.insert(id, entry).is_some() {
                return Err(MapConfigError::DuplicateId(id));
            }
        }
        Ok(Self { entries: map })
    }

    /// Load and validate a map from a JSON config file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, MapConfigError> {
        MarkerMapConfig::load_json(path)?.build()
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&MarkerMapEntry> {
        self.entries.get(&id)
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &MarkerMapEntry> {
        self.entries.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn entry(id: u32, length: f64, x: f64, y: f64) -> MarkerMapEntry {
        MarkerMapEntry {
            id,
            length,
            pose: Iso3::from_parts(
                Translation3::new(x, y, 0.0),
                UnitQuaternion::identity(),
            ),
        }
    }

    #[test]
    fn builds_and_looks_up_entries() {
        let map = MarkerMap::from_entries([
            entry(1, 0.33, 0.0, 0.0),
            entry(4, 0.33, 1.0, 1.0),
            entry(12, 0.33, 0.2, 0.5),
        ])
        .expect("map");

        assert_eq!(map.len(), 3);
        let m4 = map.get(4).expect("entry 4");
        assert_abs_diff_eq!(m4.pose.translation.x, 1.0, epsilon = 1e-15);
        assert!(map.get(99).is_none());

        let ids: Vec<u32> = map.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 4, 12]);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let err = MarkerMap::from_entries([entry(3, 0.33, 0.0, 0.0), entry(3, 0.1, 1.0, 0.0)])
            .unwrap_err();
        assert!(matches!(err, MapConfigError::DuplicateId(3)));
    }

    #[test]
    fn non_positive_length_is_rejected() {
        let err = MarkerMap::from_entries([entry(5, 0.0, 0.0, 0.0)]).unwrap_err();
        assert!(matches!(
            err,
            MapConfigError::NonPositiveLength { id: 5, .. }
        ));
    }

    #[test]
    fn config_json_round_trip() {
        let cfg = MarkerMapConfig {
            markers: vec![
                MarkerEntryConfig {
                    id: 1,
                    length: 0.33,
                    position: [0.0, 0.0, 0.0],
                    orientation: identity_orientation(),
                },
                MarkerEntryConfig {
                    id: 12,
                    length: 0.33,
                    position: [0.2, 0.5, 0.0],
                    orientation: identity_orientation(),
                },
            ],
        };

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("map.json");
        cfg.write_json(&path).expect("write");

        let map = MarkerMap::load_json(&path).expect("load");
        assert_eq!(map.len(), 2);
        let m12 = map.get(12).expect("entry 12");
        assert_abs_diff_eq!(m12.pose.translation.x, 0.2, epsilon = 1e-15);
        assert_abs_diff_eq!(m12.pose.translation.y, 0.5, epsilon = 1e-15);
    }

    #[test]
    fn missing_orientation_defaults_to_identity() {
        let raw = r#"{ "markers": [ { "id": 7, "length": 0.25, "position": [1.0, 2.0, 0.0] } ] }"#;
        let cfg: MarkerMapConfig = serde_json::from_str(raw).expect("parse");
        let map = cfg.build().expect("build");
        let m = map.get(7).expect("entry");
        assert!(m.pose.rotation.angle() < 1e-12);
    }

    #[test]
    fn zero_orientation_quaternion_is_rejected() {
        let cfg = MarkerMapConfig {
            markers: vec![MarkerEntryConfig {
                id: 2,
                length: 0.1,
                position: [0.0; 3],
                orientation: [0.0; 4],
            }],
        };
        let err = cfg.build().unwrap_err();
        assert!(matches!(err, MapConfigError::InvalidOrientation { id: 2 }));
    }
}
