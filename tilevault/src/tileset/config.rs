//! Tile-set properties document.
//!
//! A JSON key-value map stored as the store's `config.json`. Driver
//! parameters ride along under `driverOptions` and are opaque to everything
//! but the driver that wrote them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::tileid::{Lod, LodRange};

/// Camera semantics of a stored position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PositionType {
    #[default]
    Objective,
    Subjective,
}

/// How the position's height component is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum HeightMode {
    #[default]
    Fixed,
    Floating,
}

/// Default viewing position of a tile set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(rename = "type")]
    pub position_type: PositionType,
    pub height_mode: HeightMode,
    pub position: [f64; 3],
    pub orientation: [f64; 3],
    pub vertical_extent: f64,
    pub vertical_fov: f64,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            position_type: PositionType::Objective,
            height_mode: HeightMode::Fixed,
            position: [0.0; 3],
            orientation: [0.0, -90.0, 0.0],
            vertical_extent: 0.0,
            vertical_fov: 45.0,
        }
    }
}

/// Tile-set properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileSetProperties {
    /// Tile-set identifier
    pub id: String,
    /// Reference frame the set lives in
    pub reference_frame: String,
    /// LOD span covered by tiles; maintained at flush
    #[serde(with = "lod_range_format", default)]
    pub lod_range: LodRange,
    #[serde(default)]
    pub position: Position,
    /// Credits attributed to the whole set
    #[serde(default)]
    pub credits: BTreeSet<u16>,
    /// Bound layers the set's meshes reference
    #[serde(default)]
    pub bound_layers: BTreeSet<u16>,
    /// Opaque per-driver parameters
    #[serde(default)]
    pub driver_options: Value,
}

impl TileSetProperties {
    pub fn new(id: impl Into<String>, reference_frame: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reference_frame: reference_frame.into(),
            lod_range: LodRange::Empty,
            position: Position::default(),
            credits: BTreeSet::new(),
            bound_layers: BTreeSet::new(),
            driver_options: Value::Null,
        }
    }
}

/// `lodRange` as `[min, max]` or `null`.
mod lod_range_format {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        range: &LodRange,
        ser: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match range {
            LodRange::Empty => ser.serialize_none(),
            LodRange::Range { min, max } => ser.collect_seq([min, max]),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> std::result::Result<LodRange, D::Error> {
        let raw: Option<(Lod, Lod)> = Option::deserialize(de)?;
        Ok(match raw {
            None => LodRange::Empty,
            Some((min, max)) => LodRange::of(min, max),
        })
    }
}

/// Parse a config document.
pub fn parse_config(bytes: &[u8], name: &str) -> Result<TileSetProperties> {
    serde_json::from_slice(bytes).map_err(|e| Error::format(name, e.to_string()))
}

/// Serialize a config document.
pub fn config_bytes(properties: &TileSetProperties) -> Result<Vec<u8>> {
    let mut out =
        serde_json::to_vec_pretty(properties).map_err(|e| Error::Internal(e.to_string()))?;
    out.push(b'\n');
    Ok(out)
}
