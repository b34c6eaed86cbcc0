//! Read-only lookup of reference frames, credits and bound layers.
//!
//! The registry is an explicit value threaded through tile-set constructors
//! and captured at open time; nothing in the library reads process globals.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::node::ReferenceFrame;

/// Attribution record referenced from metanodes and tile-set properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credit {
    /// Numeric id stored in metanode credit sets
    pub id: u16,
    /// Attribution notice shown to viewers
    pub notice: String,
}

/// External texture layer a submesh may bind to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundLayer {
    /// Numeric id stored in submesh texture-layer references
    pub id: u16,
    /// Location template of the layer's tiles
    pub url: String,
}

/// In-memory lookup service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    frames: HashMap<String, ReferenceFrame>,
    credits: BTreeMap<u16, Credit>,
    bound_layers: BTreeMap<u16, BoundLayer>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding a single reference frame.
    pub fn with_frame(frame: ReferenceFrame) -> Self {
        let mut registry = Self::new();
        registry.add_frame(frame);
        registry
    }

    pub fn add_frame(&mut self, frame: ReferenceFrame) {
        self.frames.insert(frame.id.clone(), frame);
    }

    pub fn add_credit(&mut self, credit: Credit) {
        self.credits.insert(credit.id, credit);
    }

    pub fn add_bound_layer(&mut self, layer: BoundLayer) {
        self.bound_layers.insert(layer.id, layer);
    }

    /// Reference frame by id; unknown frames are an input error.
    pub fn reference_frame(&self, id: &str) -> Result<&ReferenceFrame> {
        self.frames
            .get(id)
            .ok_or_else(|| Error::InconsistentInput(format!("unknown reference frame: {}", id)))
    }

    pub fn credit(&self, id: u16) -> Option<&Credit> {
        self.credits.get(&id)
    }

    pub fn bound_layer(&self, id: u16) -> Option<&BoundLayer> {
        self.bound_layers.get(&id)
    }

    pub fn credits(&self) -> impl Iterator<Item = &Credit> {
        self.credits.values()
    }
}
