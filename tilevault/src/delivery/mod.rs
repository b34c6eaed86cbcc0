//! Read-only delivery façade.
//!
//! Serves a flushed tile set and synthesises derived 2D streams on demand:
//! mask and meta PNGs rendered from stored coverage and the tile index,
//! credit records unioned out of metatiles, and the config with
//! driver-internal options stripped. Nothing synthesised here is persisted.


use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::Path;
use std::time::SystemTime;

use image::{GrayImage, RgbaImage};
use serde_json::Value;

use crate::driver::{open_from_config, Driver, Mode, StoreFile, TileFile};
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::meta::MetaTile;
use crate::refframe::{Credit, ReferenceFrame, Registry};
use crate::tileid::TileId;
use crate::tileindex::{flags, TileIndex};
use crate::tileset::TileSetProperties;

/// Grid order of synthesised 2D tiles: 256×256 cells under one id.
pub const BINARY_ORDER_2D: u8 = 8;

/// Rendering flavor of synthesised streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Normal,
    /// Absent data renders as a transparent placeholder instead of failing
    Debug,
}

/// Read-only view over a flushed tile set.
pub struct Delivery {
    driver: Box<dyn Driver>,
    properties: TileSetProperties,
    reference_frame: ReferenceFrame,
    index: TileIndex,
    registry: Registry,
}

impl Delivery {
    /// Open the tile set at `path` for delivery.
    pub fn open(path: &Path, registry: &Registry) -> Result<Delivery> {
        let config_path = path.join(StoreFile::Config.filename());
        let bytes = std::fs::read(&config_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NoSuchFile(config_path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        let properties =
            crate::tileset::parse_config(&bytes, &config_path.display().to_string())?;
        let reference_frame = registry
            .reference_frame(&properties.reference_frame)?
            .clone();

        let driver = open_from_config(path, &properties.driver_options, Mode::ReadOnly)?;
        let stream = driver.input_file(StoreFile::TileIndex)?;
        let index = TileIndex::deserialize(stream.bytes(), stream.name())?;

        Ok(Delivery {
            driver,
            properties,
            reference_frame,
            index,
            registry: registry.clone(),
        })
    }

    pub fn properties(&self) -> &TileSetProperties {
        &self.properties
    }

    /// Most recent modification across the underlying store.
    pub fn last_modified(&self) -> SystemTime {
        self.driver.last_modified()
    }

    /// Whether `id` addresses a synthesised 2D tile (aligned to the 2D grid).
    pub fn is_2d_id(id: TileId) -> bool {
        let mask = (1u32 << BINARY_ORDER_2D) - 1;
        id.x & mask == 0 && id.y & mask == 0
    }

    /// PNG of a 256×256 presence mask for the subtree under `id`.
    ///
    /// Pixel `(i, j)` is lit when the tile `BINARY_ORDER_2D` levels below
    /// `id` at that offset (or its deepest stored ancestor) carries content.
    pub fn meta2d(&self, id: TileId) -> Result<Vec<u8>> {
        if !Self::is_2d_id(id) {
            return Err(Error::NoSuchFile(format!(
                "{} is not a valid 2d metatile id",
                id
            )));
        }
        let edge = 1u32 << BINARY_ORDER_2D;
        let deep_lod = id.lod.saturating_add(BINARY_ORDER_2D);
        // sample at the deepest stored lod within the subtree depth
        let sample_lod = self
            .index
            .lod_range()
            .max()
            .unwrap_or(deep_lod)
            .clamp(id.lod, deep_lod);
        let shift = BINARY_ORDER_2D - (sample_lod - id.lod);

        let mut img = GrayImage::new(edge, edge);
        for j in 0..edge {
            for i in 0..edge {
                let tile = TileId::new(
                    sample_lod,
                    (id.x << (sample_lod - id.lod)) + (i >> shift),
                    (id.y << (sample_lod - id.lod)) + (j >> shift),
                );
                if self.index.get(tile) & flags::CONTENT != 0 {
                    // rows are top-down in the image, bottom-up in tile space
                    img.put_pixel(i, edge - 1 - j, image::Luma([255]));
                }
            }
        }
        encode_png(img.into())
    }

    /// PNG of the stored mesh coverage mask.
    ///
    /// In [`Flavor::Debug`] a missing mesh yields a transparent placeholder
    /// instead of `NoSuchFile`.
    pub fn mask(&self, id: TileId, flavor: Flavor) -> Result<Vec<u8>> {
        let stream = match flavor {
            Flavor::Normal => Some(self.driver.input(id, TileFile::Mesh)?),
            Flavor::Debug => self.driver.input_opt(id, TileFile::Mesh)?,
        };
        let Some(stream) = stream else {
            // debug flavor, no data
            let size = crate::mesh::COVERAGE_SIZE;
            return encode_png(RgbaImage::new(size, size).into());
        };
        let mesh = Mesh::deserialize(stream.bytes(), stream.name())?;

        let size = mesh.coverage.size();
        let mut img = GrayImage::new(size, size);
        for y in 0..size {
            for x in 0..size {
                if mesh.coverage.get(x, y) {
                    img.put_pixel(x, size - 1 - y, image::Luma([255]));
                }
            }
        }
        encode_png(img.into())
    }

    /// Credit records for the credit tile containing `id`, serialised as a
    /// JSON array.
    ///
    /// Sets with at most one credit answer from the properties; otherwise
    /// the credits are unioned from every metatile overlapping the credit
    /// region, stopping early once all known credits have been seen.
    pub fn credits(&self, id: TileId) -> Result<Vec<u8>> {
        if !Self::is_2d_id(id) {
            return Err(Error::NoSuchFile(format!(
                "{} is not a valid credit tile id",
                id
            )));
        }

        let ids: BTreeSet<u16> = if self.properties.credits.len() <= 1 {
            self.properties.credits.clone()
        } else {
            self.credits_from_metatiles(id)?
        };

        let records: Vec<&Credit> = ids
            .iter()
            .filter_map(|cid| self.registry.credit(*cid))
            .collect();
        serde_json::to_vec_pretty(&records).map_err(|e| Error::Internal(e.to_string()))
    }

    fn credits_from_metatiles(&self, credit_id: TileId) -> Result<BTreeSet<u16>> {
        let meta_order = self.reference_frame.meta_binary_order;
        if meta_order > BINARY_ORDER_2D {
            return Err(Error::Internal(
                "credit tiles cannot be assembled from larger metatiles".to_string(),
            ));
        }
        let want = self.properties.credits.len();
        let mut seen = BTreeSet::new();

        let count = 1u32 << (BINARY_ORDER_2D - meta_order);
        let skip = 1u32 << meta_order;
        'rows: for j in 0..count {
            let row = credit_id.y + j * skip;
            for i in 0..count {
                let meta_id = TileId::new(credit_id.lod, credit_id.x + i * skip, row);
                if self.index.get(meta_id) & flags::META == 0 {
                    continue;
                }
                let stream = self.driver.input(meta_id, TileFile::Meta)?;
                let tile = MetaTile::deserialize(stream.bytes(), stream.name())?;
                seen.extend(tile.credits());
                if seen.len() >= want {
                    break 'rows;
                }
            }
        }
        Ok(seen)
    }

    /// Config document with driver-internal options stripped.
    pub fn config(&self) -> Result<Vec<u8>> {
        let mut properties = self.properties.clone();
        properties.driver_options = Value::Null;
        crate::tileset::config_bytes(&properties)
    }

    /// Raw access for payload types that need no synthesis.
    pub fn input(&self, id: TileId, file: TileFile) -> Result<crate::driver::IStream> {
        self.driver.input(id, file)
    }
}

fn encode_png(img: image::DynamicImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(out.into_inner())
}
