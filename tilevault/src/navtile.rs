//! Navigation height tiles.
//!
//! A navtile is a coarse square grid of f32 heights used by navigation
//! clients. Samples not backed by any surface carry the +∞ sentinel; where
//! several heights land on one sample the minimum wins.

use crate::binio::{read_f32, read_u16, take};
use crate::error::{Error, Result};

const MAGIC: &[u8; 2] = b"NT";
const VERSION: u16 = 1;

/// Grid edge length in samples.
pub const NAVTILE_SIZE: u32 = 256;

/// Sample value meaning "no height here".
pub const INVALID_HEIGHT: f32 = f32::INFINITY;

/// Height span of a navtile's valid samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightRange {
    pub min: f32,
    pub max: f32,
}

/// Square height grid payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NavTile {
    size: u32,
    data: Vec<f32>,
}

impl Default for NavTile {
    fn default() -> Self {
        Self::new()
    }
}

impl NavTile {
    /// Fully invalid navtile at the default size.
    pub fn new() -> Self {
        Self::with_size(NAVTILE_SIZE)
    }

    pub fn with_size(size: u32) -> Self {
        Self {
            size,
            data: vec![INVALID_HEIGHT; (size * size) as usize],
        }
    }

    /// Wrap an existing row-major grid; the length must be a square.
    pub fn from_data(data: Vec<f32>) -> Result<Self> {
        let size = (data.len() as f64).sqrt() as u32;
        if (size * size) as usize != data.len() {
            return Err(Error::InconsistentInput(format!(
                "navtile sample count {} is not square",
                data.len()
            )));
        }
        Ok(Self { size, data })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.size + x) as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, height: f32) {
        self.data[(y * self.size + x) as usize] = height;
    }

    /// Record a height sample, keeping the minimum on collision.
    #[inline]
    pub fn sample_min(&mut self, x: u32, y: u32, height: f32) {
        let cell = &mut self.data[(y * self.size + x) as usize];
        if height < *cell {
            *cell = height;
        }
    }

    /// Whether any sample holds a real height.
    pub fn has_data(&self) -> bool {
        self.data.iter().any(|h| h.is_finite())
    }

    /// Height span over valid samples.
    pub fn height_range(&self) -> Option<HeightRange> {
        let mut range: Option<HeightRange> = None;
        for &h in &self.data {
            if !h.is_finite() {
                continue;
            }
            let r = range.get_or_insert(HeightRange { min: h, max: h });
            r.min = r.min.min(h);
            r.max = r.max.max(h);
        }
        range
    }

    pub fn serialize(&self) -> Vec<u8> {
        let range = self.height_range().unwrap_or(HeightRange { min: 0.0, max: 0.0 });
        let mut out = Vec::with_capacity(12 + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.size as u16).to_le_bytes());
        out.extend_from_slice(&range.min.to_bits().to_le_bytes());
        out.extend_from_slice(&range.max.to_bits().to_le_bytes());
        for &h in &self.data {
            out.extend_from_slice(&h.to_bits().to_le_bytes());
        }
        out
    }

    pub fn deserialize(blob: &[u8], name: &str) -> Result<NavTile> {
        let fail = |detail: &str| Error::format(name, detail);

        let mut cursor = blob;
        if take(&mut cursor, 2).map_err(|_| fail("truncated header"))? != MAGIC {
            return Err(fail("bad magic"));
        }
        if read_u16(&mut cursor).map_err(|_| fail("truncated header"))? != VERSION {
            return Err(fail("unsupported version"));
        }
        let size = u32::from(read_u16(&mut cursor).map_err(|_| fail("truncated header"))?);
        if size == 0 || size > 4096 {
            return Err(fail("navtile size out of range"));
        }
        // stored range is advisory; recomputed on demand
        read_f32(&mut cursor).map_err(|_| fail("truncated range"))?;
        read_f32(&mut cursor).map_err(|_| fail("truncated range"))?;

        let count = (size * size) as usize;
        let mut data = Vec::with_capacity(count);
        for _ in 0..count {
            data.push(read_f32(&mut cursor).map_err(|_| fail("truncated samples"))?);
        }
        Ok(NavTile { size, data })
    }
}
