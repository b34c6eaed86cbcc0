//! Texture atlases.
//!
//! An atlas is the ordered list of raster images belonging to a tile's
//! submeshes; image `i` textures submesh `i`. Images are carried as encoded
//! bytes (PNG or JPEG) and never re-encoded by the storage engine.

use std::io::Cursor;

use image::ImageReader;

use crate::binio::{self, read_u16, take, write_varint};
use crate::error::{Error, Result};

const MAGIC: &[u8; 2] = b"AT";
const VERSION: u16 = 1;

/// Ordered per-submesh texture images.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Atlas {
    images: Vec<Vec<u8>>,
}

impl Atlas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an encoded image; it textures the submesh at the index it
    /// lands on.
    pub fn push(&mut self, encoded: Vec<u8>) {
        self.images.push(encoded);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Encoded bytes of image `index`.
    pub fn image(&self, index: usize) -> Option<&[u8]> {
        self.images.get(index).map(Vec::as_slice)
    }

    pub fn images(&self) -> impl Iterator<Item = &[u8]> {
        self.images.iter().map(Vec::as_slice)
    }

    /// Pixel dimensions of image `index`, decoded from the header only.
    pub fn image_size(&self, index: usize) -> Result<(u32, u32)> {
        let bytes = self
            .images
            .get(index)
            .ok_or_else(|| Error::NoSuchFile(format!("atlas image {}", index)))?;
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(Error::Io)?
            .into_dimensions()
            .map_err(|e| Error::format(format!("atlas image {}", index), e.to_string()))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        write_varint(&mut out, self.images.len() as u64);
        for img in &self.images {
            write_varint(&mut out, img.len() as u64);
            out.extend_from_slice(img);
        }
        out
    }

    pub fn deserialize(blob: &[u8], name: &str) -> Result<Atlas> {
        let fail = |detail: &str| Error::format(name, detail);

        let mut cursor = blob;
        if take(&mut cursor, 2).map_err(|_| fail("truncated header"))? != MAGIC {
            return Err(fail("bad magic"));
        }
        if read_u16(&mut cursor).map_err(|_| fail("truncated header"))? != VERSION {
            return Err(fail("unsupported version"));
        }
        let count = binio::read_varint(&mut cursor).map_err(|_| fail("truncated count"))? as usize;
        let mut images = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let len =
                binio::read_varint(&mut cursor).map_err(|_| fail("truncated image size"))? as usize;
            let bytes = take(&mut cursor, len).map_err(|_| fail("truncated image"))?;
            images.push(bytes.to_vec());
        }
        Ok(Atlas { images })
    }
}
