//! Tilar on-disk layout.
//!
//! This module is the normative byte layout; everything is little-endian
//! and checksummed with CRC-32 (IEEE).
//!
//! ```text
//! 0        [magic "TILAR\0" | version u8 | uuid 16B | binaryOrder u8
//!           | filesPerTile u8 | crc32 of bytes 0..25]              29 B
//! 29       [trailer slot: magic "TLRT" | indexOffset u64
//!           | indexLen u64 | indexCrc32]                           24 B
//! 53       data region, append-only:
//!            per put: [journal record | blob bytes]
//!            per flush: [index block]
//! ```
//!
//! A journal record precedes its blob and is self-validating during forward
//! replay: the recorded offset must equal the record position plus the
//! record size, and the blob must match its CRC.
//!
//! ```text
//! journal record (24 B): tag 0xA5 | x u8 | y u8 | kind u8
//!                        | offset u64 | length u64 | crc32
//! index block:           magic "TIDX" | count u32
//!                        | count x { x u8 | y u8 | kind u8
//!                                    | offset u64 | length u64 | crc32 }
//! ```
//!
//! The trailer slot is the only region ever rewritten; flush publishes a
//! fresh index block by overwriting these 24 bytes after the block is
//! synced.

use uuid::Uuid;

use crate::binio::{read_u32, read_u64, read_u8, take};
use crate::error::{Error, Result};

pub const HEADER_MAGIC: &[u8; 6] = b"TILAR\0";
pub const VERSION: u8 = 1;

pub const HEADER_LEN: u64 = 29;
pub const TRAILER_OFFSET: u64 = HEADER_LEN;
pub const TRAILER_LEN: u64 = 24;
pub const DATA_START: u64 = HEADER_LEN + TRAILER_LEN;

pub const TRAILER_MAGIC: &[u8; 4] = b"TLRT";
pub const INDEX_MAGIC: &[u8; 4] = b"TIDX";

pub const RECORD_TAG: u8 = 0xa5;
pub const RECORD_LEN: u64 = 24;
const ENTRY_LEN: usize = 23;

/// Archive creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Each archive holds a `2^binary_order` square grid of tiles
    pub binary_order: u8,
    /// Payload slots per tile (mesh, atlas, navtile = 3)
    pub files_per_tile: u8,
    /// Storage identity; every archive of one tile set shares it
    pub uuid: Uuid,
}

impl Options {
    pub fn new(binary_order: u8, files_per_tile: u8, uuid: Uuid) -> Result<Self> {
        if binary_order == 0 || binary_order > 8 {
            return Err(Error::InconsistentInput(format!(
                "tilar binary order {} out of range 1..=8",
                binary_order
            )));
        }
        if files_per_tile == 0 {
            return Err(Error::InconsistentInput(
                "tilar files-per-tile must be positive".to_string(),
            ));
        }
        Ok(Self {
            binary_order,
            files_per_tile,
            uuid,
        })
    }

    /// Tiles per archive edge.
    pub fn edge(&self) -> u32 {
        1 << self.binary_order
    }

    /// Coordinate mask applied to a tile id to get in-archive coordinates.
    pub fn tile_mask(&self) -> u32 {
        self.edge() - 1
    }
}

/// Slot address inside one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileIndex {
    pub x: u32,
    pub y: u32,
    /// Payload kind, `0..files_per_tile`
    pub kind: u8,
}

impl FileIndex {
    pub fn new(x: u32, y: u32, kind: u8) -> Self {
        Self { x, y, kind }
    }

    pub fn check(&self, options: &Options) -> Result<()> {
        if self.x >= options.edge() || self.y >= options.edge() {
            return Err(Error::InconsistentInput(format!(
                "file index ({}, {}) outside {}x{} archive grid",
                self.x,
                self.y,
                options.edge(),
                options.edge()
            )));
        }
        if self.kind >= options.files_per_tile {
            return Err(Error::InconsistentInput(format!(
                "file kind {} out of range", self.kind
            )));
        }
        Ok(())
    }
}

/// Location of one live blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u64,
    pub length: u64,
    pub crc: u32,
}

pub fn header_bytes(options: &Options) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN as usize);
    out.extend_from_slice(HEADER_MAGIC);
    out.push(VERSION);
    out.extend_from_slice(options.uuid.as_bytes());
    out.push(options.binary_order);
    out.push(options.files_per_tile);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

pub fn parse_header(bytes: &[u8], name: &str) -> Result<Options> {
    let fail = |detail: &str| Error::format(name, detail);

    let mut cursor = bytes;
    let body = take(&mut cursor, HEADER_LEN as usize - 4).map_err(|_| fail("truncated header"))?;
    let crc = read_u32(&mut cursor).map_err(|_| fail("truncated header"))?;
    if crc32fast::hash(body) != crc {
        return Err(fail("header checksum mismatch"));
    }

    let mut cursor = body;
    if take(&mut cursor, 6).map_err(|_| fail("truncated header"))? != HEADER_MAGIC {
        return Err(fail("bad magic"));
    }
    if read_u8(&mut cursor).map_err(|_| fail("truncated header"))? != VERSION {
        return Err(fail("unsupported version"));
    }
    let uuid_bytes: [u8; 16] = take(&mut cursor, 16)
        .map_err(|_| fail("truncated header"))?
        .try_into()
        .expect("sized take");
    let binary_order = read_u8(&mut cursor).map_err(|_| fail("truncated header"))?;
    let files_per_tile = read_u8(&mut cursor).map_err(|_| fail("truncated header"))?;
    Options::new(binary_order, files_per_tile, Uuid::from_bytes(uuid_bytes))
        .map_err(|e| fail(&e.to_string()))
}

pub fn record_bytes(index: FileIndex, slot: Slot) -> [u8; RECORD_LEN as usize] {
    let mut out = [0u8; RECORD_LEN as usize];
    out[0] = RECORD_TAG;
    out[1] = index.x as u8;
    out[2] = index.y as u8;
    out[3] = index.kind;
    out[4..12].copy_from_slice(&slot.offset.to_le_bytes());
    out[12..20].copy_from_slice(&slot.length.to_le_bytes());
    out[20..24].copy_from_slice(&slot.crc.to_le_bytes());
    out
}

/// Parse a journal record; `None` when the tag byte does not match.
pub fn parse_record(bytes: &[u8]) -> Option<(FileIndex, Slot)> {
    let mut cursor = bytes;
    if read_u8(&mut cursor).ok()? != RECORD_TAG {
        return None;
    }
    let x = u32::from(read_u8(&mut cursor).ok()?);
    let y = u32::from(read_u8(&mut cursor).ok()?);
    let kind = read_u8(&mut cursor).ok()?;
    let offset = read_u64(&mut cursor).ok()?;
    let length = read_u64(&mut cursor).ok()?;
    let crc = read_u32(&mut cursor).ok()?;
    Some((
        FileIndex::new(x, y, kind),
        Slot {
            offset,
            length,
            crc,
        },
    ))
}

pub fn index_block_bytes(entries: &[(FileIndex, Slot)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + entries.len() * ENTRY_LEN);
    out.extend_from_slice(INDEX_MAGIC);
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (index, slot) in entries {
        out.push(index.x as u8);
        out.push(index.y as u8);
        out.push(index.kind);
        out.extend_from_slice(&slot.offset.to_le_bytes());
        out.extend_from_slice(&slot.length.to_le_bytes());
        out.extend_from_slice(&slot.crc.to_le_bytes());
    }
    out
}

/// Total byte length of an index block whose first 8 bytes are `head`, or
/// `None` when `head` does not start an index block.
pub fn index_block_len(head: &[u8]) -> Option<u64> {
    let mut cursor = head;
    if take(&mut cursor, 4).ok()? != INDEX_MAGIC {
        return None;
    }
    let count = read_u32(&mut cursor).ok()?;
    Some(8 + u64::from(count) * ENTRY_LEN as u64)
}

pub fn parse_index_block(bytes: &[u8], name: &str) -> Result<Vec<(FileIndex, Slot)>> {
    let fail = |detail: &str| Error::format(name, detail);

    let mut cursor = bytes;
    if take(&mut cursor, 4).map_err(|_| fail("truncated index"))? != INDEX_MAGIC {
        return Err(fail("bad index magic"));
    }
    let count = read_u32(&mut cursor).map_err(|_| fail("truncated index"))? as usize;
    let mut entries = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let x = u32::from(read_u8(&mut cursor).map_err(|_| fail("truncated index entry"))?);
        let y = u32::from(read_u8(&mut cursor).map_err(|_| fail("truncated index entry"))?);
        let kind = read_u8(&mut cursor).map_err(|_| fail("truncated index entry"))?;
        let offset = read_u64(&mut cursor).map_err(|_| fail("truncated index entry"))?;
        let length = read_u64(&mut cursor).map_err(|_| fail("truncated index entry"))?;
        let crc = read_u32(&mut cursor).map_err(|_| fail("truncated index entry"))?;
        entries.push((
            FileIndex::new(x, y, kind),
            Slot {
                offset,
                length,
                crc,
            },
        ));
    }
    Ok(entries)
}

pub fn trailer_bytes(index_offset: u64, index_len: u64, index_crc: u32) -> [u8; TRAILER_LEN as usize] {
    let mut out = [0u8; TRAILER_LEN as usize];
    out[0..4].copy_from_slice(TRAILER_MAGIC);
    out[4..12].copy_from_slice(&index_offset.to_le_bytes());
    out[12..20].copy_from_slice(&index_len.to_le_bytes());
    out[20..24].copy_from_slice(&index_crc.to_le_bytes());
    out
}

/// Parse the trailer slot; `None` when no valid trailer has been published.
pub fn parse_trailer(bytes: &[u8]) -> Option<(u64, u64, u32)> {
    let mut cursor = bytes;
    if take(&mut cursor, 4).ok()? != TRAILER_MAGIC {
        return None;
    }
    let offset = read_u64(&mut cursor).ok()?;
    let len = read_u64(&mut cursor).ok()?;
    let crc = read_u32(&mut cursor).ok()?;
    Some((offset, len, crc))
}
