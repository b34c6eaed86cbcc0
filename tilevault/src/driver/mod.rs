//! Pluggable key→byte-stream backends below the tile set.
//!
//! A [`Driver`] maps tile keys (`TileId` + [`TileFile`]) and store-level
//! keys ([`StoreFile`]) to byte streams. Two implementations ship with the
//! engine: the [`tilar`](TilarDriver) backend groups tiles into per-LOD
//! archives, the [`plain`](PlainDriver) backend keeps one file per key.

mod plain;
mod stream;
mod tilar;


pub use plain::PlainDriver;
pub use stream::{Capabilities, FileStat, IStream, OStream, Resources};
pub use tilar::{TilarDriver, TilarDriverOptions};

use std::path::Path;
use std::time::SystemTime;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::tileid::TileId;

/// Per-tile payload kinds a driver stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFile {
    Mesh,
    Atlas,
    NavTile,
    Meta,
}

impl TileFile {
    /// File extension used by the plain driver and in stream names.
    pub fn ext(&self) -> &'static str {
        match self {
            TileFile::Mesh => "mesh",
            TileFile::Atlas => "atlas",
            TileFile::NavTile => "nav",
            TileFile::Meta => "meta",
        }
    }

    /// Payload kinds stored per tile slot in a tiles archive.
    pub const TILE_KINDS: u8 = 3;

    /// Slot kind inside a tiles archive; `None` for metatiles, which live
    /// in their own archives.
    pub fn tilar_kind(&self) -> Option<u8> {
        match self {
            TileFile::Mesh => Some(0),
            TileFile::Atlas => Some(1),
            TileFile::NavTile => Some(2),
            TileFile::Meta => None,
        }
    }
}

/// Store-level files a driver keeps besides tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreFile {
    /// Tile-set properties document
    Config,
    /// Serialized tile index
    TileIndex,
    /// Snapshot of the registry entries the set depends on
    Registry,
}

impl StoreFile {
    pub fn filename(&self) -> &'static str {
        match self {
            StoreFile::Config => "config.json",
            StoreFile::TileIndex => "tileindex.bin",
            StoreFile::Registry => "registry.json",
        }
    }
}

/// Driver access mode, fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

/// Uniform storage interface under a tile set.
pub trait Driver: Send + Sync {
    /// Read a tile payload; absent keys are `None`.
    fn input_opt(&self, id: TileId, file: TileFile) -> Result<Option<IStream>>;

    /// Read a store file; absent keys are `None`.
    fn input_file_opt(&self, file: StoreFile) -> Result<Option<IStream>>;

    /// Read a tile payload; absent keys fail with `NoSuchFile`.
    fn input(&self, id: TileId, file: TileFile) -> Result<IStream> {
        self.input_opt(id, file)?
            .ok_or_else(|| Error::NoSuchFile(format!("{}.{}", id, file.ext())))
    }

    /// Read a store file; absent keys fail with `NoSuchFile`.
    fn input_file(&self, file: StoreFile) -> Result<IStream> {
        self.input_file_opt(file)?
            .ok_or_else(|| Error::NoSuchFile(file.filename().to_string()))
    }

    /// Open a write sink for a tile payload. The write becomes visible when
    /// the sink is closed; a dropped sink is discarded.
    fn output(&self, id: TileId, file: TileFile) -> Result<OStream>;

    /// Open a write sink for a store file.
    fn output_file(&self, file: StoreFile) -> Result<OStream>;

    fn stat(&self, id: TileId, file: TileFile) -> Result<FileStat>;

    fn stat_file(&self, file: StoreFile) -> Result<FileStat>;

    /// Make all completed writes durable and visible to fresh readers.
    fn flush(&self) -> Result<()>;

    /// Attach a cancellation token observed by long-running operations.
    fn watch(&self, token: CancellationToken);

    fn capabilities(&self) -> Capabilities;

    /// Most recent modification across the store.
    fn last_modified(&self) -> SystemTime;

    fn resources(&self) -> Resources;

    /// Root path of the store.
    fn root(&self) -> &Path;

    /// Driver identification and parameters for the config document.
    fn options_json(&self) -> Value;
}

/// Open the driver described by a config's `driverOptions` value.
pub fn open_from_config(root: &Path, driver_options: &Value, mode: Mode) -> Result<Box<dyn Driver>> {
    let kind = driver_options
        .get("driver")
        .and_then(Value::as_str)
        .unwrap_or("tilar");
    match kind {
        "tilar" => Ok(Box::new(TilarDriver::open(root, driver_options, mode)?)),
        "plain" => Ok(Box::new(PlainDriver::open(root, mode)?)),
        other => Err(Error::InconsistentInput(format!(
            "unknown driver kind: {}",
            other
        ))),
    }
}

/// Latest modification time under `root`, recursively.
pub(crate) fn latest_mtime(root: &Path) -> SystemTime {
    fn walk(dir: &Path, latest: &mut SystemTime) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if let Ok(modified) = meta.modified() {
                if modified > *latest {
                    *latest = modified;
                }
            }
            if meta.is_dir() {
                walk(&entry.path(), latest);
            }
        }
    }
    let mut latest = SystemTime::UNIX_EPOCH;
    walk(root, &mut latest);
    latest
}
