//! Tilar driver: tiles grouped into per-LOD archives.
//!
//! Tile payloads of LOD `l` live under `root/<l>/`, grouped by super-tile:
//! archive `<sx>-<sy>.tilar` holds mesh/atlas/navtile slots of the
//! `2^B × 2^B` tile block at `(sx << B, sy << B)`; metatiles get their own
//! single-slot `<sx>-<sy>.meta.tilar` archives. Store files stay plain
//! files under the root.
//!
//! ```text
//! archive    = (lod, x >> B, y >> B)
//! file index = (x & mask, y & mask, kind), mask = 2^B - 1
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tilar::{FileIndex, OpenMode, Options, Tilar};
use crate::tileid::{Lod, TileId};

use super::plain::PlainDriver;
use super::stream::{Capabilities, FileStat, IStream, OStream, Resources};
use super::{Driver, Mode, StoreFile, TileFile};

/// Default archive grid: 32x32 tiles per tilar file.
pub const DEFAULT_BINARY_ORDER: u8 = 5;

/// Tilar driver parameters, persisted in the config document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilarDriverOptions {
    pub binary_order: u8,
    pub uuid: Uuid,
}

impl Default for TilarDriverOptions {
    fn default() -> Self {
        Self {
            binary_order: DEFAULT_BINARY_ORDER,
            uuid: Uuid::new_v4(),
        }
    }
}

impl TilarDriverOptions {
    fn from_json(value: &Value, root: &Path) -> Result<Self> {
        let fail = |detail: &str| Error::format(root.display().to_string(), detail);
        let binary_order = value
            .get("binaryOrder")
            .and_then(Value::as_u64)
            .ok_or_else(|| fail("driver options missing binaryOrder"))?;
        let uuid = value
            .get("uuid")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| fail("driver options missing uuid"))?;
        Ok(Self {
            binary_order: u8::try_from(binary_order)
                .map_err(|_| fail("binaryOrder out of range"))?,
            uuid,
        })
    }
}

/// Identity of one archive on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ArchiveKey {
    lod: Lod,
    sx: u32,
    sy: u32,
    meta: bool,
}

struct Inner {
    root: PathBuf,
    options: TilarDriverOptions,
    mode: Mode,
    archives: DashMap<ArchiveKey, Arc<Mutex<Tilar>>>,
    watch: Mutex<Option<CancellationToken>>,
    /// Store files are not grouped; delegate them
    plain: PlainDriver,
}

/// Grouped-archive backend.
pub struct TilarDriver {
    inner: Arc<Inner>,
}

impl TilarDriver {
    /// Create a fresh store directory.
    pub fn create(root: &Path, options: TilarDriverOptions) -> Result<TilarDriver> {
        if root.exists() {
            return Err(Error::AlreadyExists(root.to_path_buf()));
        }
        fs::create_dir_all(root)?;
        let plain = PlainDriver::open(root, Mode::ReadWrite)?;
        debug!(root = %root.display(), binary_order = options.binary_order, "created tilar store");
        Ok(TilarDriver {
            inner: Arc::new(Inner {
                root: root.to_path_buf(),
                options,
                mode: Mode::ReadWrite,
                archives: DashMap::new(),
                watch: Mutex::new(None),
                plain,
            }),
        })
    }

    /// Open an existing store; `driver_options` comes from the config.
    pub fn open(root: &Path, driver_options: &Value, mode: Mode) -> Result<TilarDriver> {
        if !root.is_dir() {
            return Err(Error::NoSuchFile(root.display().to_string()));
        }
        let options = TilarDriverOptions::from_json(driver_options, root)?;
        let plain_mode = mode;
        Ok(TilarDriver {
            inner: Arc::new(Inner {
                root: root.to_path_buf(),
                options,
                mode,
                archives: DashMap::new(),
                watch: Mutex::new(None),
                plain: PlainDriver::open(root, plain_mode)?,
            }),
        })
    }

    fn locate(&self, id: TileId, file: TileFile) -> (ArchiveKey, FileIndex) {
        let bo = self.inner.options.binary_order;
        let mask = (1u32 << bo) - 1;
        match file.tilar_kind() {
            Some(kind) => (
                ArchiveKey {
                    lod: id.lod,
                    sx: id.x >> bo,
                    sy: id.y >> bo,
                    meta: false,
                },
                FileIndex::new(id.x & mask, id.y & mask, kind),
            ),
            None => (
                ArchiveKey {
                    lod: id.lod,
                    sx: id.x >> bo,
                    sy: id.y >> bo,
                    meta: true,
                },
                FileIndex::new(id.x & mask, id.y & mask, 0),
            ),
        }
    }

    fn archive_path(&self, key: ArchiveKey) -> PathBuf {
        let name = if key.meta {
            format!("{}-{}.meta.tilar", key.sx, key.sy)
        } else {
            format!("{}-{}.tilar", key.sx, key.sy)
        };
        self.inner.root.join(key.lod.to_string()).join(name)
    }

    fn tilar_options(&self, key: ArchiveKey) -> Options {
        let files = if key.meta { 1 } else { TileFile::TILE_KINDS };
        Options::new(self.inner.options.binary_order, files, self.inner.options.uuid)
            .expect("driver options validated at open")
    }

    /// Archive holding `key`, opened lazily. `create` also materialises the
    /// archive file (write path); without it a missing file reads as `None`.
    fn archive(&self, key: ArchiveKey, create: bool) -> Result<Option<Arc<Mutex<Tilar>>>> {
        if let Some(found) = self.inner.archives.get(&key) {
            return Ok(Some(found.clone()));
        }

        let path = self.archive_path(key);
        let expected = self.tilar_options(key);
        let mode = match self.inner.mode {
            Mode::ReadOnly => OpenMode::Read,
            Mode::ReadWrite => OpenMode::Append,
        };

        let tilar = if path.is_file() {
            Tilar::open(&path, mode, Some(&expected))?
        } else if create && self.inner.mode == Mode::ReadWrite {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Tilar::create(&path, expected)?
        } else {
            return Ok(None);
        };

        let entry = self
            .inner
            .archives
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(tilar)));
        Ok(Some(entry.clone()))
    }
}

impl Driver for TilarDriver {
    fn input_opt(&self, id: TileId, file: TileFile) -> Result<Option<IStream>> {
        let (key, fi) = self.locate(id, file);
        let Some(archive) = self.archive(key, false)? else {
            return Ok(None);
        };
        let archive = archive.lock().expect("archive lock poisoned");
        let Some(bytes) = archive.get(fi)? else {
            return Ok(None);
        };
        let modified = fs::metadata(archive.path())
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        Ok(Some(IStream::new(
            format!("{}.{}", id, file.ext()),
            bytes,
            modified,
        )))
    }

    fn input_file_opt(&self, file: StoreFile) -> Result<Option<IStream>> {
        self.inner.plain.input_file_opt(file)
    }

    fn output(&self, id: TileId, file: TileFile) -> Result<OStream> {
        if self.inner.mode == Mode::ReadOnly {
            return Err(Error::ReadOnly(format!("{}.{}", id, file.ext())));
        }
        let (key, fi) = self.locate(id, file);
        let inner = self.inner.clone();
        let driver = TilarDriver { inner };
        let name = format!("{}.{}", id, file.ext());
        Ok(OStream::new(
            name,
            Box::new(move |bytes: Vec<u8>| {
                let archive = driver
                    .archive(key, true)?
                    .expect("write-mode archive always materialises");
                let mut archive = archive.lock().expect("archive lock poisoned");
                archive.put(fi, &bytes)
            }),
        ))
    }

    fn output_file(&self, file: StoreFile) -> Result<OStream> {
        self.inner.plain.output_file(file)
    }

    fn stat(&self, id: TileId, file: TileFile) -> Result<FileStat> {
        let (key, fi) = self.locate(id, file);
        let archive = self
            .archive(key, false)?
            .ok_or_else(|| Error::NoSuchFile(format!("{}.{}", id, file.ext())))?;
        let archive = archive.lock().expect("archive lock poisoned");
        let size = archive
            .stat(fi)
            .ok_or_else(|| Error::NoSuchFile(format!("{}.{}", id, file.ext())))?;
        let modified = fs::metadata(archive.path())
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        Ok(FileStat {
            size,
            last_modified: modified,
        })
    }

    fn stat_file(&self, file: StoreFile) -> Result<FileStat> {
        self.inner.plain.stat_file(file)
    }

    fn flush(&self) -> Result<()> {
        let token = self.inner.watch.lock().expect("watch lock").clone();
        for entry in self.inner.archives.iter() {
            if let Some(token) = &token {
                if token.is_cancelled() {
                    return Err(Error::Cancelled);
                }
            }
            let mut archive = entry.value().lock().expect("archive lock poisoned");
            archive.flush()?;
        }
        Ok(())
    }

    fn watch(&self, token: CancellationToken) {
        *self.inner.watch.lock().expect("watch lock") = Some(token);
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_only: self.inner.mode == Mode::ReadOnly,
            grouped: true,
        }
    }

    fn last_modified(&self) -> SystemTime {
        super::latest_mtime(&self.inner.root)
    }

    fn resources(&self) -> Resources {
        Resources {
            open_files: self.inner.archives.len(),
            memory: 0,
        }
    }

    fn root(&self) -> &Path {
        &self.inner.root
    }

    fn options_json(&self) -> Value {
        json!({
            "driver": "tilar",
            "binaryOrder": self.inner.options.binary_order,
            "uuid": self.inner.options.uuid.to_string(),
        })
    }
}
