//! Plain driver: one file per key.
//!
//! Tile payloads land as `<lod>-<x>-<y>.<ext>` directly under the root,
//! store files under their fixed names. Writes go through a temporary file
//! renamed into place on close, so readers never observe half a payload.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::tileid::TileId;

use super::stream::{Capabilities, FileStat, IStream, OStream, Resources};
use super::{latest_mtime, Driver, Mode, StoreFile, TileFile};

struct Inner {
    root: PathBuf,
    mode: Mode,
    watch: Mutex<Option<CancellationToken>>,
}

/// One-file-per-key backend.
pub struct PlainDriver {
    inner: Arc<Inner>,
}

impl PlainDriver {
    /// Create a fresh store directory.
    pub fn create(root: &Path) -> Result<PlainDriver> {
        if root.exists() {
            return Err(Error::AlreadyExists(root.to_path_buf()));
        }
        fs::create_dir_all(root)?;
        debug!(root = %root.display(), "created plain store");
        Ok(Self::attach(root, Mode::ReadWrite))
    }

    /// Open an existing store directory.
    pub fn open(root: &Path, mode: Mode) -> Result<PlainDriver> {
        if !root.is_dir() {
            return Err(Error::NoSuchFile(root.display().to_string()));
        }
        Ok(Self::attach(root, mode))
    }

    fn attach(root: &Path, mode: Mode) -> PlainDriver {
        PlainDriver {
            inner: Arc::new(Inner {
                root: root.to_path_buf(),
                mode,
                watch: Mutex::new(None),
            }),
        }
    }

    fn tile_path(&self, id: TileId, file: TileFile) -> PathBuf {
        self.inner.root.join(format!("{}.{}", id, file.ext()))
    }

    fn read_opt(&self, path: PathBuf) -> Result<Option<IStream>> {
        match fs::read(&path) {
            Ok(data) => {
                let modified = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Ok(Some(IStream::new(path.display().to_string(), data, modified)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write_sink(&self, path: PathBuf) -> Result<OStream> {
        if self.inner.mode == Mode::ReadOnly {
            return Err(Error::ReadOnly(path.display().to_string()));
        }
        let name = path.display().to_string();
        let sink_name = name.clone();
        Ok(OStream::new(
            name,
            Box::new(move |bytes: Vec<u8>| {
                let tmp = PathBuf::from(format!("{}.tmp", path.display()));
                fs::write(&tmp, &bytes)?;
                fs::rename(&tmp, &path)?;
                debug!(path = %sink_name, size = bytes.len(), "committed plain write");
                Ok(())
            }),
        ))
    }

    fn stat_path(&self, path: PathBuf) -> Result<FileStat> {
        let meta = fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NoSuchFile(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        Ok(FileStat {
            size: meta.len(),
            last_modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }
}

impl Driver for PlainDriver {
    fn input_opt(&self, id: TileId, file: TileFile) -> Result<Option<IStream>> {
        self.read_opt(self.tile_path(id, file))
    }

    fn input_file_opt(&self, file: StoreFile) -> Result<Option<IStream>> {
        self.read_opt(self.inner.root.join(file.filename()))
    }

    fn output(&self, id: TileId, file: TileFile) -> Result<OStream> {
        self.write_sink(self.tile_path(id, file))
    }

    fn output_file(&self, file: StoreFile) -> Result<OStream> {
        self.write_sink(self.inner.root.join(file.filename()))
    }

    fn stat(&self, id: TileId, file: TileFile) -> Result<FileStat> {
        self.stat_path(self.tile_path(id, file))
    }

    fn stat_file(&self, file: StoreFile) -> Result<FileStat> {
        self.stat_path(self.inner.root.join(file.filename()))
    }

    fn flush(&self) -> Result<()> {
        // every write is already durable at close
        if let Some(token) = self.inner.watch.lock().expect("watch lock").as_ref() {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }
        Ok(())
    }

    fn watch(&self, token: CancellationToken) {
        *self.inner.watch.lock().expect("watch lock") = Some(token);
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_only: self.inner.mode == Mode::ReadOnly,
            grouped: false,
        }
    }

    fn last_modified(&self) -> SystemTime {
        latest_mtime(&self.inner.root)
    }

    fn resources(&self) -> Resources {
        Resources {
            open_files: 0,
            memory: 0,
        }
    }

    fn root(&self) -> &Path {
        &self.inner.root
    }

    fn options_json(&self) -> Value {
        json!({ "driver": "plain" })
    }
}
