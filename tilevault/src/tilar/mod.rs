//! Tilar tile archives.
//!
//! A tilar file groups the payloads of a `2^B × 2^B` block of tiles at one
//! LOD. The file is append-only: every `put` writes a journal record and
//! the blob, `flush` appends a fresh index block and publishes it through
//! the fixed trailer slot. Opening probes the trailer first and falls back
//! to forward journal replay, so a crash between writes and flush loses
//! nothing that was fully written; a torn tail is truncated.
//!
//! Exactly one writer may hold an archive (enforced with an exclusive file
//! lock); readers may share it once flushed.

mod format;


pub use format::{FileIndex, Options, Slot};

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How an archive is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Shared read access
    Read,
    /// Exclusive append access
    Append,
}

/// One open tilar archive.
pub struct Tilar {
    path: PathBuf,
    file: Mutex<File>,
    options: Options,
    mode: OpenMode,
    /// Live slots; the writer's copy supersedes the on-disk index until flush
    index: HashMap<FileIndex, Slot>,
    /// End of valid data; appends continue here
    data_end: u64,
    /// Writes since the last flush
    dirty: bool,
}

impl Tilar {
    /// Create a fresh archive. Fails if the path already exists.
    pub fn create(path: &Path, options: Options) -> Result<Tilar> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::AlreadyExists(path.to_path_buf())
                } else {
                    Error::Io(e)
                }
            })?;
        lock_file(&file, OpenMode::Append, path)?;

        file.write_all(&format::header_bytes(&options))?;
        // zeroed slot parses as "no trailer yet"
        file.write_all(&[0u8; format::TRAILER_LEN as usize])?;
        file.sync_all()?;

        debug!(path = %path.display(), "created tilar archive");
        Ok(Tilar {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            options,
            mode: OpenMode::Append,
            index: HashMap::new(),
            data_end: format::DATA_START,
            dirty: false,
        })
    }

    /// Open an existing archive.
    ///
    /// `expected` guards against mixing archives of different tile sets:
    /// when given, the stored options (including the uuid) must match.
    pub fn open(path: &Path, mode: OpenMode, expected: Option<&Options>) -> Result<Tilar> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::Append)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NoSuchFile(path.display().to_string())
                } else {
                    Error::Io(e)
                }
            })?;
        lock_file(&file, mode, path)?;

        let name = path.display().to_string();
        let file_len = file.metadata()?.len();

        let mut header = [0u8; format::HEADER_LEN as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)
            .map_err(|_| Error::format(&name, "truncated header"))?;
        let options = format::parse_header(&header, &name)?;
        if let Some(expected) = expected {
            if options != *expected {
                return Err(Error::format(&name, "archive options mismatch"));
            }
        }

        let mut trailer = [0u8; format::TRAILER_LEN as usize];
        file.read_exact(&mut trailer)
            .map_err(|_| Error::format(&name, "truncated trailer slot"))?;

        let mut index = HashMap::new();
        let mut replay_from = format::DATA_START;

        if let Some((offset, len, crc)) = format::parse_trailer(&trailer) {
            if offset < format::DATA_START || offset + len > file_len {
                return Err(Error::format(&name, "trailer points outside the file"));
            }
            let mut block = vec![0u8; len as usize];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut block)?;
            if crc32fast::hash(&block) != crc {
                return Err(Error::format(&name, "index block checksum mismatch"));
            }
            for (fi, slot) in format::parse_index_block(&block, &name)? {
                fi.check(&options)?;
                index.insert(fi, slot);
            }
            replay_from = offset + len;
        }

        // replay journal records appended after the last published index
        let (data_end, replayed) =
            replay_journal(&mut file, file_len, replay_from, &options, &mut index)?;

        if data_end < file_len {
            if mode == OpenMode::Append {
                // torn tail from a crashed writer; drop it
                warn!(
                    path = %name,
                    lost = file_len - data_end,
                    "truncating torn tilar tail"
                );
                file.set_len(data_end)?;
            } else {
                debug!(path = %name, "ignoring torn tilar tail in read mode");
            }
        }

        Ok(Tilar {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            options,
            mode,
            index,
            data_end,
            // recovered writes are republished on the next flush
            dirty: mode == OpenMode::Append && replayed > 0,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a slot currently holds a blob.
    pub fn contains(&self, index: FileIndex) -> bool {
        self.index.contains_key(&index)
    }

    /// Read the blob at a slot; `None` for never-written slots.
    pub fn get(&self, index: FileIndex) -> Result<Option<Vec<u8>>> {
        index.check(&self.options)?;
        let Some(slot) = self.index.get(&index).copied() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; slot.length as usize];
        {
            let mut file = self.file.lock().expect("tilar file lock poisoned");
            file.seek(SeekFrom::Start(slot.offset))?;
            file.read_exact(&mut buf)?;
        }
        if crc32fast::hash(&buf) != slot.crc {
            return Err(Error::format(
                self.path.display().to_string(),
                format!("blob checksum mismatch at slot ({}, {}, {})", index.x, index.y, index.kind),
            ));
        }
        Ok(Some(buf))
    }

    /// Size of the blob at a slot, if present.
    pub fn stat(&self, index: FileIndex) -> Option<u64> {
        self.index.get(&index).map(|s| s.length)
    }

    /// Append a blob for a slot. The previous blob, if any, becomes dead
    /// bytes reclaimed by a future repack.
    pub fn put(&mut self, index: FileIndex, data: &[u8]) -> Result<()> {
        if self.mode != OpenMode::Append {
            return Err(Error::ReadOnly(self.path.display().to_string()));
        }
        index.check(&self.options)?;

        let slot = Slot {
            offset: self.data_end + format::RECORD_LEN,
            length: data.len() as u64,
            crc: crc32fast::hash(data),
        };
        {
            let mut file = self.file.lock().expect("tilar file lock poisoned");
            file.seek(SeekFrom::Start(self.data_end))?;
            file.write_all(&format::record_bytes(index, slot))?;
            file.write_all(data)?;
        }
        self.data_end = slot.offset + slot.length;
        self.index.insert(index, slot);
        self.dirty = true;
        Ok(())
    }

    /// Publish the live index: append an index block, sync, swap the
    /// trailer, sync again.
    pub fn flush(&mut self) -> Result<()> {
        if self.mode != OpenMode::Append {
            return Err(Error::ReadOnly(self.path.display().to_string()));
        }
        if !self.dirty {
            return Ok(());
        }

        let mut entries: Vec<(FileIndex, Slot)> =
            self.index.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by_key(|(fi, _)| (fi.y, fi.x, fi.kind));
        let block = format::index_block_bytes(&entries);
        let crc = crc32fast::hash(&block);
        let offset = self.data_end;

        {
            let mut file = self.file.lock().expect("tilar file lock poisoned");
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&block)?;
            file.sync_all()?;

            file.seek(SeekFrom::Start(format::TRAILER_OFFSET))?;
            file.write_all(&format::trailer_bytes(offset, block.len() as u64, crc))?;
            file.sync_all()?;
        }

        self.data_end = offset + block.len() as u64;
        self.dirty = false;
        debug!(path = %self.path.display(), entries = entries.len(), "flushed tilar index");
        Ok(())
    }

    /// Live slots and their blob sizes.
    pub fn entries(&self) -> impl Iterator<Item = (FileIndex, u64)> + '_ {
        self.index.iter().map(|(fi, slot)| (*fi, slot.length))
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether unflushed writes exist.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Replay journal records forward from `pos`, stopping at the first record
/// that does not validate. Returns the end of valid data.
fn replay_journal(
    file: &mut File,
    file_len: u64,
    mut pos: u64,
    options: &Options,
    index: &mut HashMap<FileIndex, Slot>,
) -> Result<(u64, usize)> {
    let mut record = [0u8; format::RECORD_LEN as usize];
    let mut replayed = 0usize;
    while pos + format::RECORD_LEN <= file_len {
        file.seek(SeekFrom::Start(pos))?;
        if file.read_exact(&mut record).is_err() {
            break;
        }
        let Some((fi, slot)) = format::parse_record(&record) else {
            // an index block published by an earlier flush sits in the data
            // region; skip it structurally and keep replaying behind it
            if let Some(block_len) = format::index_block_len(&record) {
                if pos + block_len <= file_len {
                    pos += block_len;
                    continue;
                }
            }
            break;
        };
        if fi.check(options).is_err() {
            break;
        }
        if slot.offset != pos + format::RECORD_LEN || slot.offset + slot.length > file_len {
            break;
        }
        let mut blob = vec![0u8; slot.length as usize];
        if file.read_exact(&mut blob).is_err() {
            break;
        }
        if crc32fast::hash(&blob) != slot.crc {
            break;
        }
        index.insert(fi, slot);
        pos = slot.offset + slot.length;
        replayed += 1;
    }
    if replayed > 0 {
        debug!(replayed, "recovered tilar writes from journal");
    }
    Ok((pos, replayed))
}

#[cfg(unix)]
fn lock_file(file: &File, mode: OpenMode, path: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        OpenMode::Read => libc::LOCK_SH,
        OpenMode::Append => libc::LOCK_EX,
    } | libc::LOCK_NB;
    // Safety: flock on a fd we own; no memory is touched.
    let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
    if rc != 0 {
        return Err(Error::InconsistentInput(format!(
            "tilar archive {} is locked by another process",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_file(_file: &File, _mode: OpenMode, _path: &Path) -> Result<()> {
    Ok(())
}
