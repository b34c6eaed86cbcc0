//! Driver stream and stat types.

use std::io::{self, Cursor, Write};
use std::time::SystemTime;

use crate::error::Result;

/// In-memory read stream handed out by drivers.
///
/// Payloads are tile-sized, so streams carry their bytes; `reader` wraps
/// them for io-based codecs.
#[derive(Debug, Clone)]
pub struct IStream {
    name: String,
    data: Vec<u8>,
    last_modified: SystemTime,
}

impl IStream {
    pub fn new(name: impl Into<String>, data: Vec<u8>, last_modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            data,
            last_modified,
        }
    }

    /// Key name, used in error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.data)
    }

    pub fn stat(&self) -> FileStat {
        FileStat {
            size: self.data.len() as u64,
            last_modified: self.last_modified,
        }
    }
}

type Sink = Box<dyn FnOnce(Vec<u8>) -> Result<()> + Send>;

/// Buffered write sink; the write commits on [`OStream::close`].
///
/// Dropping the sink without closing discards the write.
pub struct OStream {
    name: String,
    buf: Vec<u8>,
    sink: Sink,
}

impl OStream {
    pub fn new(name: impl Into<String>, sink: Sink) -> Self {
        Self {
            name: name.into(),
            buf: Vec::new(),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Commit the buffered bytes to the backend.
    pub fn close(self) -> Result<()> {
        (self.sink)(self.buf)
    }
}

impl Write for OStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Size and mtime of one stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub last_modified: SystemTime,
}

/// Driver properties fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Writes are rejected
    pub read_only: bool,
    /// Tiles are grouped into archives with their own physical index
    pub grouped: bool,
}

/// Resource usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resources {
    pub open_files: usize,
    pub memory: u64,
}
