//! Module `source` implements the random-access byte source (component B):
//! a backing file or in-memory buffer, plus the chunked-buffering [Reader]
//! and backpressure-aware [Writer] built on top of it.

use std::convert::TryInto;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::key::Key;

/// Default chunk size the [Reader] buffers reads in.
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024;

/// Default high-water mark, in bytes, before [Writer::append] drains its
/// internal buffer and reports backpressure.
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;

/// A random-access byte source: a backing file or an in-memory buffer.
/// Both [Reader] and [Writer] are built against this seam so the engine
/// is agnostic to where the bytes actually live.
pub trait ByteSource: Send + Sync {
    /// Current logical length of the source.
    fn len(&self) -> Result<u64>;
    /// Read up to `len` bytes starting at `offset`. Returns fewer than
    /// `len` bytes (possibly zero) if the source is shorter; this is not
    /// itself an error, callers decide what a short read means.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
    /// Positioned overwrite; may target bytes at or beyond the current
    /// length (in which case the source grows to accommodate it).
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;
    /// Append to the end of the source, returning the new length.
    fn append(&self, data: &[u8]) -> Result<u64>;
    /// Truncate (or zero-extend) the source to exactly `len` bytes.
    fn set_len(&self, len: u64) -> Result<()>;
    /// Flush any OS-level buffering.
    fn sync(&self) -> Result<()>;
}

/// In-memory byte source, backed by a `Vec<u8>` behind a mutex so it can
/// be shared between a [Reader] and a [Writer].
#[derive(Default)]
pub struct MemSource(Mutex<Vec<u8>>);

impl MemSource {
    pub fn new() -> MemSource {
        MemSource(Mutex::new(Vec::new()))
    }

    pub fn from_vec(data: Vec<u8>) -> MemSource {
        MemSource(Mutex::new(data))
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl ByteSource for MemSource {
    fn len(&self) -> Result<u64> {
        Ok(self.0.lock().unwrap().len() as u64)
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let buf = self.0.lock().unwrap();
        let offset = offset as usize;
        if offset >= buf.len() {
            return Ok(Vec::new());
        }
        let end = (offset + len).min(buf.len());
        Ok(buf[offset..end].to_vec())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut buf = self.0.lock().unwrap();
        let offset = offset as usize;
        let end = offset + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let mut buf = self.0.lock().unwrap();
        buf.extend_from_slice(data);
        Ok(buf.len() as u64)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.0.lock().unwrap().resize(len as usize, 0);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// File-backed byte source. Holds an exclusive advisory OS lock
/// ([fs2::FileExt]) for the lifetime of the handle, matching the
/// single-writer model (§5): two processes opening the same index file
/// for writing will have the second `open_write` fail fast rather than
/// silently interleave writes.
pub struct FileSource(Mutex<fs::File>);

impl FileSource {
    pub fn open_read(path: &std::path::Path) -> Result<FileSource> {
        let file = fs::OpenOptions::new().read(true).open(path)?;
        Ok(FileSource(Mutex::new(file)))
    }

    pub fn open_write(path: &std::path::Path, create: bool) -> Result<FileSource> {
        let mut opts = fs::OpenOptions::new();
        opts.read(true).write(true);
        if create {
            opts.create(true);
        }
        let file = opts.open(path)?;
        fs2::FileExt::try_lock_exclusive(&file).map_err(|_| {
            Error::IoError(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                format!("{:?} is locked by another writer", path),
            ))
        })?;
        Ok(FileSource(Mutex::new(file)))
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> Result<u64> {
        Ok(self.0.lock().unwrap().metadata()?.len())
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.0.lock().unwrap();
        let total = file.metadata()?.len();
        if offset >= total {
            return Ok(Vec::new());
        }
        let want = len.min((total - offset) as usize);
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; want];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        Ok(file.stream_position()?)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.0.lock().unwrap().set_len(len)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.0.lock().unwrap().sync_all()?;
        Ok(())
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        if let Ok(file) = self.0.lock() {
            let _ = fs2::FileExt::unlock(&*file);
        }
    }
}

/// An opaque saved read position, returned by [Reader::save_position] and
/// accepted by [Reader::restore_position].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor(u64);

/// Buffered, positioned reader over a [ByteSource] (component B).
///
/// Reads are served out of a chunk cache sized [DEFAULT_CHUNK_SIZE] (or
/// a caller-supplied size): sequential reads that stay within the cached
/// window never touch the backing source twice.
#[derive(Clone)]
pub struct Reader<'s> {
    source: &'s dyn ByteSource,
    pos: u64,
    chunk_size: u64,
    chunk: Option<(u64, Vec<u8>)>,
}

impl<'s> Reader<'s> {
    pub fn init(source: &'s dyn ByteSource) -> Reader<'s> {
        Reader {
            source,
            pos: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk: None,
        }
    }

    pub fn with_chunk_size(source: &'s dyn ByteSource, chunk_size: u64) -> Reader<'s> {
        Reader {
            source,
            pos: 0,
            chunk_size,
            chunk: None,
        }
    }

    pub fn seek(&mut self, absolute: u64) {
        self.pos = absolute;
    }

    pub fn skip(&mut self, n: u64) {
        self.pos += n;
    }

    pub fn source_index(&self) -> u64 {
        self.pos
    }

    pub fn save_position(&self) -> Cursor {
        Cursor(self.pos)
    }

    pub fn restore_position(&mut self, cursor: Cursor) {
        self.pos = cursor.0;
    }

    /// Read `n` bytes, advancing the cursor. Fails with [Error::Eof] if
    /// fewer than `n` bytes remain in the source.
    pub fn get(&mut self, n: usize) -> Result<Vec<u8>> {
        let start = self.pos;
        let end = start + n as u64;

        let need_refill = match &self.chunk {
            Some((origin, data)) => start < *origin || end > *origin + data.len() as u64,
            None => true,
        };
        if need_refill {
            let want = self.chunk_size.max(n as u64);
            let data = self.source.read_at(start, want as usize)?;
            self.chunk = Some((start, data));
        }

        let (origin, data) = self.chunk.as_ref().unwrap();
        let rel_start = (start - origin) as usize;
        let rel_end = rel_start + n;
        if rel_end > data.len() {
            return Err(Error::Eof(format!(
                "requested {} bytes at offset {}, source exhausted",
                n, start
            )));
        }
        self.pos = end;
        Ok(data[rel_start..rel_end].to_vec())
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let buf = self.get(4)?;
        Ok(u32::from_be_bytes(buf.as_slice().try_into().unwrap()))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        let buf = self.get(4)?;
        Ok(i32::from_be_bytes(buf.as_slice().try_into().unwrap()))
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.get(1)?[0])
    }

    /// Decode one key (or metadata value) using the component-A codec
    /// (tag + length header, then payload).
    pub fn get_value(&mut self) -> Result<Key> {
        let mut header = self.get(2)?;
        let len = header[1] as usize;
        let payload = self.get(len)?;
        header.extend_from_slice(&payload);
        let (key, _) = Key::decode(&header)?;
        Ok(key)
    }
}

/// Positioned writer over a [ByteSource] (component B).
///
/// `append` buffers writes locally; once the buffer reaches
/// `high_water_mark` it is drained to the backing source and the call
/// returns `Ok(false)` as a backpressure hint (the Node.js `stream.write`
/// convention this codebase's other writers also follow). `write` always
/// targets the backing source directly, draining the buffer first if the
/// positioned write would otherwise be reordered ahead of buffered bytes.
pub struct Writer {
    source: Arc<dyn ByteSource>,
    buffer: Vec<u8>,
    buffer_origin: u64,
    high_water_mark: usize,
    pos: u64,
}

impl Writer {
    pub fn new(source: Arc<dyn ByteSource>) -> Result<Writer> {
        Writer::with_high_water_mark(source, DEFAULT_HIGH_WATER_MARK)
    }

    pub fn with_high_water_mark(source: Arc<dyn ByteSource>, high_water_mark: usize) -> Result<Writer> {
        let pos = source.len()?;
        Ok(Writer {
            source,
            buffer: Vec::new(),
            buffer_origin: pos,
            high_water_mark,
            pos,
        })
    }

    /// Append to the logical end of the writer. Returns `Ok(true)` when
    /// the internal buffer had room, `Ok(false)` when it had to drain.
    pub fn append(&mut self, data: &[u8]) -> Result<bool> {
        self.buffer.extend_from_slice(data);
        self.pos += data.len() as u64;
        if self.buffer.len() >= self.high_water_mark {
            self.drain()?;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    fn drain(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.source.write_at(self.buffer_origin, &self.buffer)?;
            self.buffer_origin += self.buffer.len() as u64;
            self.buffer.clear();
        }
        Ok(())
    }

    /// Positioned overwrite, targeting any offset in `[0, position())`.
    pub fn write(&mut self, data: &[u8], absolute_index: u64) -> Result<()> {
        let buffered_end = self.buffer_origin + self.buffer.len() as u64;
        if absolute_index < buffered_end && absolute_index + data.len() as u64 > self.buffer_origin {
            self.drain()?;
        }
        self.source.write_at(absolute_index, data)
    }

    /// Current logical end of the writer (post-buffer).
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Drain remaining buffered bytes and fsync the backing source.
    pub fn end(&mut self) -> Result<u64> {
        self.drain()?;
        self.source.sync()?;
        Ok(self.pos)
    }
}

#[cfg(test)]
#[path = "source_test.rs"]
mod source_test;
