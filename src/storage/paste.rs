//! Read handle returned by [`Store::get`](super::Store::get).

use super::mmap::MappedGuard;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, stream};
use std::{
    fmt, fs,
    io::{self, Read, Seek, SeekFrom},
    pin::Pin,
};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

/// A boxed stream of bytes for HTTP bodies.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Chunk size used when streaming a mapped paste (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

enum Source {
    Memory(Bytes),
    File(fs::File),
    Mapped(MappedGuard),
}

/// An open, immutable paste.
///
/// Supports sequential reads, seeking and positional reads. Handles from the
/// mapped backend read straight out of the mapping and keep the paste's
/// storage alive until dropped.
pub struct Paste {
    source: Source,
    pos: u64,
    size: u64,
    modified: DateTime<Utc>,
}

impl Paste {
    pub(crate) fn from_memory(content: Bytes, modified: DateTime<Utc>) -> Self {
        Self {
            size: content.len() as u64,
            source: Source::Memory(content),
            pos: 0,
            modified,
        }
    }

    pub(crate) fn from_file(file: fs::File, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            source: Source::File(file),
            pos: 0,
            size,
            modified,
        }
    }

    pub(crate) fn from_mapped(guard: MappedGuard) -> Self {
        Self {
            size: guard.size(),
            modified: guard.modified(),
            source: Source::Mapped(guard),
            pos: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Creation time of the paste; the basis of its expiry.
    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// Zero-copy view of the content, when it already lives in memory.
    pub fn as_slice(&self) -> Option<&[u8]> {
        match &self.source {
            Source::Memory(bytes) => Some(bytes.as_ref()),
            Source::Mapped(guard) => Some(guard.bytes()),
            Source::File(_) => None,
        }
    }

    /// Read from `offset` without moving the cursor.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        match &self.source {
            Source::File(file) => read_file_at(file, buf, offset),
            Source::Memory(bytes) => Ok(copy_from(bytes, buf, offset)),
            Source::Mapped(guard) => Ok(copy_from(guard.bytes(), buf, offset)),
        }
    }

    /// Convert into a stream of chunks from the current position to the end.
    pub fn into_stream(self) -> ByteStream {
        let len = self.size.saturating_sub(self.pos);
        self.into_bounded_stream(len)
    }

    /// Convert into a stream of at most `len` bytes from the current position.
    pub fn into_bounded_stream(self, len: u64) -> ByteStream {
        let start = self.pos.min(self.size);
        let end = start.saturating_add(len).min(self.size);
        match self.source {
            Source::Memory(bytes) => {
                let rest = bytes.slice(start as usize..end as usize);
                Box::pin(stream::once(async move { Ok::<_, io::Error>(rest) }))
            }
            Source::File(file) => Box::pin(ReaderStream::new(
                tokio::fs::File::from_std(file).take(end - start),
            )),
            Source::Mapped(guard) => Box::pin(stream::unfold(
                (guard, start),
                move |(guard, offset)| async move {
                    let data = guard.bytes();
                    let end = usize::try_from(end).unwrap_or(usize::MAX).min(data.len());
                    let from = usize::try_from(offset).ok().filter(|&o| o < end)?;
                    let to = (from + STREAM_CHUNK_SIZE).min(end);
                    let chunk = Bytes::copy_from_slice(&data[from..to]);
                    Some((Ok::<_, io::Error>(chunk), (guard, to as u64)))
                },
            )),
        }
    }
}

impl Read for Paste {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.source {
            Source::File(file) => file.read(buf)?,
            _ => self.read_at(buf, self.pos)?,
        };
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for Paste {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if let Source::File(file) = &mut self.source {
            self.pos = file.seek(pos)?;
            return Ok(self.pos);
        }
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        self.pos = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        Ok(self.pos)
    }
}

impl fmt::Debug for Paste {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            Source::Memory(_) => "memory",
            Source::File(_) => "file",
            Source::Mapped(_) => "mapped",
        };
        f.debug_struct("Paste")
            .field("source", &kind)
            .field("size", &self.size)
            .field("modified", &self.modified)
            .finish()
    }
}

fn copy_from(data: &[u8], buf: &mut [u8], offset: u64) -> usize {
    let Some(start) = usize::try_from(offset).ok().filter(|&o| o < data.len()) else {
        return 0;
    };
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

#[cfg(unix)]
fn read_file_at(file: &fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_file_at(file: &fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
