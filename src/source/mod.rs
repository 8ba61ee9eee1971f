// In: src/source/mod.rs

//! Input source abstraction.
//!
//! The resolver and every reader consume bytes through `InputSource`, a thin
//! extension of `Read + Seek` that also reports the total input length and
//! whether backward seeks are possible. Readers own their source exclusively,
//! so the trait requires `Send` but nothing more.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

pub(crate) mod cursor;

pub(crate) use cursor::{ByteCursor, ReadWindow};

/// A sized, seekable byte source.
pub trait InputSource: Read + Seek + Send {
    /// Total length of the input in bytes.
    fn size(&mut self) -> io::Result<u64>;

    /// Whether the source can seek to an offset before its current position.
    /// Rewinding a reader requires this.
    fn can_seek_backward(&self) -> bool {
        true
    }
}

/// Readers store their source type-erased.
pub type BoxedSource = Box<dyn InputSource>;

impl InputSource for File {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl<T: AsRef<[u8]> + Send> InputSource for Cursor<T> {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().as_ref().len() as u64)
    }
}

impl<S: InputSource + ?Sized> InputSource for Box<S> {
    fn size(&mut self) -> io::Result<u64> {
        (**self).size()
    }

    fn can_seek_backward(&self) -> bool {
        (**self).can_seek_backward()
    }
}

impl<S: InputSource + ?Sized> InputSource for &mut S {
    fn size(&mut self) -> io::Result<u64> {
        (**self).size()
    }

    fn can_seek_backward(&self) -> bool {
        (**self).can_seek_backward()
    }
}

//==================================================================================
// Forward-only adapter
//==================================================================================

/// Wraps a plain `Read` stream (a pipe, a socket, a decompressor) of known
/// length. Forward seeks are emulated by skipping bytes; backward seeks fail
/// with `ErrorKind::Unsupported`.
pub struct ForwardOnlySource<R> {
    inner: R,
    position: u64,
    len: u64,
}

impl<R: Read + Send> ForwardOnlySource<R> {
    pub fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            position: 0,
            len,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ForwardOnlySource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read> Seek for ForwardOnlySource<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;

        if target < self.position {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!(
                    "forward-only source cannot seek back from byte {} to byte {}",
                    self.position, target
                ),
            ));
        }

        let to_skip = target - self.position;
        let skipped = io::copy(&mut (&mut self.inner).take(to_skip), &mut io::sink())?;
        self.position += skipped;
        if skipped < to_skip {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended at byte {} before seek target {}", self.position, target),
            ));
        }
        Ok(self.position)
    }
}

impl<R: Read + Send> InputSource for ForwardOnlySource<R> {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.len)
    }

    fn can_seek_backward(&self) -> bool {
        false
    }
}
