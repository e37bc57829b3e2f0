//! Stream Module
//!
//! The backing-storage capability the store is opened over.
//!
//! Any random-access byte stream works: the store positions with `seek` before every
//! page read or write and never relies on the stream buffering for it. Every
//! `Read + Write + Seek` type (`File`, `&mut File`, `Cursor<Vec<u8>>`, ...) is a
//! `Stream` through the blanket implementation below.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Random-access, seekable byte stream supplied by the caller
pub trait Stream {
    /// Read up to `buf.len()` bytes at the current position
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes at the current position
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Move to an absolute, current-relative or end-relative position
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Current position
    fn tell(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::Current(0))
    }

    /// Push written bytes down to the underlying medium
    fn flush(&mut self) -> io::Result<()>;

    /// Release the stream. The store never calls this; it belongs to the owner.
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }

    // =========================================================================
    // Provided helpers
    // =========================================================================

    /// Fill `buf` from `offset`, failing with `UnexpectedEof` on a short stream
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream ended {} bytes short at offset {}", buf.len() - filled, offset),
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Write all of `buf` at `offset`
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        let mut written = 0;
        while written < buf.len() {
            match self.write(&buf[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("stream accepted no bytes at offset {}", offset + written as u64),
                    ))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Total length of the stream in bytes
    fn size(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::End(0))
    }
}

impl<T: Read + Write + Seek> Stream for T {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }
}
