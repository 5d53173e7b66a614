use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;

use crate::meta::split_u32_pair;
use crate::{Error, Result};

/// Trait abstracting read access to cdb images.
///
/// Implementations must support positional reads without mutating shared
/// state, so one source can serve any number of concurrent lookups. Reads
/// that cannot be satisfied in full fail with `ErrorKind::UnexpectedEof`.
pub trait CdbReader {
    /// Fills `buf` with the bytes starting at `offset`.
    fn read_into(&self, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Reads `length` bytes starting at `offset` and forwards them to `f`.
    fn read_exact_at<F, T>(&self, offset: u64, length: u64, f: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        let length = usize::try_from(length).map_err(|_| {
            Error::corrupt(format!("read of {length} bytes at {offset} is too large"))
        })?;
        let mut buffer = vec![0u8; length];
        self.read_into(&mut buffer, offset)?;
        f(&buffer)
    }

    /// Reads the little-endian `(u32, u32)` pair stored at `offset`.
    fn read_u32_pair(&self, offset: u64) -> Result<(u32, u32)> {
        let mut buf = [0u8; 8];
        self.read_into(&mut buf, offset)?;
        Ok(split_u32_pair(&buf))
    }
}

fn short_read(offset: u64, length: usize) -> Error {
    Error::Io(IoError::new(
        ErrorKind::UnexpectedEof,
        format!("failed to read {length} bytes at offset {offset}"),
    ))
}

impl CdbReader for [u8] {
    fn read_into(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let data = slice_at(self, offset, buf.len())?;
        buf.copy_from_slice(data);
        Ok(())
    }

    fn read_exact_at<F, T>(&self, offset: u64, length: u64, f: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        let length = usize::try_from(length).map_err(|_| short_read(offset, usize::MAX))?;
        f(slice_at(self, offset, length)?)
    }
}

fn slice_at(data: &[u8], offset: u64, length: usize) -> Result<&[u8]> {
    usize::try_from(offset)
        .ok()
        .and_then(|start| data.get(start..start.checked_add(length)?))
        .ok_or_else(|| short_read(offset, length))
}

impl CdbReader for Vec<u8> {
    fn read_into(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.as_slice().read_into(buf, offset)
    }

    fn read_exact_at<F, T>(&self, offset: u64, length: u64, f: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        self.as_slice().read_exact_at(offset, length, f)
    }
}

impl<R: CdbReader + ?Sized> CdbReader for &R {
    fn read_into(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        (**self).read_into(buf, offset)
    }

    fn read_exact_at<F, T>(&self, offset: u64, length: u64, f: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        (**self).read_exact_at(offset, length, f)
    }
}

impl<R: CdbReader + ?Sized> CdbReader for Arc<R> {
    fn read_into(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        (**self).read_into(buf, offset)
    }

    fn read_exact_at<F, T>(&self, offset: u64, length: u64, f: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        (**self).read_exact_at(offset, length, f)
    }
}

#[cfg(unix)]
impl CdbReader for std::fs::File {
    fn read_into(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)?;
        Ok(())
    }
}

#[cfg(windows)]
impl CdbReader for std::fs::File {
    fn read_into(&self, mut buf: &mut [u8], mut offset: u64) -> Result<()> {
        use std::os::windows::fs::FileExt;

        let requested = buf.len();
        while !buf.is_empty() {
            match self.seek_read(buf, offset) {
                Ok(0) => return Err(short_read(offset, requested)),
                Ok(n) => {
                    let rest = buf;
                    buf = &mut rest[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_slice_reader() {
        let data = b"0123456789".to_vec();
        let mut buf = [0u8; 3];
        data.read_into(&mut buf, 7).unwrap();
        assert_eq!(&buf, b"789");

        let err = data.read_into(&mut buf, 8).unwrap_err();
        assert!(err.is_unexpected_eof());
        let err = data.read_into(&mut buf, u64::MAX).unwrap_err();
        assert!(err.is_unexpected_eof());

        let pair = data.read_exact_at(2, 2, |b| Ok(b.to_vec())).unwrap();
        assert_eq!(pair, b"23");
        let empty = data.read_exact_at(10, 0, |bytes| Ok(bytes.len())).unwrap();
        assert_eq!(empty, 0);
        data.read_exact_at(10, 1, |_| Ok(())).unwrap_err();
    }

    #[test]
    fn test_u32_pair() {
        let data = [1u8, 0, 0, 0, 0, 1, 0, 0, 9];
        assert_eq!(data[..].read_u32_pair(0).unwrap(), (1, 256));
        data[..].read_u32_pair(2).unwrap_err();
    }

    #[test]
    fn test_file_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"abcdefgh")
            .unwrap();

        let file = Arc::new(std::fs::File::open(&path).unwrap());
        let text = file
            .read_exact_at(2, 4, |bytes| Ok(bytes.to_vec()))
            .unwrap();
        assert_eq!(text, b"cdef");
        let err = file.read_exact_at(6, 4, |_| Ok(())).unwrap_err();
        assert!(err.is_unexpected_eof());
    }
}
