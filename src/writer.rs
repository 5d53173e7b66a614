use std::io::{Seek, SeekFrom, Write};

use crate::Result;

/// Trait representing positional writers suitable for cdb construction.
///
/// The builder streams records and tables at increasing offsets, then comes
/// back to offset zero to fill in the header. Any `Write + Seek` sink
/// (files, `Cursor<Vec<u8>>`) satisfies this through the blanket impl.
pub trait CdbWriter {
    /// Writes all of `data` at the given absolute `offset`.
    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()>;

    /// Flushes any buffering in the sink itself.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Write + Seek> CdbWriter for T {
    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Write::flush(self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_cursor_writer() {
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_at(b"world", 6).unwrap();
        cursor.write_at(b"hello", 0).unwrap();
        CdbWriter::flush(&mut cursor).unwrap();
        assert_eq!(cursor.into_inner(), b"hello\0world");
    }
}
