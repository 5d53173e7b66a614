use std::borrow::Borrow;
use std::io::{BufWriter, Cursor, Read, Write};

use tracing::debug;

use crate::error::to_u32;
use crate::meta::join_u32_pair;
use crate::{
    BUCKET_COUNT, CdbHasher, CdbHeader, CdbInfo, CdbTable, CdbWriter, HEADER_SIZE, Result, text,
};

/// Builder type for emitting cdb images from record iterators.
///
/// The builder owns the IO buffering configuration. Records are streamed to
/// the sink in input order right after a reserved header area; only the
/// per-bucket `(hash, offset)` lists are kept in memory. Once the input is
/// exhausted the hash tables are appended and the header is written back at
/// offset zero.
///
/// If [`build`](Self::build) returns an error the sink holds a partial image
/// and must be discarded by the caller.
#[derive(Debug, Clone)]
pub struct CdbBuilder {
    writer_buffer_size: usize,
    reader_buffer_size: usize,
}

impl Default for CdbBuilder {
    fn default() -> Self {
        Self {
            writer_buffer_size: 64 << 10, // 64 KiB
            reader_buffer_size: 64 << 10, // 64 KiB
        }
    }
}

/// One hash table slot. `offset == 0` marks an empty slot since no record
/// can start inside the header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Slot {
    hash: u32,
    offset: u32,
}

impl CdbBuilder {
    /// Adjusts the capacity of the buffered writer used while streaming data.
    pub fn with_writer_buffer_size(mut self, size: usize) -> Self {
        self.writer_buffer_size = size;
        self
    }

    /// Adjusts the capacity of the buffered reader used by
    /// [`build_text`](Self::build_text).
    pub fn with_reader_buffer_size(mut self, size: usize) -> Self {
        self.reader_buffer_size = size;
        self
    }

    /// Consumes the builder and writes a cdb image to `writer` from `records`.
    ///
    /// Duplicate keys are kept; lookups return their values in input order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`](crate::Error::OutOfRange) if a key, a
    /// value, or the image itself outgrows the 32-bit layout, and
    /// [`Error::Io`](crate::Error::Io) if the sink fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use cdb::{Cdb, CdbBuilder};
    ///
    /// # fn main() -> cdb::Result<()> {
    /// let mut image = std::io::Cursor::new(Vec::new());
    /// let info = CdbBuilder::default().build(&mut image, [("it", "works")].iter())?;
    /// assert_eq!(info.record_count, 1);
    ///
    /// let db = Cdb::open(image.into_inner())?;
    /// assert_eq!(db.get(b"it")?, Some(b"works".to_vec()));
    /// # Ok(())
    /// # }
    /// ```
    pub fn build<W, K, V>(
        self,
        writer: &mut W,
        records: impl IntoIterator<Item = impl Borrow<(K, V)>>,
    ) -> Result<CdbInfo>
    where
        W: CdbWriter + ?Sized,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.try_build(writer, records.into_iter().map(Ok))
    }

    /// Like [`build`](Self::build), for record sources that can fail.
    ///
    /// The first `Err` item aborts the build and is returned unchanged.
    pub fn try_build<W, K, V, E>(
        self,
        writer: &mut W,
        records: impl IntoIterator<Item = Result<E>>,
    ) -> Result<CdbInfo>
    where
        W: CdbWriter + ?Sized,
        E: Borrow<(K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut buckets: Vec<Vec<Slot>> = vec![Vec::new(); BUCKET_COUNT];
        let mut hasher = CdbHasher::new();
        let mut record_count: u64 = 0;
        let mut pos = HEADER_SIZE as u64;

        let mut buf_writer = BufWriter::with_capacity(
            self.writer_buffer_size,
            CdbWriterWrapper {
                inner: writer,
                offset: pos,
            },
        );

        for record in records {
            let record = record?;
            let (key, value) = record.borrow();
            let (key, value) = (key.as_ref(), value.as_ref());
            let key_len = to_u32("key length", key.len() as u64)?;
            let value_len = to_u32("value length", value.len() as u64)?;
            let offset = to_u32("record offset", pos)?;

            hasher.reset();
            hasher.update(key);
            let hash = hasher.value();

            buf_writer.write_all(&join_u32_pair(key_len, value_len))?;
            buf_writer.write_all(key)?;
            buf_writer.write_all(value)?;

            buckets[hash as usize % BUCKET_COUNT].push(Slot { hash, offset });
            pos += 8 + u64::from(key_len) + u64::from(value_len);
            record_count += 1;
        }

        let records_end = to_u32("records region end", pos)?;
        let max_bucket_records = buckets.iter().map(Vec::len).max().unwrap_or(0);
        let mut scratch = vec![Slot::default(); max_bucket_records * 2];
        let mut header = CdbHeader::default();
        let mut occupied_buckets = 0;
        let mut slot_count: u64 = 0;

        for (index, entries) in buckets.iter().enumerate() {
            let offset = to_u32("table offset", pos)?;
            if entries.is_empty() {
                header.tables[index] = CdbTable { offset, slots: 0 };
                continue;
            }

            let slots = entries.len() * 2;
            let table = &mut scratch[..slots];
            table.fill(Slot::default());
            for entry in entries {
                let mut position = (entry.hash / BUCKET_COUNT as u32) as usize % slots;
                while table[position].offset != 0 {
                    position += 1;
                    if position == slots {
                        position = 0;
                    }
                }
                table[position] = *entry;
            }

            for slot in table.iter() {
                let bytes = join_u32_pair(slot.hash, slot.offset);
                buf_writer.write_all(&bytes)?;
            }

            header.tables[index] = CdbTable {
                offset,
                slots: to_u32("table slot count", slots as u64)?,
            };
            occupied_buckets += 1;
            slot_count += slots as u64;
            pos += 8 * slots as u64;
        }

        let wrapper = buf_writer.into_inner().map_err(|e| e.into_error())?;
        debug_assert_eq!(wrapper.offset, pos);
        let writer = wrapper.inner;
        writer.write_at(&header.serialize(), 0)?;
        writer.flush()?;

        let info = CdbInfo {
            file_length: pos,
            record_count,
            records_end,
            occupied_buckets,
            max_bucket_records,
            slot_count,
        };
        debug!(
            record_count,
            occupied_buckets,
            file_length = pos,
            "built constant database"
        );
        Ok(info)
    }

    /// Builds a cdb image from text records (`+klen,vlen:key->value` lines
    /// closed by a blank line) read from `input`.
    ///
    /// # Errors
    ///
    /// Malformed input yields [`Error::Format`](crate::Error::Format); the
    /// sink must then be discarded.
    pub fn build_text<W, R>(self, writer: &mut W, input: R) -> Result<CdbInfo>
    where
        W: CdbWriter + ?Sized,
        R: Read,
    {
        let input = std::io::BufReader::with_capacity(self.reader_buffer_size, input);
        self.try_build(writer, text::parse_records(input))
    }

    /// Builds the image in memory and returns its bytes.
    pub fn build_to_vec<K, V>(
        self,
        records: impl IntoIterator<Item = impl Borrow<(K, V)>>,
    ) -> Result<Vec<u8>>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut image = Cursor::new(Vec::new());
        self.build(&mut image, records)?;
        Ok(image.into_inner())
    }
}

/// Thin adapter implementing [`std::io::Write`] in terms of [`CdbWriter`].
///
/// Each write lands at the next consecutive offset, starting right after the
/// reserved header area.
struct CdbWriterWrapper<'a, W: CdbWriter + ?Sized> {
    inner: &'a mut W,
    offset: u64,
}

impl<W: CdbWriter + ?Sized> Write for CdbWriterWrapper<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write_at(buf, self.offset)?;
        self.offset += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
