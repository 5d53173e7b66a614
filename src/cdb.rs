use std::io::{Read, Seek, SeekFrom, Write};

use tracing::{debug, trace};

use crate::{BUCKET_COUNT, CdbHeader, CdbReader, CdbTable, Error, HEADER_SIZE, Result, checksum};

/// Immutable multi-value hash map backed by a cdb image.
///
/// A `Cdb` is created from a [`CdbReader`] (typically a file) and provides
/// lookups without loading the dataset into memory: only the 2048-byte
/// header is parsed up front. All methods take `&self`, so a single `Cdb`
/// can be shared across threads and hand out any number of independent
/// [`CdbFind`] cursors.
#[derive(Debug)]
pub struct Cdb<R: CdbReader> {
    header: CdbHeader,
    reader: R,
    copy_buffer_size: usize,
}

impl<R: CdbReader> Cdb<R> {
    /// Parses the header of the image behind `reader`.
    ///
    /// # Errors
    ///
    /// Fails with an `UnexpectedEof` IO error if the source is shorter than
    /// the header.
    pub fn open(reader: R) -> Result<Self> {
        let header = reader.read_exact_at(0, HEADER_SIZE as u64, |data| {
            CdbHeader::deserialize(data).ok_or_else(|| Error::corrupt("truncated header"))
        })?;
        debug!(
            records_end = header.records_end(),
            "opened constant database"
        );

        Ok(Cdb {
            header,
            reader,
            copy_buffer_size: 8 << 10, // 8 KiB
        })
    }

    /// Sets the chunk size used when streaming values with
    /// [`CdbValue::copy_to`].
    pub fn with_copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size.max(1);
        self
    }

    pub fn header(&self) -> &CdbHeader {
        &self.header
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Returns the first value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader fails or the probed records are out of
    /// bounds.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.get_value(key)?.map(|value| value.to_vec()).transpose()
    }

    /// Returns the first value stored under `key` as a lazy span.
    pub fn get_value(&self, key: impl AsRef<[u8]>) -> Result<Option<CdbValue<'_, R>>> {
        self.find(key).next_value()
    }

    /// Returns the value at position `n` (0-indexed) among the values stored
    /// under `key`, in insertion order.
    pub fn get_nth(&self, key: impl AsRef<[u8]>, n: usize) -> Result<Option<Vec<u8>>> {
        let mut find = self.find(key);
        for _ in 0..n {
            if find.next_value()?.is_none() {
                return Ok(None);
            }
        }
        find.next_value()?.map(|value| value.to_vec()).transpose()
    }

    /// Creates a cursor over all values stored under `key`.
    ///
    /// Values come back in the order they were inserted.
    ///
    /// # Examples
    ///
    /// ```
    /// use cdb::{Cdb, CdbBuilder};
    ///
    /// # fn main() -> cdb::Result<()> {
    /// let records = [("two", "2"), ("one", "1"), ("two", "22")];
    /// let db = Cdb::open(CdbBuilder::default().build_to_vec(records.iter())?)?;
    ///
    /// let values = db
    ///     .find("two")
    ///     .map(|value| value?.to_vec())
    ///     .collect::<cdb::Result<Vec<_>>>()?;
    /// assert_eq!(values, vec![b"2".to_vec(), b"22".to_vec()]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn find(&self, key: impl AsRef<[u8]>) -> CdbFind<'_, R> {
        let key = key.as_ref().to_vec();
        let hash = checksum(&key);
        let table = *self.header.table_for(hash);
        let start = if table.is_empty() {
            0
        } else {
            (hash / BUCKET_COUNT as u32) % table.slots
        };
        CdbFind {
            cdb: self,
            key,
            hash,
            table,
            start,
            probed: 0,
        }
    }

    /// Creates an iterator over every record in insertion order.
    ///
    /// Only the records region is read; the hash tables are not consulted.
    pub fn records(&self) -> CdbRecords<'_, R> {
        CdbRecords {
            reader: &self.reader,
            pos: HEADER_SIZE as u64,
            end: u64::from(self.header.records_end()),
        }
    }

    fn value_at(&self, offset: u64, len: u32) -> CdbValue<'_, R> {
        CdbValue {
            reader: &self.reader,
            offset,
            len,
            pos: 0,
            chunk: self.copy_buffer_size,
        }
    }
}

/// Cursor over the values stored under one key.
///
/// The cursor owns its probe state (target hash and key, bucket table, next
/// probe position), so advancing it only reads from the shared image.
/// [`reset`](Self::reset) restarts the scan from the first value.
#[derive(Debug)]
pub struct CdbFind<'a, R: CdbReader> {
    cdb: &'a Cdb<R>,
    key: Vec<u8>,
    hash: u32,
    table: CdbTable,
    start: u32,
    probed: u32,
}

impl<'a, R: CdbReader> CdbFind<'a, R> {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Restarts the cursor at the first value.
    pub fn reset(&mut self) {
        self.probed = 0;
    }

    /// Returns the next value for the key, or `None` once all have been
    /// returned.
    ///
    /// At most `slots` table entries are probed in total, so a corrupt table
    /// without empty slots cannot loop forever.
    pub fn next_value(&mut self) -> Result<Option<CdbValue<'a, R>>> {
        let slots = self.table.slots;
        while self.probed < slots {
            let index = (u64::from(self.start) + u64::from(self.probed)) % u64::from(slots);
            let index = index as u32;
            self.probed += 1;

            let (slot_hash, offset) = self
                .cdb
                .reader
                .read_u32_pair(self.table.slot_offset(index))?;
            if offset == 0 {
                // empty slot: no further records for this hash
                self.probed = slots;
                break;
            }
            if slot_hash != self.hash {
                continue;
            }
            if (offset as usize) < HEADER_SIZE {
                return Err(Error::corrupt(format!(
                    "slot {index} of table at {} points into the header: {offset}",
                    self.table.offset
                )));
            }

            let offset = u64::from(offset);
            let (key_len, value_len) = self.cdb.reader.read_u32_pair(offset)?;
            if key_len as usize != self.key.len() {
                continue;
            }
            let key = self.key.as_slice();
            let reader = &self.cdb.reader;
            let at = offset + 8;
            let matched = reader.read_exact_at(at, u64::from(key_len), |data| Ok(data == key))?;
            if matched {
                trace!(hash = self.hash, offset, probed = self.probed, "key found");
                let value_offset = offset + 8 + u64::from(key_len);
                return Ok(Some(self.cdb.value_at(value_offset, value_len)));
            }
        }

        trace!(hash = self.hash, probed = self.probed, "cdb key exhausted");
        Ok(None)
    }
}

impl<'a, R: CdbReader> Iterator for CdbFind<'a, R> {
    type Item = Result<CdbValue<'a, R>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_value() {
            Ok(value) => value.map(Ok),
            Err(e) => {
                self.probed = self.table.slots;
                Some(Err(e))
            }
        }
    }
}

/// A value inside the image, read lazily.
///
/// Implements [`Read`] and [`Seek`] within the bounds of the value, so large
/// values can be streamed without materializing them.
#[derive(Debug)]
pub struct CdbValue<'a, R: CdbReader> {
    reader: &'a R,
    offset: u64,
    len: u32,
    pos: u64,
    chunk: usize,
}

impl<R: CdbReader> CdbValue<'_, R> {
    /// Absolute offset of the value within the image.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads the whole value into memory.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity((self.len as usize).min(self.chunk.max(1 << 20)));
        self.copy_to(&mut data)?;
        Ok(data)
    }

    /// Streams the whole value to `writer`, independent of the read position,
    /// and returns the number of bytes written.
    pub fn copy_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<u64> {
        let len = u64::from(self.len);
        let mut done = 0;
        while done < len {
            let n = (len - done).min(self.chunk as u64);
            self.reader.read_exact_at(self.offset + done, n, |data| {
                writer.write_all(data)?;
                Ok(())
            })?;
            done += n;
        }
        Ok(len)
    }
}

impl<R: CdbReader> Read for CdbValue<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = u64::from(self.len).saturating_sub(self.pos);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        let at = self.offset + self.pos;
        self.reader.read_into(&mut buf[..n], at)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: CdbReader> Seek for CdbValue<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => u64::from(self.len).checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

/// Iterator over all records of an image in insertion order.
///
/// Walks the records region from the end of the header up to the start of
/// the first hash table. Stops after the first error.
#[derive(Debug)]
pub struct CdbRecords<'a, R: CdbReader> {
    reader: &'a R,
    pos: u64,
    end: u64,
}

impl<R: CdbReader> CdbRecords<'_, R> {
    fn read_record(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let (key_len, value_len) = self.reader.read_u32_pair(self.pos)?;
        let body = u64::from(key_len) + u64::from(value_len);
        if self.pos + 8 + body > self.end {
            return Err(Error::corrupt(format!(
                "record at {} overruns the records region ending at {}",
                self.pos, self.end
            )));
        }
        let record = self.reader.read_exact_at(self.pos + 8, body, |data| {
            let (key, value) = data.split_at(key_len as usize);
            Ok((key.to_vec(), value.to_vec()))
        })?;
        self.pos += 8 + body;
        Ok(record)
    }
}

impl<R: CdbReader> Iterator for CdbRecords<'_, R> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end < HEADER_SIZE as u64 && self.pos == HEADER_SIZE as u64 {
            self.pos = u64::MAX;
            return Some(Err(Error::corrupt(format!(
                "records region ends at {} inside the header",
                self.end
            ))));
        }
        if self.pos >= self.end {
            return None;
        }
        let result = self.read_record();
        if result.is_err() {
            self.pos = self.end;
        }
        Some(result)
    }
}
