use serde::Serialize;

use crate::{BUCKET_COUNT, HEADER_SIZE};

/// Header entry describing one bucket's hash table.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CdbTable {
    /// Absolute offset of the table within the image.
    pub offset: u32,
    /// Number of 8-byte slots in the table; zero for an empty bucket.
    pub slots: u32,
}

impl CdbTable {
    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    /// Absolute offset of slot `index` within this table.
    pub(crate) fn slot_offset(&self, index: u32) -> u64 {
        u64::from(self.offset) + 8 * u64::from(index)
    }
}

/// The fixed 2048-byte header at the front of every image: one
/// [`CdbTable`] per bucket, stored as little-endian `(offset, slots)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdbHeader {
    pub tables: [CdbTable; BUCKET_COUNT],
}

impl Default for CdbHeader {
    fn default() -> Self {
        Self {
            tables: [CdbTable::default(); BUCKET_COUNT],
        }
    }
}

impl CdbHeader {
    pub const SIZE: usize = HEADER_SIZE;

    /// Returns the table for the bucket selected by `hash`.
    pub fn table_for(&self, hash: u32) -> &CdbTable {
        &self.tables[(hash % BUCKET_COUNT as u32) as usize]
    }

    /// End of the records region, which is where table 0 starts.
    pub fn records_end(&self) -> u32 {
        self.tables[0].offset
    }

    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut data = [0u8; HEADER_SIZE];
        for (chunk, table) in data.chunks_exact_mut(8).zip(self.tables.iter()) {
            chunk[..4].copy_from_slice(&table.offset.to_le_bytes());
            chunk[4..].copy_from_slice(&table.slots.to_le_bytes());
        }
        data
    }

    /// Parses a header from its serialized form. `data` must hold at least
    /// [`HEADER_SIZE`] bytes; extra bytes are ignored.
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        let data = data.get(..HEADER_SIZE)?;
        let mut header = Self::default();
        for (chunk, table) in data.chunks_exact(8).zip(header.tables.iter_mut()) {
            let (offset, slots) = split_u32_pair(chunk);
            *table = CdbTable { offset, slots };
        }
        Some(header)
    }
}

/// Decodes a little-endian `(u32, u32)` pair from the first 8 bytes of `data`.
pub(crate) fn split_u32_pair(data: &[u8]) -> (u32, u32) {
    let mut first = [0u8; 4];
    let mut second = [0u8; 4];
    first.copy_from_slice(&data[..4]);
    second.copy_from_slice(&data[4..8]);
    (u32::from_le_bytes(first), u32::from_le_bytes(second))
}

/// Encodes a little-endian `(u32, u32)` pair.
pub(crate) fn join_u32_pair(first: u32, second: u32) -> [u8; 8] {
    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&first.to_le_bytes());
    data[4..].copy_from_slice(&second.to_le_bytes());
    data
}

/// Summary returned by [`CdbBuilder::build`](crate::CdbBuilder::build).
#[derive(Debug, Serialize, Default, Clone, PartialEq, Eq)]
pub struct CdbInfo {
    /// Final size of the generated image in bytes.
    pub file_length: u64,
    /// Number of records written, duplicates included.
    pub record_count: u64,
    /// Offset where the records region ends and the tables region starts.
    pub records_end: u32,
    /// Number of buckets holding at least one record.
    pub occupied_buckets: usize,
    /// Largest number of records sharing a bucket.
    pub max_bucket_records: usize,
    /// Total number of hash table slots across all buckets.
    pub slot_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut header = CdbHeader::default();
        header.tables[0] = CdbTable {
            offset: 2048,
            slots: 0,
        };
        header.tables[255] = CdbTable {
            offset: 0x0102_0304,
            slots: 6,
        };

        let data = header.serialize();
        assert_eq!(&data[..8], &[0, 8, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&data[2040..], &[4, 3, 2, 1, 6, 0, 0, 0]);
        assert_eq!(CdbHeader::deserialize(&data), Some(header.clone()));
        assert_eq!(header.records_end(), 2048);
        assert_eq!(header.table_for(255 + 256 * 7).slots, 6);
        assert_eq!(header.tables[255].slot_offset(2), 0x0102_0304 + 16);

        assert_eq!(CdbHeader::deserialize(&data[..HEADER_SIZE - 1]), None);
    }

    #[test]
    fn test_pair_codec() {
        let data = join_u32_pair(7, u32::MAX);
        assert_eq!(split_u32_pair(&data), (7, u32::MAX));
    }
}
