//! Constant databases: immutable, disk-resident multi-value hash maps.
//!
//! The `cdb` crate builds and queries files in the classic cdb layout. An
//! image is written once, in a single streaming pass over the input records,
//! and can then be opened by any number of readers that look keys up with
//! two-level hashing and touch only a handful of bytes per lookup. Nothing is
//! loaded into memory besides the fixed 2048-byte header.
//!
//! Layout (all integers little-endian `u32`):
//!
//! ```text
//! [0, 2048)   256 × (table_offset, slot_count)
//! [2048, R)   records: (key_len, value_len, key, value), in input order
//! [R, end)    256 open-addressed tables of (hash, record_offset) slots
//! ```
//!
//! Typical usage streams records into [`CdbBuilder`] and opens the result
//! with [`Cdb`]:
//!
//! ```
//! use cdb::{Cdb, CdbBuilder};
//!
//! # fn main() -> cdb::Result<()> {
//! let records = [("apple", "red"), ("banana", "yellow"), ("apple", "green")];
//! let image = CdbBuilder::default().build_to_vec(records.iter())?;
//!
//! let db = Cdb::open(image)?;
//! assert_eq!(db.get("banana")?, Some(b"yellow".to_vec()));
//! assert_eq!(db.get_nth("apple", 1)?, Some(b"green".to_vec()));
//! assert_eq!(db.get("cherry")?, None);
//! # Ok(())
//! # }
//! ```

/// Number of hash buckets, and of entries in the header.
pub const BUCKET_COUNT: usize = 256;

/// Size in bytes of the header at the start of every image.
pub const HEADER_SIZE: usize = BUCKET_COUNT * 8;

mod error;
pub use error::{Error, Result};

mod hasher;
pub use hasher::{CdbHasher, checksum};

mod meta;
pub use meta::{CdbHeader, CdbInfo, CdbTable};

mod reader;
pub use reader::CdbReader;

mod writer;
pub use writer::CdbWriter;

mod cdb;
pub use cdb::{Cdb, CdbFind, CdbRecords, CdbValue};

mod builder;
pub use builder::CdbBuilder;

mod query;
pub use query::copy_nth_value;

pub mod text;
