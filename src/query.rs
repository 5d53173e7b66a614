use std::io::Write;

use crate::{Cdb, CdbReader, Result};

/// Streams the value at position `skip` among those stored under `key` to
/// `dest`, returning the number of bytes written.
///
/// A key with `skip` or fewer values is not an error: nothing is written and
/// `Ok(0)` is returned. Reader and writer failures are propagated.
pub fn copy_nth_value<W, R>(
    dest: &mut W,
    cdb: &Cdb<R>,
    key: impl AsRef<[u8]>,
    skip: usize,
) -> Result<u64>
where
    W: Write + ?Sized,
    R: CdbReader,
{
    let mut find = cdb.find(key);
    for _ in 0..skip {
        if find.next_value()?.is_none() {
            return Ok(0);
        }
    }
    match find.next_value()? {
        Some(value) => value.copy_to(dest),
        None => Ok(0),
    }
}
