//! Text interchange format used to feed construction and to dump images.
//!
//! Each record is one line of the form `+klen,vlen:key->value\n`, where the
//! lengths are decimal byte counts; the record list ends with a blank line.
//! Keys and values are arbitrary bytes, so they may themselves contain `->`
//! or newlines.

use std::io::{BufRead, ErrorKind, Read, Write};

use tracing::debug;

use crate::meta::split_u32_pair;
use crate::{CdbBuilder, CdbHeader, CdbInfo, CdbWriter, Error, HEADER_SIZE, Result};

/// Iterator over records parsed from text input.
///
/// Yields `(key, value)` pairs until the terminating blank line. Stops after
/// the first error; input after the terminator is left unread.
#[derive(Debug)]
pub struct TextRecords<R> {
    reader: R,
    done: bool,
}

/// Parses text records from `reader`.
pub fn parse_records<R: BufRead>(reader: R) -> TextRecords<R> {
    TextRecords {
        reader,
        done: false,
    }
}

impl<R: BufRead> TextRecords<R> {
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_record(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.read_byte()? {
            b'\n' => return Ok(None),
            b'+' => {}
            other => {
                return Err(Error::format(format!(
                    "expected '+' or end of records, found {:?}",
                    other as char
                )));
            }
        }
        let key_len = self.read_len(b',')?;
        let value_len = self.read_len(b':')?;
        let key = self.read_bytes(key_len)?;
        self.expect(b'-')?;
        self.expect(b'>')?;
        let value = self.read_bytes(value_len)?;
        self.expect(b'\n')?;
        Ok(Some((key, value)))
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8];
        match self.reader.read_exact(&mut byte) {
            Ok(()) => Ok(byte[0]),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(Error::format("unexpected end of input"))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        let found = self.read_byte()?;
        if found != expected {
            return Err(Error::format(format!(
                "expected {:?}, found {:?}",
                expected as char, found as char
            )));
        }
        Ok(())
    }

    /// Reads a decimal length terminated by `delim`.
    fn read_len(&mut self, delim: u8) -> Result<u32> {
        let mut value: u64 = 0;
        let mut digits = 0;
        loop {
            let byte = self.read_byte()?;
            match byte {
                b'0'..=b'9' => {
                    value = value * 10 + u64::from(byte - b'0');
                    if value > u64::from(u32::MAX) {
                        return Err(Error::OutOfRange {
                            what: "length field",
                            value,
                        });
                    }
                    digits += 1;
                }
                _ if byte == delim && digits > 0 => return Ok(value as u32),
                _ => {
                    return Err(Error::format(format!(
                        "invalid length field: unexpected {:?}",
                        byte as char
                    )));
                }
            }
        }
    }

    fn read_bytes(&mut self, len: u32) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        (&mut self.reader)
            .take(u64::from(len))
            .read_to_end(&mut data)?;
        if data.len() != len as usize {
            return Err(Error::format("unexpected end of input"));
        }
        Ok(data)
    }
}

impl<R: BufRead> Iterator for TextRecords<R> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Writes one record line.
pub fn write_record<W>(writer: &mut W, key: &[u8], value: &[u8]) -> Result<()>
where
    W: Write + ?Sized,
{
    write!(writer, "+{},{}:", key.len(), value.len())?;
    writer.write_all(key)?;
    writer.write_all(b"->")?;
    writer.write_all(value)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Writes the blank line that closes a record list.
pub fn write_end<W: Write + ?Sized>(writer: &mut W) -> Result<()> {
    writer.write_all(b"\n")?;
    Ok(())
}

/// Builds a cdb image into `writer` from text records read from `input`,
/// using the default [`CdbBuilder`] settings.
///
/// # Examples
///
/// ```
/// use cdb::{Cdb, text};
///
/// # fn main() -> cdb::Result<()> {
/// let mut image = std::io::Cursor::new(Vec::new());
/// text::make(&mut image, &b"+3,5:one->Hello\n+3,7:one->, world\n\n"[..])?;
///
/// let db = Cdb::open(image.into_inner())?;
/// assert_eq!(db.get_nth("one", 1)?, Some(b", world".to_vec()));
/// # Ok(())
/// # }
/// ```
pub fn make<W, R>(writer: &mut W, input: R) -> Result<CdbInfo>
where
    W: CdbWriter + ?Sized,
    R: Read,
{
    CdbBuilder::default().build_text(writer, input)
}

/// Writes every record of the image read sequentially from `source` to
/// `output` as text, in insertion order, followed by the closing blank line.
/// Returns the number of records written.
///
/// Only the header and the records region are read, one record at a time,
/// so `source` may be a pipe. Keys and values are copied straight through
/// without being buffered whole.
pub fn dump<R, W>(mut source: R, output: &mut W) -> Result<u64>
where
    R: Read,
    W: Write + ?Sized,
{
    let mut header = [0u8; HEADER_SIZE];
    source.read_exact(&mut header)?;
    let header = CdbHeader::deserialize(&header)
        .ok_or_else(|| Error::corrupt("truncated header"))?;
    let end = u64::from(header.records_end());
    if end < HEADER_SIZE as u64 {
        return Err(Error::corrupt(format!(
            "records region ends at {end} inside the header"
        )));
    }

    let mut records = source.take(end - HEADER_SIZE as u64);
    let mut count = 0;
    while records.limit() > 0 {
        let offset = end - records.limit();
        if records.limit() < 8 {
            return Err(Error::corrupt(format!("short record at {offset}")));
        }
        let mut lens = [0u8; 8];
        records.read_exact(&mut lens)?;
        let (key_len, value_len) = split_u32_pair(&lens);
        if u64::from(key_len) + u64::from(value_len) > records.limit() {
            return Err(Error::corrupt(format!(
                "record at {offset} overruns the records region ending at {end}"
            )));
        }

        write!(output, "+{key_len},{value_len}:")?;
        copy_exact(&mut records, output, key_len)?;
        output.write_all(b"->")?;
        copy_exact(&mut records, output, value_len)?;
        output.write_all(b"\n")?;
        count += 1;
    }
    write_end(output)?;
    output.flush()?;
    debug!(records = count, "dumped constant database");
    Ok(count)
}

fn copy_exact<R, W>(reader: &mut R, writer: &mut W, len: u32) -> Result<()>
where
    R: Read,
    W: Write + ?Sized,
{
    let copied = std::io::copy(&mut reader.take(u64::from(len)), writer)?;
    if copied != u64::from(len) {
        return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cdb;

    const RECORDS: [(&str, &[&str]); 3] = [
        ("one", &["1"]),
        ("two", &["2", "22"]),
        ("three", &["3", "33", "333"]),
    ];

    fn text_data() -> Vec<u8> {
        let mut data = Vec::new();
        for (key, values) in RECORDS {
            for value in values {
                write_record(&mut data, key.as_bytes(), value.as_bytes()).unwrap();
            }
        }
        write_end(&mut data).unwrap();
        data
    }

    fn make_image(input: &[u8]) -> Result<Vec<u8>> {
        let mut image = std::io::Cursor::new(Vec::new());
        make(&mut image, input)?;
        Ok(image.into_inner())
    }

    fn parse_all(input: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        parse_records(input).collect()
    }

    #[test]
    fn test_text_layout() {
        let data = text_data();
        let head = b"+3,1:one->1\n+3,1:two->2\n+3,2:two->22\n";
        assert!(data.starts_with(head));
        assert!(data.ends_with(b"+5,3:three->333\n\n"));
    }

    #[test]
    fn test_make_and_get() {
        let db = Cdb::open(make_image(&text_data()).unwrap()).unwrap();
        for (key, values) in RECORDS {
            for (skip, value) in values.iter().enumerate() {
                let expected = value.as_bytes().to_vec();
                assert_eq!(db.get_nth(key, skip).unwrap(), Some(expected));
            }
            assert_eq!(db.get_nth(key, values.len()).unwrap(), None);
        }
        assert_eq!(db.get("does not exist").unwrap(), None);
    }

    #[test]
    fn test_dump_round_trip() {
        let data = text_data();
        let image = make_image(&data).unwrap();
        let mut output = Vec::new();
        assert_eq!(dump(image.as_slice(), &mut output).unwrap(), 6);
        assert_eq!(output, data);

        // binary-safe keys and values survive as well
        let mut data = Vec::new();
        write_record(&mut data, b"a->b\n", b"\0\xff\n->").unwrap();
        write_record(&mut data, b"", b"").unwrap();
        write_end(&mut data).unwrap();
        let image = make_image(&data).unwrap();
        let mut output = Vec::new();
        dump(image.as_slice(), &mut output).unwrap();
        assert_eq!(output, data);
        let db = Cdb::open(image).unwrap();
        assert_eq!(db.get(b"a->b\n").unwrap(), Some(b"\0\xff\n->".to_vec()));
    }

    /// Sequential source handing out at most three bytes per read.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.0.len()).min(3);
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_dump_from_stream() {
        let data = text_data();
        let image = make_image(&data).unwrap();
        let mut output = Vec::new();
        assert_eq!(dump(Trickle(&image), &mut output).unwrap(), 6);
        assert_eq!(output, data);

        // the hash tables after the records region are never needed
        let db = Cdb::open(image.as_slice()).unwrap();
        let end = db.header().records_end() as usize;
        let mut output = Vec::new();
        dump(Trickle(&image[..end]), &mut output).unwrap();
        assert_eq!(output, data);

        // a stream cut inside a record or the header fails
        let cut = &image[..end - 1];
        let err = dump(Trickle(cut), &mut Vec::new()).unwrap_err();
        assert!(err.is_unexpected_eof());
        let err = dump(Trickle(&image[..100]), &mut Vec::new()).unwrap_err();
        assert!(err.is_unexpected_eof());
    }

    #[test]
    fn test_dump_corrupt_region() {
        let mut image = make_image(b"+1,1:a->b\n\n").unwrap();
        // value length running past the records region
        image[2052..2056].copy_from_slice(&7u32.to_le_bytes());
        let err = dump(image.as_slice(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));

        // records region ending inside the header
        image[0..4].copy_from_slice(&16u32.to_le_bytes());
        let err = dump(image.as_slice(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_empty_input() {
        // trailing input after the terminator is ignored
        let image = make_image(b"\n\n").unwrap();
        assert_eq!(image.len(), HEADER_SIZE);
        let db = Cdb::open(image.as_slice()).unwrap();
        for table in db.header().tables {
            assert_eq!(table.offset, 2048);
            assert_eq!(table.slots, 0);
        }
        assert_eq!(db.get("does not exist").unwrap(), None);

        let mut output = Vec::new();
        assert_eq!(dump(image.as_slice(), &mut output).unwrap(), 0);
        assert_eq!(output, b"\n");
    }

    #[test]
    fn test_stops_at_terminator() {
        let input = b"+1,1:a->b\n\nleftover";
        let mut records = parse_records(&input[..]);
        let record = records.next().unwrap().unwrap();
        assert_eq!(record, (b"a".to_vec(), b"b".to_vec()));
        assert!(records.next().is_none());
        assert!(records.next().is_none());
        assert_eq!(records.into_inner(), b"leftover");
    }

    #[test]
    fn test_format_errors() {
        let cases: [&[u8]; 13] = [
            b"",
            b"x1,1:a->b\n\n",
            b"+1,1:a->b\n",
            b"+,1:a->b\n\n",
            b"+1,:a->b\n\n",
            b"+1a,1:a->b\n\n",
            b"+-1,1:a->b\n\n",
            b"+1;1:a->b\n\n",
            b"+1,1:a=>b\n\n",
            b"+1,1:a-}b\n\n",
            b"+1,1:a->bc\n\n",
            b"+2,1:a->b\n\n",
            b"+1,5:a->b\n\n",
        ];
        for input in cases {
            let err = parse_all(input).unwrap_err();
            let shown = String::from_utf8_lossy(input);
            assert!(err.is_format(), "{shown:?}: {err}");
            assert!(make_image(input).unwrap_err().is_format());
        }
    }

    #[test]
    fn test_out_of_range_length() {
        let err = parse_all(b"+4294967296,1:a->b\n\n").unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfRange {
                value: 4_294_967_296,
                ..
            }
        ));

        // the largest representable length parses; the data is just missing
        let err = parse_all(b"+4294967295,0:a->\n\n").unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_first_error_stops_iteration() {
        let mut records = parse_records(&b"+1,1:a->b\n?garbage"[..]);
        assert!(records.next().unwrap().is_ok());
        assert!(records.next().unwrap().is_err());
        assert!(records.next().is_none());
    }

    #[test]
    fn test_leading_zeros() {
        let records = parse_all(b"+01,002:a->bc\n\n").unwrap();
        assert_eq!(records, vec![(b"a".to_vec(), b"bc".to_vec())]);
    }
}
