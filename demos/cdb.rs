use cdb::{Cdb, CdbBuilder, CdbReader, copy_nth_value, text};
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error, ErrorKind, Read, Result, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Make(args) => run_make(args),
        Command::Dump(args) => run_dump(args),
        Command::Get(args) => run_get(args),
        Command::Info(args) => run_info(args),
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "cdb utility for creating, dumping, and querying constant databases",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a cdb file from `+klen,vlen:key->value` records on stdin
    Make(MakeArgs),
    /// Print all records of a cdb file in the text record format
    Dump(DumpArgs),
    /// Print one value stored under a key
    Get(GetArgs),
    /// Inspect a cdb file and print basic information as JSON
    Info(InfoArgs),
}

#[derive(clap::Args)]
struct MakeArgs {
    /// Path of the cdb file to produce; replaced atomically on success
    #[arg(value_name = "FILE")]
    output: PathBuf,

    /// Temporary file to build into before renaming over FILE
    #[arg(value_name = "TMP")]
    tmp: Option<PathBuf>,

    /// Optional override for writer buffer size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = 64 << 10)]
    buffer_size: usize,
}

#[derive(clap::Args)]
struct DumpArgs {
    /// Path to the cdb file; streamed from stdin when omitted
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,
}

#[derive(clap::Args)]
struct GetArgs {
    /// Key to look up, taken as raw bytes
    key: OsString,

    /// Number of earlier values of the key to skip
    #[arg(default_value_t = 0)]
    skip: usize,

    /// Path to the cdb file; read from stdin when omitted
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,
}

#[derive(clap::Args)]
struct InfoArgs {
    /// Path to the cdb file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Optional bucket index to inspect
    #[arg(short, long)]
    bucket: Option<usize>,
}

fn run_make(args: MakeArgs) -> Result<()> {
    let builder = CdbBuilder::default()
        .with_writer_buffer_size(args.buffer_size);
    let input = std::io::stdin().lock();

    let info = match args.tmp {
        Some(tmp) => {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            let info = builder.build_text(&mut file, input)?;
            file.sync_all()?;
            drop(file);
            std::fs::rename(&tmp, &args.output)?;
            info
        }
        None => {
            let dir = args
                .output
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            let info = builder.build_text(tmp.as_file_mut(), input)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&args.output).map_err(|e| e.error)?;
            info
        }
    };

    print_json(&info)
}

fn run_dump(args: DumpArgs) -> Result<()> {
    let mut out = BufWriter::new(std::io::stdout().lock());
    match args.input {
        Some(path) => text::dump(BufReader::new(File::open(path)?), &mut out)?,
        None => text::dump(std::io::stdin().lock(), &mut out)?,
    };
    Ok(())
}

fn run_get(args: GetArgs) -> Result<()> {
    let key = args.key.as_encoded_bytes();
    match args.file {
        Some(path) => get_value(File::open(path)?, key, args.skip),
        None => match stdin_file()? {
            Some(file) => get_value(file, key, args.skip),
            None => get_value(read_stdin()?, key, args.skip),
        },
    }
}

fn get_value<R: CdbReader>(reader: R, key: &[u8], skip: usize) -> Result<()> {
    let db = Cdb::open(reader)?;
    let mut out = std::io::stdout().lock();
    copy_nth_value(&mut out, &db, key, skip)?;
    out.flush()
}

fn run_info(args: InfoArgs) -> Result<()> {
    let file = File::open(&args.input)?;
    let file_length = file.metadata()?.len();
    let db = Cdb::open(file)?;
    let header = db.header();

    let mut record_count = 0u64;
    for record in db.records() {
        record?;
        record_count += 1;
    }
    let occupied = header.tables.iter().filter(|t| !t.is_empty()).count();
    let slots: u64 = header.tables.iter().map(|t| u64::from(t.slots)).sum();
    print_json(&serde_json::json!({
        "file_length": file_length,
        "record_count": record_count,
        "records_end": header.records_end(),
        "occupied_buckets": occupied,
        "slot_count": slots,
    }))?;

    if let Some(bucket) = args.bucket {
        let Some(table) = header.tables.get(bucket) else {
            let message = format!("bucket {bucket} out of range >= {}", cdb::BUCKET_COUNT);
            return Err(Error::new(ErrorKind::InvalidInput, message));
        };
        println!("Bucket {} table:", bucket);
        print_json(table)?;
    }

    Ok(())
}

/// Returns stdin as a file when it is redirected from a regular file, so
/// lookups read it in place instead of buffering the whole image.
#[cfg(unix)]
fn stdin_file() -> Result<Option<File>> {
    use std::os::fd::AsFd;

    let fd = std::io::stdin().as_fd().try_clone_to_owned()?;
    regular_file(File::from(fd))
}

#[cfg(not(unix))]
fn stdin_file() -> Result<Option<File>> {
    Ok(None)
}

#[cfg_attr(not(unix), allow(dead_code))]
fn regular_file(file: File) -> Result<Option<File>> {
    Ok(file.metadata()?.is_file().then_some(file))
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut data = Vec::new();
    std::io::stdin().lock().read_to_end(&mut data)?;
    Ok(data)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::other(format!("Failed to format JSON: {e}")))?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.cdb");
        std::fs::write(&path, b"data").unwrap();
        let file = File::open(&path).unwrap();
        assert!(regular_file(file).unwrap().is_some());

        #[cfg(unix)]
        {
            let null = File::open("/dev/null").unwrap();
            assert!(regular_file(null).unwrap().is_none());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_get_raw_key() {
        use std::os::unix::ffi::OsStringExt;

        let key = OsString::from_vec(vec![b'k', 0xff, 0x00]);
        let args = [OsString::from("cdb"), OsString::from("get"), key];
        let cli = Cli::try_parse_from(args).unwrap();
        let Command::Get(args) = cli.command else {
            panic!("expected get");
        };
        assert_eq!(args.key.as_encoded_bytes(), b"k\xff\0");
        assert_eq!(args.skip, 0);

        let records = [(&b"k\xff\0"[..], &b"raw"[..])];
        let image = CdbBuilder::default().build_to_vec(records.iter()).unwrap();
        let db = Cdb::open(image).unwrap();
        let mut out = Vec::new();
        copy_nth_value(&mut out, &db, args.key.as_encoded_bytes(), 0).unwrap();
        assert_eq!(out, b"raw");
    }
}
