use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::limits::MAX_WAL_RECORD_LEN;
use crate::model::Event;

const HEADER_LEN: usize = 4;
const CRC_LEN: usize = 4;

fn invalid_data(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn write_record(out: &mut impl Write, events: &[Event]) -> io::Result<()> {
    let payload = bincode::serialize(events).map_err(invalid_data)?;
    if payload.len() > MAX_WAL_RECORD_LEN {
        return Err(invalid_data("transaction too large"));
    }
    let len = u32::try_from(payload.len()).map_err(|_| invalid_data("transaction too large"))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.write_all(&frame)
}

/// Fill `buf`, or report a clean end of input with `false`.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read the next intact transaction and its size on disk. `None` at end of
/// log, and also at the first torn or corrupt record: nothing after it is
/// trusted. `remaining` is the number of unread bytes in the file.
fn read_record(
    reader: &mut impl Read,
    remaining: u64,
    path: &Path,
) -> io::Result<Option<(Vec<Event>, u64)>> {
    let mut header = [0u8; HEADER_LEN];
    if !fill(reader, &mut header)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(header) as usize;
    let size = (HEADER_LEN + len + CRC_LEN) as u64;
    if len > MAX_WAL_RECORD_LEN {
        warn!(path = %path.display(), len, "record length out of range, stopping replay");
        return Ok(None);
    }
    if size > remaining {
        warn!(path = %path.display(), "torn record at end of log");
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    let mut crc = [0u8; CRC_LEN];
    if !fill(reader, &mut payload)? || !fill(reader, &mut crc)? {
        warn!(path = %path.display(), "torn record at end of log");
        return Ok(None);
    }
    if u32::from_le_bytes(crc) != crc32fast::hash(&payload) {
        warn!(path = %path.display(), "record failed CRC check, stopping replay");
        return Ok(None);
    }
    match bincode::deserialize(&payload) {
        Ok(events) => Ok(Some((events, size))),
        Err(e) => {
            warn!(path = %path.display(), "undecodable record, stopping replay: {e}");
            Ok(None)
        }
    }
}

/// Events of every intact record in commit order, and the byte length of
/// the intact prefix. A missing file is an empty log.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut intact = 0u64;
    while let Some((record, size)) = read_record(&mut reader, file_len - intact, path)? {
        events.extend(record);
        intact += size;
    }
    Ok((events, intact))
}

/// Append-only write-ahead log of committed room transactions.
///
/// Each record is `[u32 len][bincode Vec<Event>][u32 crc32]`, little endian,
/// and holds every event of one transaction, so a booking and its
/// reservations become durable together. Every append is fsynced.
pub struct Wal {
    out: BufWriter<File>,
    path: PathBuf,
    since_compact: u64,
}

impl Wal {
    /// Replay the log at `path` and open it for appending.
    ///
    /// Anything after the last intact record is cut off first, so new
    /// commits never land behind a torn or corrupt record.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, intact) = scan(path)?;
        let out = Self::append_handle(path)?;
        let file_len = out.metadata()?.len();
        if file_len > intact {
            warn!(
                path = %path.display(),
                dropped_bytes = file_len - intact,
                "truncating log after last intact record"
            );
            out.set_len(intact)?;
            out.sync_all()?;
        }
        let wal = Self {
            out: BufWriter::new(out),
            path: path.to_path_buf(),
            since_compact: 0,
        };
        Ok((wal, events))
    }

    fn append_handle(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn snapshot_path(&self) -> PathBuf {
        self.path.with_extension("wal.tmp")
    }

    pub fn append(&mut self, events: &[Event]) -> io::Result<()> {
        write_record(&mut self.out, events)?;
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        self.since_compact += 1;
        Ok(())
    }

    /// Replace the log with `snapshot`, one record per entry. The snapshot is
    /// written and fsynced beside the log, then renamed over it.
    pub fn compact(&mut self, snapshot: &[Vec<Event>]) -> io::Result<()> {
        let tmp = self.snapshot_path();
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for events in snapshot {
                write_record(&mut out, events)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.out = BufWriter::new(Self::append_handle(&self.path)?);
        info!(
            path = %self.path.display(),
            records = snapshot.len(),
            dropped = self.since_compact,
            "log compacted"
        );
        self.since_compact = 0;
        Ok(())
    }

    /// Transactions appended since open or the last compaction.
    pub fn appends_since_compact(&self) -> u64 {
        self.since_compact
    }
}
