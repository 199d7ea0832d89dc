use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// File magic plus one format-version byte.
const HEADER: [u8; 8] = *b"SEATWAL\x01";

/// Larger length prefixes can only come from a corrupt record.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Encode a single event to `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one framed record and its size on disk. `Ok(None)` means clean end of
/// log, or a torn / corrupt tail that must be dropped.
fn decode_event(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let size = (len + 8) as u64;
    Ok(bincode::deserialize::<Event>(&payload).ok().map(|e| (e, size)))
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_for_append(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    // New file, or a header torn during creation.
    if file.metadata()?.len() < HEADER.len() as u64 {
        file.set_len(0)?;
        (&file).write_all(&HEADER)?;
        file.sync_all()?;
    }
    Ok(file)
}

/// A log file that can be cut back to an earlier length.
trait LogFile: Write {
    fn len(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.sync_all()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Write and sync `bytes`, or leave the file exactly as long as it was.
///
/// The outer error is the failed truncation: the file may then hold part of
/// `bytes` and must not be appended to again.
fn write_or_rollback(file: &mut impl LogFile, bytes: &[u8]) -> io::Result<io::Result<()>> {
    let start = file.len()?;
    match file.write_all(bytes).and_then(|()| file.sync()) {
        Ok(()) => Ok(Ok(())),
        Err(e) => {
            file.truncate(start)?;
            Ok(Err(e))
        }
    }
}

/// Append-only assignment log.
///
/// Layout: an 8-byte header, then records of `[u32: len][bincode: Event][u32: crc32]`.
/// A truncated or corrupt last record (crash mid-write) is discarded on replay
/// and cut off by [`Wal::recover`] before anything is appended behind it.
pub struct Wal {
    file: File,
    path: PathBuf,
    appends_since_compact: u64,
    /// Set when a failed batch could not be rolled back.
    broken: bool,
}

impl Wal {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: open_for_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            broken: false,
        })
    }

    /// Replay the log, cut any torn tail, and open it for appends.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = Self::scan(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > valid_len
        {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = meta.len() - valid_len,
                "discarding torn tail of assignment log"
            );
            OpenOptions::new().write(true).open(path)?.truncate(valid_len)?;
        }
        Ok((Self::open(path)?, events))
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch(std::iter::once(event))
    }

    /// Durably append a batch with one write and one fsync. On error none of
    /// the batch is left in the file.
    pub fn append_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::other("assignment log holds a partial batch; compaction required"));
        }
        let mut bytes = Vec::new();
        let mut count = 0;
        for event in events {
            encode_event(&mut bytes, event)?;
            count += 1;
        }
        match write_or_rollback(&mut self.file, &bytes) {
            Ok(Ok(())) => {
                self.appends_since_compact += count;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a compacted log to a sibling temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        writer.write_all(&HEADER)?;
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        self.file = open_for_append(&self.path)?;
        self.appends_since_compact = 0;
        self.broken = false;
        Ok(())
    }

    /// Replay every intact record. A missing file is an empty log; a file that
    /// does not start with our header is refused.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Self::scan(path).map(|(events, _)| events)
    }

    /// Intact records plus the byte length they span, header included.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER.len()];
        if !read_full(&mut reader, &mut header)? {
            // Empty or header torn during creation.
            return Ok((Vec::new(), 0));
        }
        if header != HEADER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a seatline assignment log", path.display()),
            ));
        }

        let mut events = Vec::new();
        let mut valid_len = HEADER.len() as u64;
        while let Some((event, size)) = decode_event(&mut reader)? {
            events.push(event);
            valid_len += size;
        }
        Ok((events, valid_len))
    }
}
