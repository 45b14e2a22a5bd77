use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Read, Seek, Write},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tempfile::NamedTempFile;

/// 4-byte magic header of the log format (version tag).
const MAGIC: &[u8; 4] = b"UMB1";

/// Operation codes written to the log.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AofOp {
    Set = 1,
    Del = 2,
}

/// How often the log buffer is flushed to disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Flush and fsync after every record.
    #[default]
    Always,
    /// Leave flushing to the buffer and the OS.
    No,
}

/// Result of reading the log back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Complete records handed to the callback.
    pub records: usize,
    /// Byte length of the valid prefix, header included.
    pub valid_len: u64,
    /// Whether an incomplete trailing record was skipped.
    pub truncated: bool,
}

/// Append-only log of set/delete records with buffered writes.
///
/// Record layout: `op:u8 | key_len:u32be | key | [val_len:u32be | val]`.
pub struct AofLog {
    writer: BufWriter<File>,
    path: PathBuf,
    policy: SyncPolicy,
}

impl AofLog {
    /// Opens or creates the log at `path`, checking or writing the header.
    pub fn open<P: AsRef<Path>>(
        path: P,
        policy: SyncPolicy,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut header = [0u8; 4];
        let n = read_up_to(&mut file, &mut header)?;
        match n {
            0 => {
                file.write_all(MAGIC)?;
                file.sync_all()?;
            }
            4 if &header == MAGIC => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "invalid log magic header",
                ))
            }
        }

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            policy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_set(
        &mut self,
        key: &[u8],
        value: &[u8],
    ) -> io::Result<()> {
        write_record(&mut self.writer, AofOp::Set, key, Some(value))?;
        self.maybe_flush()
    }

    pub fn append_del(
        &mut self,
        key: &[u8],
    ) -> io::Result<()> {
        write_record(&mut self.writer, AofOp::Del, key, None)?;
        self.maybe_flush()
    }

    /// Feeds every complete record to `f`.
    ///
    /// A record cut short at the end of the file (a crash mid-append) stops
    /// the replay without an error; anything else malformed is reported as
    /// `InvalidData`.
    pub fn replay<F>(
        &mut self,
        mut f: F,
    ) -> io::Result<ReplayOutcome>
    where
        F: FnMut(AofOp, Vec<u8>, Option<Vec<u8>>),
    {
        self.writer.flush()?;

        let mut reader = File::open(&self.path)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        if buf.len() < MAGIC.len() || &buf[..MAGIC.len()] != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad log header"));
        }

        let mut pos = MAGIC.len();
        let mut records = 0;
        let mut truncated = false;

        while pos < buf.len() {
            let start = pos;
            match read_record(&buf, &mut pos) {
                Ok((op, key, val)) => {
                    f(op, key, val);
                    records += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    pos = start;
                    truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(ReplayOutcome {
            records,
            valid_len: pos as u64,
            truncated,
        })
    }

    /// Drops everything past `len` bytes, used to discard a torn tail.
    pub fn truncate(
        &mut self,
        len: u64,
    ) -> io::Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_mut();
        file.set_len(len)?;
        file.seek(io::SeekFrom::End(0))?;
        file.sync_all()
    }

    /// Compacts the log down to one set record per live pair: writes them
    /// into a temporary file next to the log, then atomically replaces it.
    pub fn rewrite<I>(
        &mut self,
        live: I,
    ) -> io::Result<()>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        self.writer.flush()?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut out = BufWriter::new(tmp.as_file_mut());
            out.write_all(MAGIC)?;
            for (key, value) in live {
                write_record(&mut out, AofOp::Set, &key, Some(&value))?;
            }
            out.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        Ok(())
    }

    fn maybe_flush(&mut self) -> io::Result<()> {
        match self.policy {
            SyncPolicy::Always => {
                self.writer.flush()?;
                self.writer.get_ref().sync_data()
            }
            SyncPolicy::No => Ok(()),
        }
    }
}

impl Drop for AofLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

impl TryFrom<u8> for AofOp {
    type Error = io::Error;

    fn try_from(v: u8) -> io::Result<Self> {
        match v {
            1 => Ok(AofOp::Set),
            2 => Ok(AofOp::Del),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown log op: {v}"),
            )),
        }
    }
}

fn write_record<W: Write>(
    w: &mut W,
    op: AofOp,
    key: &[u8],
    value: Option<&[u8]>,
) -> io::Result<()> {
    w.write_all(&[op as u8])?;
    write_u32(w, key.len() as u32)?;
    w.write_all(key)?;
    if let Some(value) = value {
        write_u32(w, value.len() as u32)?;
        w.write_all(value)?;
    }
    Ok(())
}

fn read_record(
    buf: &[u8],
    pos: &mut usize,
) -> io::Result<(AofOp, Vec<u8>, Option<Vec<u8>>)> {
    let op = AofOp::try_from(buf[*pos])?;
    *pos += 1;

    let key = read_chunk(buf, pos)?;
    let val = match op {
        AofOp::Set => Some(read_chunk(buf, pos)?),
        AofOp::Del => None,
    };
    Ok((op, key, val))
}

fn read_chunk(
    buf: &[u8],
    pos: &mut usize,
) -> io::Result<Vec<u8>> {
    let len = read_u32(buf, pos)? as usize;
    if *pos + len > buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "record truncated",
        ));
    }
    let chunk = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(chunk)
}

#[inline]
fn write_u32<W: Write>(
    w: &mut W,
    v: u32,
) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

#[inline]
fn read_u32(
    buf: &[u8],
    pos: &mut usize,
) -> io::Result<u32> {
    if *pos + 4 > buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "unexpected EOF while reading u32",
        ));
    }
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&buf[*pos..*pos + 4]);
    *pos += 4;
    Ok(u32::from_be_bytes(arr))
}

fn read_up_to(
    file: &mut File,
    out: &mut [u8],
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < out.len() {
        match file.read(&mut out[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    fn collect(log: &mut AofLog) -> (Vec<(AofOp, Vec<u8>, Option<Vec<u8>>)>, ReplayOutcome) {
        let mut seq = Vec::new();
        let outcome = log.replay(|op, k, v| seq.push((op, k, v))).unwrap();
        (seq, outcome)
    }

    /// Set and delete records come back in order after reopening, under both
    /// sync policies.
    #[test]
    fn test_append_replay_across_reopen() {
        for policy in [SyncPolicy::Always, SyncPolicy::No] {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("bus.aof");
            {
                let mut log = AofLog::open(&path, policy).unwrap();
                log.append_set(b"prefs", b"dark").unwrap();
                log.append_del(b"prefs").unwrap();
            }

            let mut log = AofLog::open(&path, policy).unwrap();
            let (seq, outcome) = collect(&mut log);
            assert_eq!(outcome.records, 2);
            assert!(!outcome.truncated);
            assert_eq!(seq[0], (AofOp::Set, b"prefs".to_vec(), Some(b"dark".to_vec())));
            assert_eq!(seq[1], (AofOp::Del, b"prefs".to_vec(), None));
        }
    }

    /// A torn trailing record is skipped and reported, earlier records survive.
    #[test]
    fn test_replay_tolerates_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bus.aof");
        {
            let mut log = AofLog::open(&path, SyncPolicy::Always).unwrap();
            log.append_set(b"a", b"1").unwrap();
        }
        let intact = std::fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[AofOp::Set as u8, 0, 0, 0, 9, b'x']).unwrap();
        }

        let mut log = AofLog::open(&path, SyncPolicy::Always).unwrap();
        let (seq, outcome) = collect(&mut log);
        assert_eq!(seq.len(), 1);
        assert!(outcome.truncated);
        assert_eq!(outcome.valid_len, intact);

        log.truncate(outcome.valid_len).unwrap();
        log.append_set(b"b", b"2").unwrap();
        let (seq, outcome) = collect(&mut log);
        assert_eq!(seq.len(), 2);
        assert!(!outcome.truncated);
    }

    #[test]
    fn test_bad_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bus.aof");
        std::fs::write(&path, b"NOPE").unwrap();
        let err = AofLog::open(&path, SyncPolicy::Always).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    /// An unknown op code is corruption, not a torn tail.
    #[test]
    fn test_unknown_op_is_invalid_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bus.aof");
        std::fs::write(&path, [&MAGIC[..], &[7u8, 0, 0, 0, 0]].concat()).unwrap();
        let mut log = AofLog::open(&path, SyncPolicy::Always).unwrap();
        let err = log.replay(|_, _, _| {}).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    /// `rewrite()` leaves exactly one set record per live key.
    #[test]
    fn test_rewrite_compacts_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bus.aof");
        let mut log = AofLog::open(&path, SyncPolicy::Always).unwrap();
        log.append_set(b"k1", b"v1").unwrap();
        log.append_set(b"k2", b"v2").unwrap();
        log.append_set(b"k1", b"v1_new").unwrap();
        log.append_del(b"k2").unwrap();

        let mut live = HashMap::new();
        log.replay(|op, key, val| match op {
            AofOp::Set => {
                live.insert(key, val.unwrap_or_default());
            }
            AofOp::Del => {
                live.remove(&key);
            }
        })
        .unwrap();

        log.rewrite(live.clone()).unwrap();
        log.append_set(b"k3", b"v3").unwrap();
        drop(log);

        let mut log = AofLog::open(&path, SyncPolicy::Always).unwrap();
        let (seq, _) = collect(&mut log);
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0], (AofOp::Set, b"k1".to_vec(), Some(b"v1_new".to_vec())));
        assert_eq!(seq[1], (AofOp::Set, b"k3".to_vec(), Some(b"v3".to_vec())));
    }
}
