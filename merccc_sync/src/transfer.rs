// Bulk file transfer over an already-open connection.
//
// Wire layout, all header fields NUL-terminated decimal/path strings:
//
//   <fileCount> { <byteLen> <relativePath> }* <totalBytes>
//   <raw file bytes, back to back, no per-file framing>
//   ← <"done"> from the receiver
//
// The sender enumerates regular files under its resource root and streams
// their bytes in header order. The receiver distributes the unframed byte
// stream across destination files with explicit bytes-remaining accounting:
// one 8 KiB buffer fill may close one file and span several more, so the
// split point inside the buffer carries over rather than restarting the
// read. Premature EOF before the announced total is an error, never a
// silent truncation.
//
// Header paths are root-relative with `/` separators. Absolute paths and
// `..` components are rejected before anything is opened.

use std::fs::{self, File};
use std::io::{self, BufRead, Write};
use std::path::{Component, Path, PathBuf};

use merccc_protocol::framing::{TRANSFER_ACK, read_cstring, write_cstring};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Size of the receiver's distribution buffer.
const CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed transfer header: {0}")]
    Header(String),
    #[error("unsafe path '{0}' in transfer header")]
    UnsafePath(String),
    #[error("announced {announced} total bytes but file sizes sum to {sum}")]
    LengthMismatch { announced: u64, sum: u64 },
    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
    #[error("expected transfer acknowledgment, got '{0}'")]
    BadAck(String),
}

/// What a completed transfer moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Send every regular file under `root` and block for the receiver's ack.
/// `None` sends a valid empty bundle (zero files, zero bytes).
pub fn send_tree<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    root: Option<&Path>,
) -> Result<TransferSummary, TransferError> {
    let mut files: Vec<(PathBuf, u64)> = Vec::new();
    if let Some(root) = root {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let len = entry.metadata().map_err(io::Error::from)?.len();
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("walkdir stays under its root")
                .to_path_buf();
            files.push((rel, len));
        }
    }

    write_cstring(writer, &files.len().to_string())?;
    let mut total: u64 = 0;
    for (rel, len) in &files {
        write_cstring(writer, &len.to_string())?;
        write_cstring(writer, &wire_path(rel))?;
        total += len;
    }
    write_cstring(writer, &total.to_string())?;

    for (rel, _) in &files {
        let root = root.expect("a non-empty file list implies a root");
        let mut file = File::open(root.join(rel))?;
        io::copy(&mut file, writer)?;
    }
    writer.flush()?;
    debug!(files = files.len(), bytes = total, "bundle sent, awaiting ack");

    let ack = read_cstring(reader)?;
    if ack != TRANSFER_ACK {
        return Err(TransferError::BadAck(ack));
    }
    Ok(TransferSummary {
        files: files.len(),
        bytes: total,
    })
}

/// Receive a bundle into `dest` and acknowledge it.
pub fn receive_tree<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    dest: &Path,
) -> Result<TransferSummary, TransferError> {
    let count: usize = header_num(read_cstring(reader)?, "file count")?;
    let mut entries: Vec<(u64, PathBuf)> = Vec::new();
    let mut sum: u64 = 0;
    for _ in 0..count {
        let len: u64 = header_num(read_cstring(reader)?, "file length")?;
        let rel = sanitize(&read_cstring(reader)?)?;
        sum = sum
            .checked_add(len)
            .ok_or_else(|| TransferError::Header("file lengths overflow".to_string()))?;
        entries.push((len, rel));
    }
    let announced: u64 = header_num(read_cstring(reader)?, "total length")?;
    if announced != sum {
        return Err(TransferError::LengthMismatch { announced, sum });
    }

    let mut buf = [0u8; CHUNK];
    let mut pending = entries.into_iter();
    let mut current: Option<(File, u64)> = None;
    let mut received: u64 = 0;
    while received < announced {
        let want = buf.len().min((announced - received) as usize);
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            return Err(TransferError::Truncated {
                expected: announced,
                received,
            });
        }
        let mut offset = 0;
        while offset < n {
            // Finished (and zero-length) files: open the next destination.
            while current.as_ref().is_none_or(|(_, left)| *left == 0) {
                let (len, rel) = pending
                    .next()
                    .expect("header byte accounting covers the stream");
                current = Some((create_dest_file(dest, &rel)?, len));
            }
            let (file, left) = current.as_mut().expect("just opened");
            let take = (n - offset).min(*left as usize);
            file.write_all(&buf[offset..offset + take])?;
            *left -= take as u64;
            offset += take;
            received += take as u64;
        }
    }

    // Trailing zero-length files carry no stream bytes but must still exist.
    for (_, rel) in pending {
        create_dest_file(dest, &rel)?;
    }

    write_cstring(writer, TRANSFER_ACK)?;
    debug!(files = count, bytes = announced, "bundle received");
    Ok(TransferSummary {
        files: count,
        bytes: announced,
    })
}

/// Root-relative path with `/` separators, regardless of host platform.
fn wire_path(rel: &Path) -> String {
    rel.iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn sanitize(raw: &str) -> Result<PathBuf, TransferError> {
    let path = Path::new(raw);
    if raw.is_empty() || path.is_absolute() {
        return Err(TransferError::UnsafePath(raw.to_string()));
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            _ => return Err(TransferError::UnsafePath(raw.to_string())),
        }
    }
    Ok(clean)
}

fn create_dest_file(dest: &Path, rel: &Path) -> io::Result<File> {
    let path = dest.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}

fn header_num<T: std::str::FromStr>(value: String, what: &str) -> Result<T, TransferError> {
    value
        .parse()
        .map_err(|_| TransferError::Header(format!("bad {what} '{value}'")))
}
