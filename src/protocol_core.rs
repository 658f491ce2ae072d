//! Shared protocol logic for server and client
//!
//! Line codec, command/response vocabulary, chunk arithmetic and filename
//! validation. Nothing here touches a socket.

use crate::error::{Result, TransferError};
use crate::protocol::{command, response, LIST_DELIMITER, SEPARATOR, TERMINATOR};
use std::path::{Path, PathBuf};

/// Join fields with the separator and append the terminator.
///
/// Fails if a field contains the separator or a line break, since the
/// result could not be decoded back into the same fields.
pub fn encode(fields: &[&str]) -> Result<Vec<u8>> {
    for f in fields {
        if f.contains(SEPARATOR) {
            return Err(TransferError::Protocol(format!(
                "field {:?} contains the separator",
                f
            )));
        }
        if f.contains('\n') || f.contains('\r') {
            return Err(TransferError::Protocol(format!(
                "field {:?} contains a line break",
                f
            )));
        }
    }
    let mut out = fields.join(SEPARATOR).into_bytes();
    out.push(TERMINATOR);
    Ok(out)
}

/// Split one control line into its fields.
///
/// A trailing `\n` (and a `\r` before it) is stripped. An empty line decodes
/// to a single empty field.
pub fn decode(line: &[u8]) -> Result<Vec<String>> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = std::str::from_utf8(line)
        .map_err(|_| TransferError::Protocol("control line is not valid UTF-8".into()))?;
    Ok(text.split(SEPARATOR).map(str::to_string).collect())
}

/// Client -> server commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    /// `None` when the client sent DOWNLOAD without a filename.
    Download(Option<String>),
    Quit,
    Unknown(String),
    /// Known verb with the wrong number of fields.
    Malformed(String),
}

impl Command {
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Command::List => encode(&[command::LIST]),
            Command::Download(Some(name)) => encode(&[command::DOWNLOAD, name.as_str()]),
            Command::Download(None) => encode(&[command::DOWNLOAD]),
            Command::Quit => encode(&[command::QUIT]),
            Command::Unknown(verb) => encode(&[verb.as_str()]),
            Command::Malformed(verb) => Err(TransferError::Protocol(format!(
                "refusing to send malformed {} command",
                verb
            ))),
        }
    }

    /// Interpret decoded fields. LIST and QUIT take no argument, DOWNLOAD
    /// at most one; any other field count is `Malformed`.
    pub fn from_fields(fields: &[String]) -> Command {
        let verb = fields.first().map(|s| s.trim()).unwrap_or("");
        match (verb, fields.len()) {
            (command::LIST, 1) => Command::List,
            (command::QUIT, 1) => Command::Quit,
            (command::DOWNLOAD, 1) => Command::Download(None),
            (command::DOWNLOAD, 2) => {
                Command::Download(Some(fields[1].clone()).filter(|s| !s.is_empty()))
            }
            (command::LIST | command::QUIT | command::DOWNLOAD, _) => {
                Command::Malformed(verb.to_string())
            }
            (other, _) => Command::Unknown(other.to_string()),
        }
    }
}

/// Metadata announced by FILE_INFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub size_bytes: u64,
    pub chunk_count: u64,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size_bytes: u64, chunk_size: usize) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            chunk_count: chunk_count(size_bytes, chunk_size),
        }
    }
}

/// Server -> client responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(String),
    FileInfo(FileMetadata),
    FileNotFound(Option<String>),
    Error(String),
}

impl Response {
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Response::Ok(payload) => encode(&[response::OK, payload.as_str()]),
            Response::FileInfo(meta) => encode(&[
                response::FILE_INFO,
                meta.name.as_str(),
                meta.size_bytes.to_string().as_str(),
                meta.chunk_count.to_string().as_str(),
            ]),
            Response::FileNotFound(Some(reason)) => {
                encode(&[response::FILE_NOT_FOUND, reason.as_str()])
            }
            Response::FileNotFound(None) => encode(&[response::FILE_NOT_FOUND]),
            Response::Error(reason) => encode(&[response::ERROR, reason.as_str()]),
        }
    }

    pub fn from_fields(fields: &[String]) -> Result<Response> {
        let status = fields.first().map(String::as_str).unwrap_or("");
        let arg = |i: usize| fields.get(i).cloned();
        match status {
            response::OK => Ok(Response::Ok(arg(1).unwrap_or_default())),
            response::FILE_NOT_FOUND => Ok(Response::FileNotFound(arg(1))),
            response::ERROR => Ok(Response::Error(arg(1).unwrap_or_default())),
            response::FILE_INFO => {
                if fields.len() != 4 {
                    return Err(TransferError::Protocol(format!(
                        "FILE_INFO has {} fields, expected 4",
                        fields.len()
                    )));
                }
                let size_bytes = fields[2].parse::<u64>().map_err(|_| {
                    TransferError::Protocol(format!("bad FILE_INFO size {:?}", fields[2]))
                })?;
                let chunk_count = fields[3].parse::<u64>().map_err(|_| {
                    TransferError::Protocol(format!("bad FILE_INFO chunk count {:?}", fields[3]))
                })?;
                Ok(Response::FileInfo(FileMetadata {
                    name: fields[1].clone(),
                    size_bytes,
                    chunk_count,
                }))
            }
            other => Err(TransferError::Protocol(format!(
                "unknown response status {:?}",
                other
            ))),
        }
    }
}

/// Number of chunks needed to carry `size` bytes.
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    let c = chunk_size as u64;
    size / c + u64::from(size % c != 0)
}

/// Lengths of the chunks carrying `size` bytes, in transmission order.
///
/// All but the last are `chunk_size`; an empty file has no chunks.
pub fn chunk_lengths(size: u64, chunk_size: usize) -> impl Iterator<Item = usize> {
    let c = chunk_size as u64;
    (0..chunk_count(size, chunk_size)).map(move |i| (size - i * c).min(c) as usize)
}

/// Join listed names into the LIST payload.
pub fn join_listing<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(&LIST_DELIMITER.to_string())
}

/// Split a LIST payload. An empty payload is an empty listing.
pub fn split_listing(payload: &str) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    payload.split(LIST_DELIMITER).map(str::to_string).collect()
}

fn invalid(name: &str, reason: &'static str) -> TransferError {
    TransferError::InvalidFilename {
        name: name.to_string(),
        reason,
    }
}

/// Check that `name` is a single path segment that can travel on the wire.
pub fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(name, "empty name"));
    }
    if name == "." || name == ".." {
        return Err(invalid(name, "parent or current directory reference"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid(name, "contains a path separator"));
    }
    if name.contains('\0') {
        return Err(invalid(name, "contains NUL byte"));
    }
    if name.contains('\n') || name.contains('\r') {
        return Err(invalid(name, "contains a line break"));
    }
    if name.contains(SEPARATOR) {
        return Err(invalid(name, "contains the field separator"));
    }
    if name.contains(LIST_DELIMITER) {
        return Err(invalid(name, "contains the listing delimiter"));
    }
    // On Windows, reject ':' (ADS defense)
    #[cfg(windows)]
    if name.contains(':') {
        return Err(invalid(name, "contains colon"));
    }
    Ok(())
}

/// Resolve `name` to a direct child of `root`.
///
/// `root` must already be canonical. Existing entries are canonicalized so a
/// symlink pointing outside the root is rejected.
pub fn resolve_under_root(root: &Path, name: &str) -> Result<PathBuf> {
    validate_filename(name)?;
    let joined = root.join(name);
    if !joined.exists() {
        return Ok(joined);
    }
    let canonical = joined.canonicalize()?;
    if canonical.parent() != Some(root) {
        return Err(invalid(name, "resolves outside the served directory"));
    }
    Ok(canonical)
}

/// Create parent directory if needed
pub fn ensure_parent_exists(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
