//! Payload sinks for received file records.
//!
//! A `RecordSink` is opened once a record header has been decoded and takes
//! exactly the declared number of payload bytes. Dropping a sink that has not
//! been finished removes the partial file.

use crate::error::DecodeError;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A file transferred in the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Name of the file inside the working directory, as received.
    pub name: OsString,
    /// Payload length announced by the server.
    pub declared_length: u64,
    /// Payload bytes written so far.
    pub bytes_written: u64,
}

impl FileRecord {
    /// Bytes still expected.
    pub fn remaining(&self) -> u64 {
        self.declared_length - self.bytes_written
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_written == self.declared_length
    }
}

/// An open output file for one record.
#[derive(Debug)]
pub struct RecordSink {
    /// `None` once the sink has been finished.
    file: Option<File>,
    path: PathBuf,
    record: FileRecord,
}

impl RecordSink {
    /// Create or truncate `dir/name`.
    ///
    /// `name` must already be a validated single path component. A symlink
    /// at that path is not followed.
    pub fn create(dir: &Path, name: OsString, declared_length: u64) -> Result<Self, DecodeError> {
        let path = dir.join(&name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .custom_flags(libc::O_NOFOLLOW)
            .open(&path)
            .map_err(|source| sink_error(&name, source))?;

        debug!(file = %name.to_string_lossy(), length = declared_length, "Opened sink");

        Ok(Self {
            file: Some(file),
            path,
            record: FileRecord {
                name,
                declared_length,
                bytes_written: 0,
            },
        })
    }

    /// Write as much of `data` as the record still expects.
    ///
    /// Returns the number of bytes taken from `data`. A write that fails or
    /// stores fewer bytes than requested is a `SinkWriteError`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, DecodeError> {
        let want = data.len().min(usize::try_from(self.remaining()).unwrap_or(usize::MAX));
        if want == 0 {
            return Ok(0);
        }

        let file = match self.file.as_mut() {
            Some(file) => file,
            None => {
                return Err(sink_error(
                    &self.record.name,
                    io::Error::other("sink already closed"),
                ))
            }
        };

        let written = loop {
            match file.write(&data[..want]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(sink_error(&self.record.name, e)),
            }
        };

        if written != want {
            return Err(sink_error(
                &self.record.name,
                io::Error::new(
                    ErrorKind::WriteZero,
                    format!("short write: {} of {} bytes", written, want),
                ),
            ));
        }

        self.record.bytes_written += written as u64;
        Ok(written)
    }

    /// Bytes still expected for this record.
    pub fn remaining(&self) -> u64 {
        self.record.remaining()
    }

    pub fn is_complete(&self) -> bool {
        self.record.is_complete()
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Close the file of a complete record.
    pub fn finish(mut self) -> FileRecord {
        debug_assert!(self.is_complete(), "finishing incomplete record");
        // Dropping the handle closes the file.
        drop(self.file.take());
        debug!(file = %self.record.name.to_string_lossy(), length = self.record.declared_length, "Stored file");
        self.record.clone()
    }
}

fn sink_error(name: &OsStr, source: io::Error) -> DecodeError {
    DecodeError::SinkWriteError {
        name: name.to_string_lossy().into_owned(),
        source,
    }
}

impl Drop for RecordSink {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            match fs::remove_file(&self.path) {
                Ok(()) => warn!(
                    file = %self.record.name.to_string_lossy(),
                    written = self.record.bytes_written,
                    declared = self.record.declared_length,
                    "Removed incomplete file"
                ),
                Err(e) => warn!(
                    file = %self.record.name.to_string_lossy(),
                    error = %e,
                    "Failed to remove incomplete file"
                ),
            }
        }
    }
}
