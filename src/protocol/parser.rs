//! Response field parser.
//!
//! Every response field is a prefix, a value and a terminator. The functions
//! here look at the unconsumed window of the frame buffer and either decode
//! one field, ask for more data, or report a protocol violation. They never
//! consume anything themselves: a `Complete` result carries the number of
//! bytes the caller should discard.

use super::{FILE_PREFIX, LEN_PREFIX, STATUS_PREFIX, TERMINATOR};
use crate::error::DecodeError;
use std::ffi::{OsStr, OsString};
use std::num::IntErrorKind;
use std::os::unix::ffi::OsStrExt;

/// Result of scanning for a field terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// Terminator at this offset; the field is `[start, offset)`.
    Found(usize),
    /// No terminator yet, but more bytes may still arrive.
    NotFoundYet,
    /// No terminator and none can ever arrive.
    Malformed,
    /// The terminator is the very first byte at `start`.
    EmptyField,
}

/// Why a prefixed field could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    /// The field does not start with the expected prefix.
    WrongPrefix,
    /// The buffer is full and holds no terminator.
    Unterminated,
    /// Prefix directly followed by the terminator.
    Empty,
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult<T> {
    /// Successfully parsed value with bytes consumed (terminator included).
    Complete(T, usize),
    /// Need more data.
    Incomplete,
    /// Protocol violation.
    Error(DecodeError),
}

/// Scan `window` from `start` for the field terminator.
///
/// `full` tells whether the window can still grow: it is set when the frame
/// buffer is at capacity or the stream has ended.
pub fn find_field(window: &[u8], start: usize, full: bool) -> Scan {
    match window[start..].iter().position(|&b| b == TERMINATOR) {
        Some(0) => Scan::EmptyField,
        Some(pos) => Scan::Found(start + pos),
        None if full => Scan::Malformed,
        None => Scan::NotFoundYet,
    }
}

/// Read one `<prefix><value>\n` field from the start of `window`.
///
/// Returns the value (without prefix and terminator) and the total length of
/// the field.
pub fn parse_field<'a>(
    window: &'a [u8],
    full: bool,
    prefix: &[u8],
) -> Result<Option<(&'a [u8], usize)>, FieldError> {
    // Reject a wrong prefix as soon as the first differing byte arrives.
    let have = window.len().min(prefix.len());
    if window[..have] != prefix[..have] {
        return Err(FieldError::WrongPrefix);
    }
    if window.len() < prefix.len() {
        return if full {
            Err(FieldError::Unterminated)
        } else {
            Ok(None)
        };
    }

    match find_field(window, prefix.len(), full) {
        Scan::Found(end) => Ok(Some((&window[prefix.len()..end], end + 1))),
        Scan::NotFoundYet => Ok(None),
        Scan::Malformed => Err(FieldError::Unterminated),
        Scan::EmptyField => Err(FieldError::Empty),
    }
}

/// Decode the `status=<int>` field.
pub fn parse_status(window: &[u8], full: bool) -> ParseResult<i32> {
    let (value, consumed) = match parse_field(window, full, STATUS_PREFIX) {
        Ok(Some(field)) => field,
        Ok(None) => return ParseResult::Incomplete,
        Err(e) => {
            let msg = match e {
                _ if window.is_empty() => "empty response",
                FieldError::WrongPrefix => "missing 'status=' prefix",
                FieldError::Unterminated => "unterminated status line",
                FieldError::Empty => "no digits after 'status='",
            };
            return ParseResult::Error(DecodeError::MalformedStatus(msg.to_string()));
        }
    };

    let text = match std::str::from_utf8(value) {
        Ok(s) => s,
        Err(_) => {
            return ParseResult::Error(DecodeError::MalformedStatus(
                "status is not ASCII".to_string(),
            ))
        }
    };

    match text.parse::<i32>() {
        Ok(status) => ParseResult::Complete(status, consumed),
        Err(e) => {
            let msg = match e.kind() {
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                    format!("status '{}' out of range", text)
                }
                _ => format!("status '{}' is not a decimal integer", text),
            };
            ParseResult::Error(DecodeError::MalformedStatus(msg))
        }
    }
}

/// Decode the `file=<name>` field.
///
/// The name must be usable as a single path component inside the working
/// directory: no separator, no NUL, not `.` or `..`, at most `name_max`
/// bytes. Any other bytes are kept as they are.
pub fn parse_filename(window: &[u8], full: bool, name_max: usize) -> ParseResult<OsString> {
    let (value, consumed) = match parse_field(window, full, FILE_PREFIX) {
        Ok(Some(field)) => field,
        Ok(None) => {
            // The name is already longer than any terminator could save.
            if window.len().saturating_sub(FILE_PREFIX.len()) > name_max {
                return ParseResult::Error(DecodeError::FilenameTooLong(name_max));
            }
            return ParseResult::Incomplete;
        }
        Err(FieldError::Unterminated)
            if window.len().saturating_sub(FILE_PREFIX.len()) > name_max =>
        {
            return ParseResult::Error(DecodeError::FilenameTooLong(name_max));
        }
        Err(e) => {
            let msg = match e {
                FieldError::WrongPrefix => "missing 'file=' prefix",
                FieldError::Unterminated => "unterminated filename",
                FieldError::Empty => "empty filename",
            };
            return ParseResult::Error(DecodeError::InvalidFilename(msg.to_string()));
        }
    };

    if value.len() > name_max {
        return ParseResult::Error(DecodeError::FilenameTooLong(name_max));
    }

    if value.contains(&b'/') || value.contains(&0) {
        return ParseResult::Error(DecodeError::InvalidFilename(format!(
            "'{}' is not a plain file name",
            value.escape_ascii()
        )));
    }
    if value == b"." || value == b".." {
        return ParseResult::Error(DecodeError::InvalidFilename(format!(
            "'{}' names a directory",
            value.escape_ascii()
        )));
    }

    ParseResult::Complete(OsStr::from_bytes(value).to_os_string(), consumed)
}

/// Decode the `len=<uint>` field.
pub fn parse_length(window: &[u8], full: bool) -> ParseResult<u64> {
    let (value, consumed) = match parse_field(window, full, LEN_PREFIX) {
        Ok(Some(field)) => field,
        Ok(None) => return ParseResult::Incomplete,
        Err(e) => {
            let msg = match e {
                FieldError::WrongPrefix => "missing 'len=' prefix",
                FieldError::Unterminated => "unterminated length",
                FieldError::Empty => "no digits after 'len='",
            };
            return ParseResult::Error(DecodeError::InvalidLength(msg.to_string()));
        }
    };

    let text = match std::str::from_utf8(value) {
        Ok(s) => s,
        Err(_) => {
            return ParseResult::Error(DecodeError::InvalidLength(
                "length is not ASCII".to_string(),
            ))
        }
    };

    if text.starts_with('-') {
        return ParseResult::Error(DecodeError::InvalidLength(format!(
            "negative length '{}'",
            text
        )));
    }

    match text.parse::<u64>() {
        Ok(length) => ParseResult::Complete(length, consumed),
        Err(_) => ParseResult::Error(DecodeError::InvalidLength(format!(
            "'{}' is not a decimal length",
            text
        ))),
    }
}
