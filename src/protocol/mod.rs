//! Bulletin board wire protocol.
//!
//! The client sends a request and half-closes its side of the connection.
//! The server answers with a status line followed, on success, by any number
//! of file records. The records end when the server closes the connection.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  user=<user>\n
//!           img=<url>\n          (optional)
//!           <message>
//!
//! Response: status=<int>\n
//!           file=<name>\n        ┐
//!           len=<uint>\n         │ repeated until end-of-stream
//!           <len raw bytes>      ┘
//! ```
//!
//! `\n` is never escaped, so no field may contain it.

pub mod parser;
pub mod request;

/// Field terminator for every line-delimited field.
pub const TERMINATOR: u8 = b'\n';

/// Prefix of the response status field.
pub const STATUS_PREFIX: &[u8] = b"status=";

/// Prefix of a record's filename field.
pub const FILE_PREFIX: &[u8] = b"file=";

/// Prefix of a record's length field.
pub const LEN_PREFIX: &[u8] = b"len=";

/// Prefix of the request's user field.
pub const USER_PREFIX: &[u8] = b"user=";

/// Prefix of the request's optional image field.
pub const IMAGE_PREFIX: &[u8] = b"img=";
