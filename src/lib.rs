//! bulletin-board: a client for a simple bulletin board service
//!
//! The client posts a message (user, optional image URL, text) over TCP and
//! receives a status code followed by the pages the server rendered, which
//! are stored as files in the output directory.
//!
//! Features:
//! - Streaming response decoder independent of read boundaries
//! - Received files validated to stay inside the output directory
//! - Partial files removed when a response is cut short
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod error;
pub mod protocol;
pub mod runtime;

pub use error::{ClientError, DecodeError};
pub use runtime::{decode_response, DecodeContext, Decoder, ResponseOutcome};
