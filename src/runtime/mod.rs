//! Client runtime: one blocking request/response exchange.
//!
//! - `connection`: address resolution, connect, request send
//! - `source`: byte sources over the connection
//! - `buffer`: fixed-capacity frame buffer
//! - `sink`: output files for received records
//! - `decoder`: the response state machine

pub mod buffer;
pub mod connection;
pub mod decoder;
pub mod sink;
pub mod source;

pub use decoder::{decode_response, DecodeContext, Decoder, ResponseOutcome};

use crate::config::Config;
use crate::error::ClientError;
use crate::protocol::request::Request;
use source::ReadSource;
use tracing::debug;

/// Post the configured message and store the returned files.
pub fn run(config: &Config) -> Result<ResponseOutcome, ClientError> {
    let request = Request::new(
        &config.user,
        config.image_url.as_deref(),
        &config.message,
    )
    .encode()?;

    let mut stream = connection::connect(&config.server, config.port, config.timeout)?;
    connection::send_request(&mut stream, &request)?;

    let ctx = DecodeContext::new(&config.output_dir);
    debug!(
        output_dir = %ctx.working_dir.display(),
        name_max = ctx.name_max,
        "Reading response"
    );
    let outcome = Decoder::new(ReadSource::new(stream), ctx).run()?;
    Ok(outcome)
}

/// Process exit code for a server status.
///
/// Zero stays zero; any other status maps into `1..=255`.
pub fn exit_code_for_status(status: i32) -> u8 {
    match status {
        0 => 0,
        1..=255 => status as u8,
        _ => 1,
    }
}
