//! Request encoder.

use super::{IMAGE_PREFIX, TERMINATOR, USER_PREFIX};
use bytes::BytesMut;

/// A message posting for the bulletin board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub user: &'a str,
    pub image_url: Option<&'a str>,
    pub message: &'a str,
}

/// Request encoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// A terminated field contains the terminator itself.
    EmbeddedNewline(&'static str),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::EmbeddedNewline(field) => {
                write!(f, "The {} must not contain a line break", field)
            }
        }
    }
}

impl std::error::Error for RequestError {}

impl<'a> Request<'a> {
    pub fn new(user: &'a str, image_url: Option<&'a str>, message: &'a str) -> Self {
        Self {
            user,
            image_url,
            message,
        }
    }

    /// Encode the request to bytes.
    pub fn encode(&self) -> Result<BytesMut, RequestError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encode the request into an existing buffer.
    ///
    /// The message is the last field and runs until the end of the request,
    /// so it may span several lines.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), RequestError> {
        if self.user.as_bytes().contains(&TERMINATOR) {
            return Err(RequestError::EmbeddedNewline("user name"));
        }
        buf.extend_from_slice(USER_PREFIX);
        buf.extend_from_slice(self.user.as_bytes());
        buf.extend_from_slice(&[TERMINATOR]);

        if let Some(url) = self.image_url {
            if url.as_bytes().contains(&TERMINATOR) {
                return Err(RequestError::EmbeddedNewline("image URL"));
            }
            buf.extend_from_slice(IMAGE_PREFIX);
            buf.extend_from_slice(url.as_bytes());
            buf.extend_from_slice(&[TERMINATOR]);
        }

        buf.extend_from_slice(self.message.as_bytes());
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        let image = self
            .image_url
            .map_or(0, |url| IMAGE_PREFIX.len() + url.len() + 1);
        USER_PREFIX.len() + self.user.len() + 1 + image + self.message.len()
    }
}
