use thiserror::Error;

/// Errors raised while talking to a streaming server.
#[derive(Error, Debug)]
pub enum Error {
    /// Connect, read or write failure on the underlying transport.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A frame on the wire does not follow the Ultravox2 layout.
    #[error("malformed frame: {0}")]
    Framing(String),

    /// The server answered, but not with what the handshake expects.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The source configuration cannot be used to connect.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Out-of-band metadata request failed.
    #[error("metadata request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn timed_out(what: &str) -> Self {
        Error::Transport(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{what} timed out"),
        ))
    }

    pub(crate) fn closed() -> Self {
        Error::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        ))
    }
}
