use thiserror::Error;

/// Errors of the remote execution protocol, on either side of the connection.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame that is not a valid protocol message.
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The peer closed the connection mid-conversation.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("TLS error: {0}")]
    Tls(String),

    /// The peer's certificate is not on the fingerprint allow-list.
    #[error("peer certificate {0} is not allowed")]
    PeerNotAllowed(String),

    /// A bundled file path that would escape the staging directory.
    #[error("unsafe bundled file path '{0}'")]
    UnsafePath(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The server refused the submission.
    #[error("submission rejected:\n  - {}", .0.join("\n  - "))]
    Rejected(Vec<String>),

    /// The server reported an error instead of running.
    #[error("server error: {0}")]
    Server(String),
}

impl From<rustls::Error> for RemoteError {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e.to_string())
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;
