//! Wire format of the remote execution protocol.
//!
//! Every message is one frame: a 4-byte big-endian length followed by a JSON
//! document. A session is one conversation:
//!
//! ```text
//! client                          server
//!   EXECUTE {document, files} ──▶
//!                             ◀── ACCEPTED {run_id} | REJECTED {errors}
//!                             ◀── EVENT …            (sequence order)
//!   STOP (optional)           ──▶
//!                             ◀── DONE {outcome}     (exactly once)
//! ```

use std::path::{Component, Path};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use engine::{DagDocument, Event, RunOutcome};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

use crate::error::{RemoteError, RemoteResult};

/// Largest accepted frame; bundled files travel inside `EXECUTE`.
pub const MAX_FRAME_LENGTH: usize = 256 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A file shipped with a submission, staged under the session's work dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundledFile {
    /// Relative path inside the staging directory, `/`-separated.
    pub path: String,
    /// Base64 (standard alphabet) encoded contents.
    pub contents: String,
}

impl BundledFile {
    pub fn new(path: impl Into<String>, contents: &[u8]) -> Self {
        Self {
            path: path.into(),
            contents: STANDARD.encode(contents),
        }
    }

    pub fn decode(&self) -> RemoteResult<Vec<u8>> {
        STANDARD
            .decode(&self.contents)
            .map_err(|e| RemoteError::Protocol(format!("file '{}' is not base64: {e}", self.path)))
    }

    /// Validate the path: relative, no `..`, no root or drive prefix.
    pub fn relative_path(&self) -> RemoteResult<&Path> {
        let path = Path::new(&self.path);
        let safe = !self.path.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if safe {
            Ok(path)
        } else {
            Err(RemoteError::UnsafePath(self.path.clone()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Execute {
        document: DagDocument,
        #[serde(default)]
        files: Vec<BundledFile>,
    },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Accepted { run_id: Uuid },
    Rejected { errors: Vec<String> },
    Event(Event),
    Done(RunOutcome),
    /// The session cannot continue (protocol violation, staging failure).
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Wrap a byte stream in the protocol's length-delimited framing.
pub fn framed<T>(io: T) -> Framed<T, LengthDelimitedCodec>
where
    T: AsyncRead + AsyncWrite,
{
    let codec = LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    Framed::new(io, codec)
}

pub fn encode<T: Serialize>(message: &T) -> RemoteResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> RemoteResult<T> {
    Ok(serde_json::from_slice(frame)?)
}

/// Send one message.
pub async fn send<S, T>(sink: &mut S, message: &T) -> RemoteResult<()>
where
    S: Sink<Bytes, Error = std::io::Error> + Unpin,
    T: Serialize,
{
    sink.send(encode(message)?).await?;
    Ok(())
}

/// Receive one message; `None` when the peer closed the connection cleanly.
pub async fn recv<S, T, B>(stream: &mut S) -> RemoteResult<Option<T>>
where
    S: Stream<Item = Result<B, std::io::Error>> + Unpin,
    B: AsRef<[u8]>,
    T: DeserializeOwned,
{
    match stream.next().await {
        Some(frame) => Ok(Some(decode(frame?.as_ref())?)),
        None => Ok(None),
    }
}
