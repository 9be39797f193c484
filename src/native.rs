//! # Native Messaging Transport
//!
//! Request/response channel to an out-of-process native host, identified by
//! a host name, taking a single string payload and returning an asynchronous
//! string response.
//!
//! The wire format is the browser native-messaging framing: a 4-byte
//! native-endian length prefix followed by a JSON body, in both directions.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};

/// Maximum accepted inbound frame, matching the browser's limit for
/// messages sent to a native host.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Read one length-prefixed JSON message.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Value> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_ne_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Write one length-prefixed JSON message and flush.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Value,
) -> std::io::Result<()> {
    let body = serde_json::to_vec(message)?;
    let len = body.len() as u32;

    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Out-of-process collaborator reachable via a request/response channel.
#[async_trait]
pub trait NativeHost: Send + Sync {
    /// Name identifying the host, used in logs and errors.
    fn name(&self) -> &str;

    /// Send one string payload and await the host's string response.
    async fn request(&self, payload: String) -> DispatchResult<String>;
}

struct FramedChannel<R, W> {
    reader: R,
    writer: W,
}

/// [`NativeHost`] over any byte stream pair using native-messaging framing.
///
/// Requests are serialized; one request is in flight at a time, matching the
/// single stdio channel of a real native host.
pub struct FramedNativeHost<R, W> {
    name: String,
    channel: Mutex<FramedChannel<R, W>>,
}

impl<R, W> FramedNativeHost<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(name: impl Into<String>, reader: R, writer: W) -> Self {
        Self {
            name: name.into(),
            channel: Mutex::new(FramedChannel { reader, writer }),
        }
    }
}

#[async_trait]
impl<R, W> NativeHost for FramedNativeHost<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, payload: String) -> DispatchResult<String> {
        let mut channel = self.channel.lock().await;

        write_message(&mut channel.writer, &Value::String(payload))
            .await
            .map_err(|e| DispatchError::external_handoff(&self.name, e.to_string()))?;

        let response = read_message(&mut channel.reader)
            .await
            .map_err(|e| DispatchError::external_handoff(&self.name, e.to_string()))?;

        debug!(host = %self.name, "Native host responded");

        match response {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }
}
