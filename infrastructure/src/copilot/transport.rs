//! Transport layer for Copilot CLI communication.
//!
//! The CLI speaks JSON-RPC 2.0 over one stream, framed LSP-style:
//!
//! ```text
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JSON>
//! ```
//!
//! - [`read_frame`] / [`write_frame`] handle the framing.
//! - [`classify_message`] tells the router's reader task how to dispatch a
//!   decoded frame.

use crate::copilot::error::{CopilotError, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Classification of an incoming JSON-RPC message.
///
/// - `Response` → oneshot correlation for pending requests
/// - `IncomingRequest` → answered by the router (`permission.request`, `tool.call`)
/// - `Notification` → session event routing or `session.start` handling
#[derive(Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// A response to a request we sent (has `id`, no `method`).
    Response,
    /// An incoming request from the CLI (has `id` + `method`).
    IncomingRequest { id: u64 },
    /// A notification (has `method`, no `id`), e.g. `session.event`.
    Notification,
}

/// Classify a JSON-RPC message by inspecting `id` and `method` fields.
pub fn classify_message(json: &serde_json::Value) -> MessageKind {
    let has_id = json.get("id").and_then(|v| v.as_u64());
    let has_method = json.get("method").and_then(|v| v.as_str());

    match (has_id, has_method) {
        (Some(id), Some(_)) => MessageKind::IncomingRequest { id },
        (Some(_), None) => MessageKind::Response,
        _ => MessageKind::Notification,
    }
}

/// Read one frame body. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, line: &mut String) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let content_length = loop {
        line.clear();
        if reader.read_line(line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(len_str) = trimmed.strip_prefix("Content-Length:")
            && let Ok(len) = len_str.trim().parse::<usize>()
        {
            break len;
        }
    };

    // Skip remaining headers up to the blank line.
    loop {
        line.clear();
        if reader.read_line(line).await? == 0 {
            return Err(CopilotError::TransportClosed);
        }
        if line.trim().is_empty() {
            break;
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one framed message and flush.
pub async fn write_frame<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
