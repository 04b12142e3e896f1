//! `identity|message` lines from the host's input stream.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// What one read from the input produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Message { identity: String, text: String },
    /// Blank, malformed or undecodable line. Already logged.
    Skipped,
    /// End of input, or the stream failed.
    Closed,
}

/// Read the next line into `buf` and decode it.
///
/// A line that is not valid UTF-8 is skipped, not fatal.
pub async fn next_inbound<R>(reader: &mut R, buf: &mut Vec<u8>) -> Inbound
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => Inbound::Closed,
        Ok(_) => parse_line(buf),
        Err(e) => {
            tracing::warn!(error = %e, "Input stream failed");
            Inbound::Closed
        }
    }
}

fn parse_line(raw: &[u8]) -> Inbound {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim_end_matches(['\n', '\r']),
        Err(e) => {
            tracing::warn!(error = %e, bytes = raw.len(), "Line is not UTF-8, skipped");
            return Inbound::Skipped;
        }
    };
    if line.trim().is_empty() {
        return Inbound::Skipped;
    }

    match line.split_once('|') {
        Some((identity, text)) => Inbound::Message {
            identity: identity.to_string(),
            text: text.to_string(),
        },
        None => {
            tracing::warn!(line = %line, "Expected identity|message, line skipped");
            Inbound::Skipped
        }
    }
}
