//! Chunked message framing.
//!
//! One message per exchange:
//!
//! ```text
//! kind name
//! comma-joined field keys
//! comma-joined block counts      (omitted when there are no fields)
//! value blocks, in field order
//! ```
//!
//! Every line and every block is a length-prefixed UTF-8 string (4-byte
//! big-endian length). Values are cut into blocks of at most `block_size`
//! bytes so a single string never grows unbounded and long transfers can
//! report progress.

use crate::message::{Message, MessageError};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default maximum size of one value block, in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;

/// Upper bound on any single length-prefixed string a reader will accept.
const MAX_STRING_LEN: usize = 64 * 1024 * 1024;

/// Upper bound on the value bytes of one message, across all its fields.
const MAX_MESSAGE_LEN: usize = 256 * 1024 * 1024;

/// Number of header lines counted in progress reports.
const HEADER_LINES: usize = 2;

/// Error reading or writing a framed message.
///
/// A stream failure and a garbled frame are both [`WireError::Io`]; only the
/// text tells them apart. Either way the exchange is over.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Message(#[from] MessageError),
}

fn malformed(reason: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.into())
}

/// Writer side of the framing, parameterised by block size.
#[derive(Debug, Clone, Copy)]
pub struct Framing {
    block_size: usize,
}

impl Default for Framing {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl Framing {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Write one message.
    pub async fn write<W>(&self, stream: &mut W, message: &Message) -> Result<(), WireError>
    where
        W: AsyncWrite + Unpin,
    {
        self.write_with_progress(stream, message, |_| {}).await
    }

    /// Write one message, calling `on_progress` with a percentage after the
    /// headers and after every block.
    pub async fn write_with_progress<W, F>(
        &self,
        stream: &mut W,
        message: &Message,
        mut on_progress: F,
    ) -> Result<(), WireError>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(u8),
    {
        message.validate()?;

        let fields = message.fields();
        let split: Vec<Vec<&str>> = fields
            .iter()
            .map(|(_, value)| split_blocks(value, self.block_size))
            .collect();
        let total_blocks: usize = split.iter().map(Vec::len).sum();
        let total = HEADER_LINES + total_blocks;
        let percent = |done: usize| ((done * 100) / total) as u8;

        write_string(stream, message.kind().name()).await?;
        let keys: Vec<&str> = fields.iter().map(|(key, _)| key.as_str()).collect();
        write_string(stream, &keys.join(",")).await?;
        if !keys.is_empty() {
            let counts: Vec<String> = split.iter().map(|b| b.len().to_string()).collect();
            write_string(stream, &counts.join(",")).await?;
        }
        on_progress(percent(HEADER_LINES));

        let mut done = HEADER_LINES;
        for block in split.iter().flatten() {
            write_string(stream, block).await?;
            done += 1;
            on_progress(percent(done));
        }

        stream.flush().await?;
        tracing::trace!(kind = %message.kind(), blocks = total_blocks, "message written");
        Ok(())
    }
}

/// Read one message; end of stream is an error.
pub async fn read<R>(stream: &mut R) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    read_next(stream).await?.ok_or_else(|| {
        WireError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before a message arrived",
        ))
    })
}

/// Read one message, or `None` if the peer closed the stream cleanly
/// between messages.
pub async fn read_next<R>(stream: &mut R) -> Result<Option<Message>, WireError>
where
    R: AsyncRead + Unpin,
{
    read_frame(stream, MAX_MESSAGE_LEN).await
}

/// Read one message whose values total at most `max_len` bytes.
async fn read_frame<R>(stream: &mut R, max_len: usize) -> Result<Option<Message>, WireError>
where
    R: AsyncRead + Unpin,
{
    let Some(kind) = read_string_or_eof(stream).await? else {
        return Ok(None);
    };
    let keys_line = read_string(stream).await?;
    let keys: Vec<String> = if keys_line.is_empty() {
        Vec::new()
    } else {
        keys_line.split(',').map(str::to_string).collect()
    };

    let counts: Vec<usize> = if keys.is_empty() {
        Vec::new()
    } else {
        let line = read_string(stream).await?;
        line.split(',')
            .map(|c| c.trim().parse::<usize>())
            .collect::<Result<_, _>>()
            .map_err(|_| malformed(format!("unparsable block counts: {line:?}")))?
    };
    if counts.len() != keys.len() {
        return Err(malformed(format!(
            "{} field keys but {} block counts",
            keys.len(),
            counts.len()
        ))
        .into());
    }

    let mut budget = max_len;
    let mut raw = Vec::with_capacity(keys.len());
    for (key, count) in keys.into_iter().zip(counts) {
        let mut value = String::new();
        for _ in 0..count {
            let len = stream.read_u32().await? as usize;
            if len > budget {
                return Err(malformed(format!(
                    "field {key} exceeds the {max_len}-byte message limit"
                ))
                .into());
            }
            budget -= len;
            value.push_str(&read_body(stream, len).await?);
        }
        raw.push((key, value));
    }

    let message = Message::from_raw(&kind, raw)?;
    tracing::trace!(kind = %message.kind(), "message read");
    Ok(Some(message))
}

fn split_blocks(value: &str, block_size: usize) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let mut end = block_size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        blocks.push(head);
        rest = tail;
    }
    blocks
}

async fn write_string<W>(stream: &mut W, s: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(s.len()).map_err(|_| malformed("string too long to frame"))?;
    stream.write_u32(len).await?;
    stream.write_all(s.as_bytes()).await
}

async fn read_string<R>(stream: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = stream.read_u32().await? as usize;
    read_body(stream, len).await
}

async fn read_string_or_eof<R>(stream: &mut R) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let first = stream.read(&mut prefix).await?;
    if first == 0 {
        return Ok(None);
    }
    stream.read_exact(&mut prefix[first..]).await?;
    let len = u32::from_be_bytes(prefix) as usize;
    read_body(stream, len).await.map(Some)
}

async fn read_body<R>(stream: &mut R, len: usize) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    if len > MAX_STRING_LEN {
        return Err(malformed(format!("string of {len} bytes exceeds frame limit")));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| malformed("string is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AskMonitor, AskRppConfiguration, SendClientData, SendResults};

    const SESSION: &str = "0123456789abcdef0123456789abcdef";

    async fn roundtrip(framing: Framing, message: &Message) -> Message {
        let mut buf = Vec::new();
        framing.write(&mut buf, message).await.unwrap();
        read(&mut buf.as_slice()).await.unwrap()
    }

    fn results_of(len: usize) -> Message {
        SendResults {
            session_id: SESSION.into(),
            encrypted_results: "x".repeat(len),
        }
        .into()
    }

    #[tokio::test]
    async fn values_around_block_boundaries_survive() {
        let framing = Framing::new(64);
        for len in [64, 65, 3 * 64 + 7, 1] {
            let message = results_of(len);
            assert_eq!(roundtrip(framing, &message).await, message, "len {len}");
        }
    }

    #[tokio::test]
    async fn default_block_size_boundaries() {
        let framing = Framing::default();
        for len in [DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_SIZE + 1, 3 * DEFAULT_BLOCK_SIZE + 7] {
            let message = results_of(len);
            assert_eq!(roundtrip(framing, &message).await, message);
        }
    }

    #[tokio::test]
    async fn multibyte_values_are_not_split_inside_a_character() {
        let message: Message = SendClientData {
            session_id: SESSION.into(),
            encrypted_aes_key: "é".repeat(10),
            encrypted_client_data: "日本語".repeat(7),
            encrypted_excluded_variants: "ok".into(),
            algorithm: "wss".into(),
        }
        .into();
        assert_eq!(roundtrip(Framing::new(4), &message).await, message);
        assert_eq!(roundtrip(Framing::new(1), &message).await, message);
    }

    #[tokio::test]
    async fn fieldless_message_has_no_count_line() {
        let message: Message = AskRppConfiguration {}.into();
        let mut buf = Vec::new();
        Framing::default().write(&mut buf, &message).await.unwrap();
        // kind + empty key line, nothing else
        assert_eq!(buf.len(), 4 + "AskRPPConfiguration".len() + 4);
        assert_eq!(read(&mut buf.as_slice()).await.unwrap(), message);
    }

    #[tokio::test]
    async fn progress_reaches_one_hundred() {
        let mut seen = Vec::new();
        let mut buf = Vec::new();
        Framing::new(10)
            .write_with_progress(&mut buf, &results_of(95), |p| seen.push(p))
            .await
            .unwrap();
        // sessionId: 4 blocks, encryptedResults: 10 blocks
        assert_eq!(seen.len(), 1 + 14);
        assert_eq!(seen.first(), Some(&(2 * 100 / 16)));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn several_messages_on_one_stream() {
        let framing = Framing::new(8);
        let polls: Vec<Message> = (0..3)
            .map(|_| {
                AskMonitor {
                    session_id: SESSION.into(),
                }
                .into()
            })
            .collect();
        let mut buf = Vec::new();
        for poll in &polls {
            framing.write(&mut buf, poll).await.unwrap();
        }
        let mut reader = buf.as_slice();
        for poll in &polls {
            assert_eq!(&read_next(&mut reader).await.unwrap().unwrap(), poll);
        }
        assert!(read_next(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refuses_to_write_incomplete_message() {
        let message: Message = AskMonitor {
            session_id: String::new(),
        }
        .into();
        let mut buf = Vec::new();
        let err = Framing::default().write(&mut buf, &message).await.unwrap_err();
        assert!(matches!(err, WireError::Message(MessageError::MissingField { .. })));
        assert!(buf.is_empty());
    }

    async fn frame(strings: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        for s in strings {
            write_string(&mut buf, s).await.unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn unparsable_block_counts_are_io_errors() {
        let buf = frame(&["AskMonitor", "sessionId", "two"]).await;
        let err = read(&mut buf.as_slice()).await.unwrap_err();
        assert!(matches!(err, WireError::Io(e) if e.kind() == io::ErrorKind::InvalidData));
    }

    #[tokio::test]
    async fn count_mismatch_is_io_error() {
        let buf = frame(&["AskMonitor", "sessionId", "1,1", SESSION]).await;
        let err = read(&mut buf.as_slice()).await.unwrap_err();
        assert!(matches!(err, WireError::Io(e) if e.to_string().contains("block counts")));
    }

    #[tokio::test]
    async fn unknown_kind_is_message_error() {
        let buf = frame(&["AskForPizza", "sessionId", "1", SESSION]).await;
        let err = read(&mut buf.as_slice()).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Message(MessageError::UnknownKind(k)) if k == "AskForPizza"
        ));
    }

    #[tokio::test]
    async fn missing_field_after_framing_is_message_error() {
        let buf = frame(&["AskMonitor", "sessionId", "0"]).await;
        let err = read(&mut buf.as_slice()).await.unwrap_err();
        assert!(matches!(err, WireError::Message(MessageError::MissingField { .. })));
    }

    #[tokio::test]
    async fn truncated_stream_is_io_error() {
        let mut buf = Vec::new();
        Framing::new(4).write(&mut buf, &results_of(40)).await.unwrap();
        buf.truncate(buf.len() - 3);
        let err = read(&mut buf.as_slice()).await.unwrap_err();
        assert!(matches!(err, WireError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        let err = read(&mut buf.as_slice()).await.unwrap_err();
        assert!(matches!(err, WireError::Io(e) if e.kind() == io::ErrorKind::InvalidData));
    }

    #[tokio::test]
    async fn many_small_blocks_cannot_exceed_the_message_limit() {
        let mut buf = Vec::new();
        Framing::new(4).write(&mut buf, &results_of(40)).await.unwrap();

        let err = read_frame(&mut buf.as_slice(), 16).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Io(e) if e.kind() == io::ErrorKind::InvalidData
                && e.to_string().contains("message limit")
        ));

        let fits = read_frame(&mut buf.as_slice(), 40 + SESSION.len()).await.unwrap();
        assert_eq!(fits, Some(results_of(40)));
    }
}
