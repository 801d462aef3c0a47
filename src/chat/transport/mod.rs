//! Transport layer for chat connections.
//!
//! Every handshake message and chat frame travels as one length-prefixed
//! unit (`[len: u32 BE][bytes]`), so the receiver always sees whole frames.
//! The read and write directions are separate values so the send and
//! receive workers can own one each.

mod tcp;

pub use tcp::{TcpConnection, TcpListener};

use async_trait::async_trait;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};

use crate::chat::error::ChatError;

/// Size of the length prefix in front of every unit.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Outgoing half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one unit.
    async fn send(&mut self, data: &[u8]) -> Result<(), ChatError>;

    /// Flush and shut the write direction down. The peer sees end of stream.
    async fn close(&mut self) -> Result<(), ChatError>;
}

/// Incoming half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive one unit of at most `max_len` bytes.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    async fn receive(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, ChatError>;
}

/// Helper to write a length-prefixed unit asynchronously.
pub async fn write_length_prefixed<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ChatError> {
    let len = u32::try_from(data.len())
        .map_err(|_| ChatError::Transport(format!("Frame too large: {} bytes", data.len())))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Helper to read a length-prefixed unit asynchronously.
///
/// End of stream before the first prefix byte is a clean close. End of
/// stream anywhere else is an error.
pub async fn read_length_prefixed<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<Vec<u8>>, ChatError> {
    let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
    if reader.read(&mut len_bytes[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_bytes[1..]).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > max_len {
        return Err(ChatError::Transport(format!(
            "Frame too large: {} bytes (max {})",
            len, max_len
        )));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Some(data))
}

/// Buffered [`FrameSink`] over any async writer.
pub struct StreamWriter<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for StreamWriter<W> {
    async fn send(&mut self, data: &[u8]) -> Result<(), ChatError> {
        write_length_prefixed(&mut self.writer, data).await
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Buffered [`FrameSource`] over any async reader.
pub struct StreamReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send> StreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for StreamReader<R> {
    async fn receive(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, ChatError> {
        read_length_prefixed(&mut self.reader, max_len).await
    }
}

/// Splits a bidirectional stream into a frame source and sink.
pub fn split_stream<S>(stream: S) -> (StreamReader<ReadHalf<S>>, StreamWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite + Send,
{
    let (read_half, write_half) = tokio::io::split(stream);
    (StreamReader::new(read_half), StreamWriter::new(write_half))
}
