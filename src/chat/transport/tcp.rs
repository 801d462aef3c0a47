//! TCP transport for chat connections.

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream, ToSocketAddrs};

use crate::chat::error::ChatError;
use crate::chat::transport::{StreamReader, StreamWriter};

/// An established TCP connection, before it is split between workers.
pub struct TcpConnection {
    stream: TcpStream,
    peer_addr: String,
}

impl TcpConnection {
    /// Create a new TCP connection from a stream.
    pub fn new(stream: TcpStream) -> Self {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self { stream, peer_addr }
    }

    /// Connect to a remote address.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ChatError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ChatError::Transport(format!("Failed to connect: {}", e)))?;
        Ok(Self::new(stream))
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Split into independently owned receive and send halves.
    pub fn into_split(self) -> (StreamReader<OwnedReadHalf>, StreamWriter<OwnedWriteHalf>) {
        let (read_half, write_half) = self.stream.into_split();
        (StreamReader::new(read_half), StreamWriter::new(write_half))
    }
}

/// TCP listener for accepting chat connections using tokio.
pub struct TcpListener {
    listener: TokioTcpListener,
}

impl TcpListener {
    /// Bind to an address and start listening.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, ChatError> {
        let listener = TokioTcpListener::bind(addr)
            .await
            .map_err(|e| ChatError::Transport(format!("Failed to bind: {}", e)))?;
        Ok(Self { listener })
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> Result<TcpConnection, ChatError> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| ChatError::Transport(format!("Failed to accept: {}", e)))?;
        Ok(TcpConnection::new(stream))
    }

    /// Get the local address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ChatError> {
        self.listener
            .local_addr()
            .map_err(|e| ChatError::Transport(format!("Failed to get local addr: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::transport::{FrameSink, FrameSource};

    #[tokio::test]
    async fn test_tcp_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let conn = TcpConnection::connect(addr).await.unwrap();
            let (mut reader, mut writer) = conn.into_split();

            writer.send(b"hello").await.unwrap();
            let response = reader.receive(64).await.unwrap().unwrap();
            assert_eq!(response, b"response");

            writer.close().await.unwrap();
        });

        let server_conn = listener.accept().await.unwrap();
        assert!(server_conn.peer_addr().starts_with("127.0.0.1:"));
        let (mut reader, mut writer) = server_conn.into_split();

        assert_eq!(reader.receive(64).await.unwrap().unwrap(), b"hello");
        writer.send(b"response").await.unwrap();

        client_task.await.unwrap();
        assert!(reader.receive(64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multiple_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let (_reader, mut writer) = TcpConnection::connect(addr).await.unwrap().into_split();
            for i in 0..10u8 {
                writer.send(&[i; 12]).await.unwrap();
            }
            writer.close().await.unwrap();
        });

        let (mut reader, _writer) = listener.accept().await.unwrap().into_split();
        for i in 0..10u8 {
            assert_eq!(reader.receive(64).await.unwrap().unwrap(), vec![i; 12]);
        }
        assert!(reader.receive(64).await.unwrap().is_none());

        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpConnection::connect(addr).await.err().unwrap();
        assert!(matches!(err, ChatError::Transport(_)));
    }
}
