//! Plain TCP transport.
//!
//! # Example
//!
//! ```ignore
//! use ampwire::transport::tcp::{connect, Listener};
//!
//! let listener = Listener::bind("127.0.0.1", 7113).await?;
//! let (stream, addr) = listener.accept().await?;
//! ```

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;

/// TCP listener handing out configured streams.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// Bind to `host:port`. Port 0 picks a free port.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        tracing::debug!(addr = ?listener.local_addr().ok(), "listening");
        Ok(Self { listener })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        configure(&stream)?;
        Ok((stream, addr))
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Connect to `host:port`.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    configure(&stream)?;
    Ok(stream)
}

fn configure(stream: &TcpStream) -> Result<()> {
    // Small request/response frames; don't wait for coalescing
    stream.set_nodelay(true)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bind_accept_connect() {
        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = tokio::spawn(async move {
            let mut stream = connect("127.0.0.1", port).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
        });

        let (mut stream, addr) = listener.accept().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert!(stream.nodelay().unwrap());

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(connect("127.0.0.1", port).await.is_err());
    }
}
