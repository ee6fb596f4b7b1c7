//! JSON-lines speech endpoint over TCP

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::protocol::{decode_line, encode_line, HostRequest, HostResponse};
use super::{SpeechEndpoint, TransportError};

/// Client side of one speech host connection
///
/// One request is in flight at a time; concurrent callers queue on the
/// connection lock. A stream that failed or was abandoned mid-exchange is
/// dropped, so every later call reports [`TransportError::Closed`].
pub struct TcpEndpoint {
    peer: SocketAddr,
    connection: Mutex<Option<Connection>>,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn exchange(&mut self, request: &HostRequest) -> Result<HostResponse, TransportError> {
        let line = encode_line(request)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        let read = self.reader.read_line(&mut reply).await?;
        if read == 0 {
            return Err(TransportError::Closed);
        }

        trace!(bytes = read, "Received host response");
        decode_line(&reply)
    }
}

impl TcpEndpoint {
    /// Connect to a host listening on `peer`
    pub async fn connect(peer: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(peer)
            .await
            .map_err(|e| TransportError::Connect {
                port: peer.port(),
                message: e.to_string(),
            })?;
        Self::from_stream(stream)
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, writer) = stream.into_split();

        Ok(Self {
            peer,
            connection: Mutex::new(Some(Connection {
                reader: BufReader::new(read_half),
                writer,
            })),
        })
    }

    /// Address of the connected host
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn round_trip(&self, request: HostRequest) -> Result<HostResponse, TransportError> {
        let mut guard = self.connection.lock().await;
        // Taken out for the exchange; an abandoned exchange leaves the slot empty
        let mut connection = guard.take().ok_or(TransportError::Closed)?;

        match connection.exchange(&request).await {
            Ok(response) => {
                *guard = Some(connection);
                Ok(response)
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Dropping broken connection");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SpeechEndpoint for TcpEndpoint {
    async fn hello(&self) -> Result<String, TransportError> {
        self.round_trip(HostRequest::Hello).await?.into_value()
    }

    async fn speak_ssml(&self, markup: &str) -> Result<Vec<u8>, TransportError> {
        self.round_trip(HostRequest::SpeakSsml {
            markup: markup.to_string(),
        })
        .await?
        .into_audio()
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        let connection = self.connection.lock().await.take();
        if let Some(mut connection) = connection {
            debug!(peer = %self.peer, "Closing host connection");
            // The host may already be gone; a failed FIN changes nothing.
            let _ = connection.writer.shutdown().await;
        }
        Ok(())
    }
}
