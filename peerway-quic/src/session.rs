use quinn::{RecvStream, SendStream, VarInt};
use rustls::pki_types::CertificateDer;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use peerway_identity::{verify_chain, HostPublicKey, IdentityError, PeerId};

use crate::addr::PeerAddr;
use crate::errors::{QuicError, Result};

/// An authenticated, multiplexed session with one remote peer.
///
/// Produced by a dial (where the remote identity was required up
/// front) or by a listener (where it was discovered during the
/// handshake). Closing is idempotent; the underlying QUIC connection
/// ignores repeated closes.
pub struct Session {
    connection: quinn::Connection,
    local_peer: PeerId,
    remote_peer: PeerId,
    remote_public_key: HostPublicKey,
    local_addr: PeerAddr,
    remote_addr: PeerAddr,
}

impl Session {
    pub(crate) fn new(
        connection: quinn::Connection,
        local_peer: PeerId,
        local_socket: SocketAddr,
        remote_public_key: HostPublicKey,
    ) -> Self {
        let remote_addr = PeerAddr::from_socket(connection.remote_address());
        Self {
            connection,
            local_peer,
            remote_peer: remote_public_key.peer_id(),
            remote_public_key,
            local_addr: PeerAddr::from_socket(local_socket),
            remote_addr,
        }
    }

    /// Opens a bidirectional stream to the peer.
    pub async fn open_stream(&self) -> Result<Stream> {
        let (send, recv) = self.connection.open_bi().await?;
        Ok(Stream { send, recv })
    }

    /// Accepts the next stream the peer opens.
    pub async fn accept_stream(&self) -> Result<Stream> {
        let (send, recv) = self.connection.accept_bi().await?;
        Ok(Stream { send, recv })
    }

    /// Closes the session and every outstanding stream. Idempotent.
    pub fn close(&self) {
        self.connection.close(VarInt::from_u32(0), b"");
    }

    pub fn is_closed(&self) -> bool {
        self.connection.close_reason().is_some()
    }

    /// Resolves when the session terminates, whichever side causes it.
    pub async fn closed(&self) {
        self.connection.closed().await;
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    /// The public key the remote proved during the handshake.
    pub fn remote_public_key(&self) -> &HostPublicKey {
        &self.remote_public_key
    }

    pub fn local_addr(&self) -> PeerAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> PeerAddr {
        self.remote_addr
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local_peer", &self.local_peer)
            .field("remote_peer", &self.remote_peer)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

/// Recovers the authenticated host key from a completed handshake.
///
/// The chain was already checked inside the handshake by the TLS
/// verifier; re-running the pure check here is how the key itself is
/// extracted from the presented certificates.
pub(crate) fn remote_identity(connection: &quinn::Connection) -> Result<HostPublicKey> {
    let certs = connection
        .peer_identity()
        .and_then(|identity| identity.downcast::<Vec<CertificateDer<'static>>>().ok())
        .ok_or(QuicError::Identity(IdentityError::ChainLength(0)))?;
    Ok(verify_chain(&certs)?)
}

/// A bidirectional byte stream within a session.
///
/// Reads and writes delegate to the underlying QUIC stream, including
/// its flow control; `AsyncRead`/`AsyncWrite` make it usable anywhere
/// a plain socket would be.
pub struct Stream {
    send: SendStream,
    recv: RecvStream,
}

impl Stream {
    /// Signals that no more data will be written. The peer sees EOF
    /// after delivery of everything already sent.
    pub fn finish(&mut self) -> Result<()> {
        self.send
            .finish()
            .map_err(|e| QuicError::Stream(e.to_string()))
    }

    /// Abruptly terminates the write side; unsent data is dropped.
    pub fn reset(&mut self, error_code: u32) -> Result<()> {
        self.send
            .reset(VarInt::from_u32(error_code))
            .map_err(|e| QuicError::Stream(e.to_string()))
    }

    /// Tells the peer to stop sending; pending reads are discarded.
    pub fn stop(&mut self, error_code: u32) -> Result<()> {
        self.recv
            .stop(VarInt::from_u32(error_code))
            .map_err(|e| QuicError::Stream(e.to_string()))
    }

    pub fn id(&self) -> quinn::StreamId {
        self.send.id()
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("id", &self.id()).finish()
    }
}
