use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::VarInt;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use peerway_identity::{DialVerification, HostKey, PeerId, TlsTemplate, TLS_SERVER_NAME};

use crate::addr::PeerAddr;
use crate::errors::{QuicError, Result};
use crate::listener::Listener;
use crate::manager::ConnManager;
use crate::session::{remote_identity, Session};

/// The protocol tag this transport handles.
pub const PROTOCOL: &str = "quic";

// Fixed QUIC parameters for every session.
const MAX_INCOMING_BIDI_STREAMS: u32 = 1000;
const STREAM_RECEIVE_WINDOW: u32 = 3 * 1024 * 1024;
const CONNECTION_RECEIVE_WINDOW: u32 = 4 * 1024 * 1024 + 512 * 1024;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// The QUIC transport.
///
/// Owns the host key's TLS material and the per-family socket
/// registries. Dialing returns a [`Session`] authenticated against the
/// expected peer; listening returns a [`Listener`] that discovers each
/// remote's identity as it accepts. The host private key is used once,
/// at construction, to sign the ephemeral handshake key.
pub struct QuicTransport {
    local_peer: PeerId,
    template: TlsTemplate,
    manager: Arc<ConnManager>,
    transport_config: Arc<quinn::TransportConfig>,
}

impl QuicTransport {
    /// Builds a transport around `host_key`.
    ///
    /// Fails with an `UnsupportedKeyType` identity error for ECDSA
    /// host keys; no sockets are bound in that case.
    pub fn new(host_key: &HostKey) -> Result<Self> {
        let local_peer = host_key.peer_id();
        let template = TlsTemplate::new(host_key)?;

        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_concurrent_bidi_streams(VarInt::from_u32(MAX_INCOMING_BIDI_STREAMS));
        // Unidirectional streams are not part of this transport.
        transport_config.max_concurrent_uni_streams(VarInt::from_u32(0));
        transport_config.stream_receive_window(VarInt::from_u32(STREAM_RECEIVE_WINDOW));
        transport_config.receive_window(VarInt::from_u32(CONNECTION_RECEIVE_WINDOW));
        transport_config.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));

        info!(peer = %local_peer, "QUIC transport created");

        Ok(Self {
            local_peer,
            template,
            manager: Arc::new(ConnManager::new()),
            transport_config: Arc::new(transport_config),
        })
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    /// The socket registries, exposed for introspection.
    pub fn manager(&self) -> &ConnManager {
        &self.manager
    }

    /// Dials `raddr`, requiring the remote to authenticate as
    /// `expected_peer`.
    pub async fn dial(&self, raddr: &PeerAddr, expected_peer: PeerId) -> Result<Session> {
        self.dial_cancellable(raddr, expected_peer, CancellationToken::new())
            .await
    }

    /// Like [`dial`](Self::dial), aborting with `Canceled` when
    /// `cancel` fires mid-handshake. The socket reference acquired for
    /// the dial is released on every failure path.
    pub async fn dial_cancellable(
        &self,
        raddr: &PeerAddr,
        expected_peer: PeerId,
        cancel: CancellationToken,
    ) -> Result<Session> {
        let remote = raddr.socket_addr();
        let verification = Arc::new(DialVerification::new(expected_peer));
        let client_config = self.client_config(verification.clone())?;
        let conn = self.manager.dial(remote)?;

        debug!(%raddr, peer = %expected_peer, local = %conn.local_addr(), "Dialing");

        let handshake = async {
            let connecting = conn
                .endpoint()
                .connect_with(client_config, remote, TLS_SERVER_NAME)?;
            let connection = select! {
                _ = cancel.cancelled() => return Err(QuicError::Canceled),
                result = connecting => result.map_err(QuicError::Connection)?,
            };
            let remote_key = remote_identity(&connection)?;
            Ok((connection, remote_key))
        };

        match handshake.await {
            Ok((connection, remote_key)) => {
                let manager = self.manager.clone();
                let reuse_conn = conn.clone();
                let termination = connection.clone();
                tokio::spawn(async move {
                    termination.closed().await;
                    manager.release(&reuse_conn);
                });

                debug!(%raddr, peer = %remote_key.peer_id(), "Dial complete");
                Ok(Session::new(
                    connection,
                    self.local_peer,
                    conn.local_addr(),
                    remote_key,
                ))
            }
            Err(e) => {
                self.manager.release(&conn);
                if let Some(found) = verification.observed() {
                    if found != expected_peer {
                        return Err(QuicError::PeerMismatch {
                            expected: expected_peer,
                            found,
                        });
                    }
                }
                Err(e)
            }
        }
    }

    /// Starts listening on `laddr`. A wildcard address yields a global
    /// socket that subsequent dials in the same family will reuse.
    ///
    /// Must be called from within a Tokio runtime: the socket's I/O
    /// driver is registered with the current runtime.
    pub fn listen(&self, laddr: &PeerAddr) -> Result<Listener> {
        let server_config = self.server_config()?;
        let conn = self.manager.listen(laddr.socket_addr())?;
        Listener::new(
            self.manager.clone(),
            conn.clone(),
            server_config,
            self.local_peer,
        )
        .inspect_err(|_| self.manager.release(&conn))
    }

    /// True iff `addr` is an address this transport can dial.
    pub fn can_dial(&self, addr: &str) -> bool {
        addr.parse::<PeerAddr>().is_ok()
    }

    /// The protocol tags handled by this transport.
    pub fn protocols(&self) -> &'static [&'static str] {
        &[PROTOCOL]
    }

    /// This transport connects directly; it never proxies.
    pub fn proxies(&self) -> bool {
        false
    }

    fn client_config(&self, verification: Arc<DialVerification>) -> Result<quinn::ClientConfig> {
        let tls = self.template.client_config(verification)?;
        let crypto =
            QuicClientConfig::try_from(tls).map_err(|e| QuicError::TlsConfig(e.to_string()))?;
        let mut config = quinn::ClientConfig::new(Arc::new(crypto));
        config.transport_config(self.transport_config.clone());
        Ok(config)
    }

    fn server_config(&self) -> Result<quinn::ServerConfig> {
        let tls = self.template.server_config()?;
        let crypto =
            QuicServerConfig::try_from(tls).map_err(|e| QuicError::TlsConfig(e.to_string()))?;
        let mut config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        config.transport_config(self.transport_config.clone());
        Ok(config)
    }
}

impl std::fmt::Debug for QuicTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicTransport")
            .field("local_peer", &self.local_peer)
            .finish()
    }
}
