use quinn::{Endpoint, ServerConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use peerway_identity::PeerId;

use crate::addr::PeerAddr;
use crate::errors::{QuicError, Result};
use crate::manager::ConnManager;
use crate::reuse::ReuseConn;
use crate::session::{remote_identity, Session};

/// Accepts inbound sessions on a reused UDP socket.
///
/// The listener owns one reference on its socket; dials made while it
/// is alive share the same socket, so peers always see the listening
/// port. Remote identities are discovered per session: the TLS
/// verifier authenticates each client's chain during the handshake and
/// the verified key is attached to the returned [`Session`].
pub struct Listener {
    manager: Arc<ConnManager>,
    conn: Arc<ReuseConn>,
    endpoint: Endpoint,
    local_peer: PeerId,
    local_addr: PeerAddr,
    close_token: CancellationToken,
    closed: AtomicBool,
}

impl Listener {
    pub(crate) fn new(
        manager: Arc<ConnManager>,
        conn: Arc<ReuseConn>,
        server_config: ServerConfig,
        local_peer: PeerId,
    ) -> Result<Self> {
        let mut endpoint = conn.endpoint().clone();
        endpoint.set_server_config(Some(server_config));
        let local_addr = PeerAddr::from_socket(conn.local_addr());

        info!(addr = %local_addr, "Listening for QUIC sessions");

        Ok(Self {
            manager,
            conn,
            endpoint,
            local_peer,
            local_addr,
            close_token: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// The concrete bound address, with the OS-chosen port filled in.
    pub fn local_addr(&self) -> PeerAddr {
        self.local_addr
    }

    /// Waits for the next fully established, identity-verified
    /// session.
    ///
    /// Per-session failures (a failed handshake, a chain the verifier
    /// rejected) are logged and skipped; only closing the listener
    /// ends the loop.
    pub async fn accept(&self) -> Result<Session> {
        loop {
            let incoming = tokio::select! {
                _ = self.close_token.cancelled() => return Err(QuicError::ListenerClosed),
                incoming = self.endpoint.accept() => {
                    incoming.ok_or(QuicError::ListenerClosed)?
                }
            };
            let remote = incoming.remote_address();

            if Self::require_address_validation(&incoming) {
                debug!(%remote, "Requesting source address validation");
                let _ = incoming.retry();
                continue;
            }

            let connecting = match incoming.accept() {
                Ok(connecting) => connecting,
                Err(e) => {
                    warn!(%remote, error = %e, "Failed to begin accepting session");
                    continue;
                }
            };

            let connection = match connecting.await {
                Ok(connection) => connection,
                Err(e) => {
                    debug!(%remote, error = %e, "Inbound handshake failed");
                    continue;
                }
            };

            match remote_identity(&connection) {
                Ok(remote_key) => {
                    debug!(%remote, peer = %remote_key.peer_id(), "Accepted session");
                    return Ok(Session::new(
                        connection,
                        self.local_peer,
                        self.conn.local_addr(),
                        remote_key,
                    ));
                }
                Err(e) => {
                    debug!(%remote, error = %e, "Dropping session without verifiable identity");
                    connection.close(0u32.into(), b"identity verification failed");
                    continue;
                }
            }
        }
    }

    /// Source-address-validation hook. Always passes today; a policy
    /// returning true would make the remote prove its address via a
    /// retry packet before the handshake proceeds.
    fn require_address_validation(_incoming: &quinn::Incoming) -> bool {
        false
    }

    /// Stops accepting and releases the socket reference. Idempotent;
    /// pending `accept` calls return `ListenerClosed`.
    pub fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_token.cancel();
            let mut endpoint = self.endpoint.clone();
            endpoint.set_server_config(None);
            self.manager.release(&self.conn);
            info!(addr = %self.local_addr, "Listener closed");
        }
        Ok(())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
