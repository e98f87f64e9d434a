use quinn::{Endpoint, EndpointConfig, TokioRuntime};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::addr::Network;
use crate::errors::{QuicError, Result};

/// How a reused socket came to exist, which decides its lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
    /// Wildcard-bound listener socket. Lives as long as the registry;
    /// its reference count is advisory.
    Global,
    /// Created for a specific dial (or a non-wildcard listen). Closed
    /// and removed when the last reference is released.
    Ephemeral,
}

/// A refcounted handle around one bound UDP socket.
///
/// The socket is owned by a QUIC endpoint; all sessions using the
/// handle share it, and the QUIC library demultiplexes their packets
/// by connection ID. The count is mutated only under the owning
/// registry's lock.
#[derive(Debug)]
pub struct ReuseConn {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    scope: Scope,
    count: AtomicUsize,
}

impl ReuseConn {
    fn bind(addr: SocketAddr, scope: Scope) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr).map_err(QuicError::Bind)?;
        let local_addr = socket.local_addr().map_err(QuicError::Bind)?;
        let endpoint = Endpoint::new(
            EndpointConfig::default(),
            None,
            socket,
            Arc::new(TokioRuntime),
        )
        .map_err(QuicError::Bind)?;

        debug!(addr = %local_addr, ?scope, "Bound UDP socket");

        Ok(Arc::new(Self {
            endpoint,
            local_addr,
            scope,
            count: AtomicUsize::new(1),
        }))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Current reference count. Advisory for global sockets.
    pub fn ref_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct State {
    globals: HashMap<SocketAddr, Arc<ReuseConn>>,
    ephemerals: HashMap<SocketAddr, Arc<ReuseConn>>,
    closed: bool,
}

/// Per-family registry of reused UDP sockets.
///
/// Holds at most one socket per local address. The lock covers only
/// map lookups and count mutations; the bind syscall runs outside it.
pub struct Reuse {
    network: Network,
    state: Mutex<State>,
}

impl Reuse {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            state: Mutex::new(State::default()),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn check_network(&self, addr: &SocketAddr) -> Result<()> {
        if Network::of(addr) != self.network {
            return Err(QuicError::InvalidNetwork(format!(
                "{} address in {} registry",
                Network::of(addr),
                self.network
            )));
        }
        Ok(())
    }

    /// Binds a fresh socket on exactly `local_addr`.
    ///
    /// Wildcard binds become global sockets that later dials
    /// piggyback on; anything else is ephemeral. The caller owns one
    /// reference.
    pub fn listen(&self, local_addr: SocketAddr) -> Result<Arc<ReuseConn>> {
        self.check_network(&local_addr)?;
        if self.state.lock().unwrap().closed {
            return Err(QuicError::RegistryClosed);
        }

        let scope = if local_addr.ip().is_unspecified() {
            Scope::Global
        } else {
            Scope::Ephemeral
        };
        let conn = ReuseConn::bind(local_addr, scope)?;

        let mut state = self.state.lock().unwrap();
        if state.closed {
            conn.endpoint.close(0u32.into(), b"");
            return Err(QuicError::RegistryClosed);
        }
        match scope {
            Scope::Global => state.globals.insert(conn.local_addr, conn.clone()),
            Scope::Ephemeral => state.ephemerals.insert(conn.local_addr, conn.clone()),
        };
        Ok(conn)
    }

    /// Returns a socket to drive an outbound session to `remote_addr`.
    ///
    /// Prefers a global socket so peers see the process's stable
    /// listening port, then an existing ephemeral, and only then binds
    /// a fresh wildcard socket with an OS-chosen port. The caller owns
    /// one reference either way.
    pub fn dial(&self, remote_addr: SocketAddr) -> Result<Arc<ReuseConn>> {
        self.check_network(&remote_addr)?;

        {
            let state = self.state.lock().unwrap();
            if state.closed {
                return Err(QuicError::RegistryClosed);
            }
            if let Some(conn) = state
                .globals
                .values()
                .next()
                .or_else(|| state.ephemerals.values().next())
            {
                conn.count.fetch_add(1, Ordering::Relaxed);
                return Ok(conn.clone());
            }
        }

        let conn = ReuseConn::bind(self.network.unspecified(), Scope::Ephemeral)?;

        let mut state = self.state.lock().unwrap();
        if state.closed {
            conn.endpoint.close(0u32.into(), b"");
            return Err(QuicError::RegistryClosed);
        }
        state.ephemerals.insert(conn.local_addr, conn.clone());
        Ok(conn)
    }

    /// Releases one reference.
    ///
    /// Must be called exactly once per acquired handle. An ephemeral
    /// socket whose count reaches zero is closed and removed; global
    /// sockets stay until the registry itself closes.
    pub fn release(&self, conn: &ReuseConn) {
        let mut state = self.state.lock().unwrap();
        let current = conn.count.load(Ordering::Relaxed);
        if current == 0 {
            warn!(addr = %conn.local_addr, "Released an already-unreferenced socket");
            return;
        }
        conn.count.store(current - 1, Ordering::Relaxed);

        if conn.scope == Scope::Ephemeral && current == 1 {
            if let Some(removed) = state.ephemerals.remove(&conn.local_addr) {
                debug!(addr = %conn.local_addr, "Reaping unused ephemeral socket");
                removed.endpoint.close(0u32.into(), b"");
            }
        }
    }

    /// Closes every socket, referenced or not, and refuses further use.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        for conn in state.globals.values().chain(state.ephemerals.values()) {
            conn.endpoint.close(0u32.into(), b"");
        }
        state.globals.clear();
        state.ephemerals.clear();
    }

    pub fn global_count(&self) -> usize {
        self.state.lock().unwrap().globals.len()
    }

    pub fn ephemeral_count(&self) -> usize {
        self.state.lock().unwrap().ephemerals.len()
    }

    /// True iff a socket is registered at `addr`.
    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.get(addr).is_some()
    }

    /// The socket registered at `addr`, if any.
    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<ReuseConn>> {
        let state = self.state.lock().unwrap();
        state
            .globals
            .get(addr)
            .or_else(|| state.ephemerals.get(addr))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listen_wildcard_is_global() {
        let reuse = Reuse::new(Network::Udp4);
        let conn = reuse.listen("0.0.0.0:0".parse().unwrap()).unwrap();
        assert_eq!(conn.ref_count(), 1);
        assert_eq!(conn.scope(), Scope::Global);
        assert_ne!(conn.local_addr().port(), 0);
        assert_eq!(reuse.global_count(), 1);
        assert_eq!(reuse.ephemeral_count(), 0);
    }

    #[tokio::test]
    async fn test_listen_wildcard_v6() {
        let reuse = Reuse::new(Network::Udp6);
        let conn = reuse.listen("[::]:0".parse().unwrap()).unwrap();
        assert_eq!(conn.ref_count(), 1);
        assert_eq!(conn.scope(), Scope::Global);
    }

    #[tokio::test]
    async fn test_listen_concrete_is_ephemeral() {
        let reuse = Reuse::new(Network::Udp4);
        let conn = reuse.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(conn.scope(), Scope::Ephemeral);
        assert_eq!(reuse.ephemeral_count(), 1);
    }

    #[tokio::test]
    async fn test_dial_creates_wildcard_ephemeral() {
        let reuse = Reuse::new(Network::Udp4);
        let conn = reuse.dial("1.1.1.1:1234".parse().unwrap()).unwrap();
        assert_eq!(conn.ref_count(), 1);
        assert!(conn.local_addr().ip().is_unspecified());
        assert_ne!(conn.local_addr().port(), 0);
        assert_eq!(reuse.ephemeral_count(), 1);
    }

    #[tokio::test]
    async fn test_dial_reuses_listening_socket() {
        let reuse = Reuse::new(Network::Udp4);
        let lconn = reuse.listen("0.0.0.0:0".parse().unwrap()).unwrap();
        assert_eq!(lconn.ref_count(), 1);

        let conn = reuse.dial("1.1.1.1:1234".parse().unwrap()).unwrap();
        assert_eq!(conn.ref_count(), 2);
        assert_eq!(conn.local_addr(), lconn.local_addr());
        assert_eq!(reuse.ephemeral_count(), 0);
    }

    #[tokio::test]
    async fn test_second_dial_reuses_ephemeral() {
        let reuse = Reuse::new(Network::Udp4);
        let first = reuse.dial("1.1.1.1:1234".parse().unwrap()).unwrap();
        let second = reuse.dial("8.8.8.8:4242".parse().unwrap()).unwrap();
        assert_eq!(first.local_addr(), second.local_addr());
        assert_eq!(second.ref_count(), 2);
        assert_eq!(reuse.ephemeral_count(), 1);
    }

    #[tokio::test]
    async fn test_release_reaps_ephemeral() {
        let reuse = Reuse::new(Network::Udp4);
        let conn = reuse.dial("1.1.1.1:1234".parse().unwrap()).unwrap();
        let addr = conn.local_addr();
        assert!(reuse.contains(&addr));

        reuse.release(&conn);
        assert_eq!(conn.ref_count(), 0);
        assert_eq!(reuse.ephemeral_count(), 0);
        assert!(!reuse.contains(&addr));
    }

    #[tokio::test]
    async fn test_release_keeps_ephemeral_with_references() {
        let reuse = Reuse::new(Network::Udp4);
        let first = reuse.dial("1.1.1.1:1234".parse().unwrap()).unwrap();
        let _second = reuse.dial("8.8.8.8:4242".parse().unwrap()).unwrap();

        reuse.release(&first);
        assert_eq!(first.ref_count(), 1);
        assert_eq!(reuse.ephemeral_count(), 1);
    }

    #[tokio::test]
    async fn test_release_never_reaps_global() {
        let reuse = Reuse::new(Network::Udp4);
        let conn = reuse.listen("0.0.0.0:0".parse().unwrap()).unwrap();
        reuse.release(&conn);
        assert_eq!(conn.ref_count(), 0);
        assert_eq!(reuse.global_count(), 1);
        assert!(reuse.contains(&conn.local_addr()));
    }

    #[tokio::test]
    async fn test_family_mismatch_rejected() {
        let reuse = Reuse::new(Network::Udp4);
        assert!(matches!(
            reuse.listen("[::]:0".parse().unwrap()).unwrap_err(),
            QuicError::InvalidNetwork(_)
        ));
        assert!(matches!(
            reuse.dial("[::1]:1234".parse().unwrap()).unwrap_err(),
            QuicError::InvalidNetwork(_)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_listen_fails_bind() {
        let reuse = Reuse::new(Network::Udp4);
        let conn = reuse.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let taken = conn.local_addr();
        assert!(matches!(
            reuse.listen(taken).unwrap_err(),
            QuicError::Bind(_)
        ));
    }

    #[tokio::test]
    async fn test_close_refuses_further_use() {
        let reuse = Reuse::new(Network::Udp4);
        let conn = reuse.listen("0.0.0.0:0".parse().unwrap()).unwrap();
        reuse.close();
        assert_eq!(reuse.global_count(), 0);
        assert!(!reuse.contains(&conn.local_addr()));
        assert!(matches!(
            reuse.listen("0.0.0.0:0".parse().unwrap()).unwrap_err(),
            QuicError::RegistryClosed
        ));
        assert!(matches!(
            reuse.dial("1.1.1.1:1234".parse().unwrap()).unwrap_err(),
            QuicError::RegistryClosed
        ));
    }
}
