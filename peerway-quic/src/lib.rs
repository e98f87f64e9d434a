//! # Peerway QUIC transport
//!
//! A peer-to-peer transport carrying application streams over QUIC,
//! with peer identities bound into the TLS handshake and aggressive
//! reuse of UDP sockets:
//!
//! - [`QuicTransport::dial`] takes a composite address plus the
//!   expected peer and returns an authenticated, multiplexed
//!   [`Session`]; the handshake itself fails if the remote proves a
//!   different identity.
//! - [`QuicTransport::listen`] accepts inbound sessions and reports
//!   each remote's identity as discovered during its handshake.
//! - A socket bound for listening also drives outbound dials, so
//!   peers always see the process's stable port; sockets created just
//!   for dialing are reaped when their last session ends.
//!
//! ```no_run
//! use peerway_identity::{HostKey, KeyKind};
//! use peerway_quic::QuicTransport;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let key = HostKey::generate(KeyKind::Ed25519)?;
//! let transport = QuicTransport::new(&key)?;
//! let listener = transport.listen(&"/ip4/0.0.0.0/udp/0/quic".parse()?)?;
//! println!("listening on {}", listener.local_addr());
//! let session = listener.accept().await?;
//! println!("session with {}", session.remote_peer());
//! # Ok(())
//! # }
//! ```

pub mod addr;
pub mod errors;
pub mod listener;
pub mod manager;
pub mod reuse;
pub mod session;
pub mod transport;

pub use addr::{Network, PeerAddr};
pub use errors::{QuicError, Result};
pub use listener::Listener;
pub use manager::ConnManager;
pub use reuse::{Reuse, ReuseConn, Scope};
pub use session::{Session, Stream};
pub use transport::{QuicTransport, PROTOCOL};
