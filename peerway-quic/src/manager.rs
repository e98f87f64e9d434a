use std::net::SocketAddr;
use std::sync::Arc;

use crate::addr::Network;
use crate::errors::Result;
use crate::reuse::{Reuse, ReuseConn};

/// Dispatches socket operations to the registry of the right address
/// family. Nothing else lives here.
pub struct ConnManager {
    udp4: Reuse,
    udp6: Reuse,
}

impl ConnManager {
    pub fn new() -> Self {
        Self {
            udp4: Reuse::new(Network::Udp4),
            udp6: Reuse::new(Network::Udp6),
        }
    }

    pub fn reuse(&self, network: Network) -> &Reuse {
        match network {
            Network::Udp4 => &self.udp4,
            Network::Udp6 => &self.udp6,
        }
    }

    pub fn listen(&self, local_addr: SocketAddr) -> Result<Arc<ReuseConn>> {
        self.reuse(Network::of(&local_addr)).listen(local_addr)
    }

    pub fn dial(&self, remote_addr: SocketAddr) -> Result<Arc<ReuseConn>> {
        self.reuse(Network::of(&remote_addr)).dial(remote_addr)
    }

    /// Releases a handle back to whichever registry owns it.
    pub fn release(&self, conn: &ReuseConn) {
        self.reuse(Network::of(&conn.local_addr())).release(conn);
    }

    pub fn close(&self) {
        self.udp4.close();
        self.udp6.close();
    }
}

impl Default for ConnManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_by_family() {
        let manager = ConnManager::new();
        let v4 = manager.listen("0.0.0.0:0".parse().unwrap()).unwrap();
        let v6 = manager.listen("[::]:0".parse().unwrap()).unwrap();

        assert_eq!(manager.reuse(Network::Udp4).global_count(), 1);
        assert_eq!(manager.reuse(Network::Udp6).global_count(), 1);

        // Dials land on the matching family's listener.
        let dial4 = manager.dial("1.1.1.1:1234".parse().unwrap()).unwrap();
        assert_eq!(dial4.local_addr(), v4.local_addr());
        let dial6 = manager.dial("[2606:4700::1111]:1234".parse().unwrap()).unwrap();
        assert_eq!(dial6.local_addr(), v6.local_addr());
    }

    #[tokio::test]
    async fn test_release_routes_by_family() {
        let manager = ConnManager::new();
        let conn = manager.dial("1.1.1.1:1234".parse().unwrap()).unwrap();
        manager.release(&conn);
        assert_eq!(manager.reuse(Network::Udp4).ephemeral_count(), 0);
    }

    #[tokio::test]
    async fn test_close_closes_both_registries() {
        let manager = ConnManager::new();
        manager.listen("0.0.0.0:0".parse().unwrap()).unwrap();
        manager.close();
        assert!(manager.listen("0.0.0.0:0".parse().unwrap()).is_err());
        assert!(manager.listen("[::]:0".parse().unwrap()).is_err());
    }
}
