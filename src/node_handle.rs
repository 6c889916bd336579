//! Node descriptors and the process-wide RPC channel pool (C2).
//!
//! A node is modelled as a value descriptor `(id, addr)` plus a separate
//! channel pool keyed by address: descriptors are cheap, `Clone`-able
//! values; the pool owns the only thing that isn't (the live gRPC
//! channel), so a node handle never needs to reference itself through
//! its own channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};

use crate::error::ChordError;
use crate::identifier::Identifier;
use crate::rpc::chord_proto::chord_client::ChordClient;

/// A remote (or local) Chord peer: its ring position and dial address.
/// Two descriptors are equal iff their `id` fields are equal.
#[derive(Clone, Debug)]
pub struct NodeDescriptor {
    pub id: Identifier,
    pub addr: String,
}

impl PartialEq for NodeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for NodeDescriptor {}

impl NodeDescriptor {
    /// Builds a descriptor from an address, deriving `id = SHA-1(addr)`.
    pub fn new(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        let id = Identifier::hash(addr.as_bytes());
        NodeDescriptor { id, addr }
    }

    /// Anti-spoofing check: the identifier of a descriptor installed from
    /// the network must equal `SHA-1(addr)`.
    pub fn verify_identity(&self) -> bool {
        self.id == Identifier::hash(self.addr.as_bytes())
    }
}

/// TLS material loaded once at startup and shared by every client dial.
#[derive(Clone)]
pub struct TlsMaterial {
    pub ca_certificate: Certificate,
    pub client_identity: Identity,
}

/// Caches one gRPC channel per remote address, opened lazily on first use.
/// A channel is discarded as soon as an RPC on it returns a transport-level
/// error, so the next tick reconnects from scratch.
pub struct ChannelPool {
    tls: Option<TlsMaterial>,
    channels: AsyncMutex<HashMap<String, ChordClient<Channel>>>,
}

impl ChannelPool {
    pub fn new(tls: TlsMaterial) -> Arc<Self> {
        Arc::new(ChannelPool {
            tls: Some(tls),
            channels: AsyncMutex::new(HashMap::new()),
        })
    }

    /// A pool that dials plaintext HTTP instead of mTLS, for tests that
    /// exercise real RPC traffic between in-process servers without
    /// standing up a certificate chain.
    #[cfg(test)]
    pub fn insecure() -> Arc<Self> {
        Arc::new(ChannelPool {
            tls: None,
            channels: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Returns a cached client for `addr`, dialing (over mTLS, unless this
    /// pool was built with `insecure()`) on miss.
    pub async fn client_for(&self, addr: &str) -> Result<ChordClient<Channel>, ChordError> {
        {
            let guard = self.channels.lock().await;
            if let Some(client) = guard.get(addr) {
                return Ok(client.clone());
            }
        }

        let channel = match &self.tls {
            Some(tls) => {
                let domain = addr.split(':').next().unwrap_or(addr).to_string();
                let tls_config = ClientTlsConfig::new()
                    .domain_name(domain)
                    .ca_certificate(tls.ca_certificate.clone())
                    .identity(tls.client_identity.clone());

                Channel::from_shared(format!("https://{}", addr))
                    .map_err(|e| ChordError::Transport(e.to_string()))?
                    .tls_config(tls_config)
                    .map_err(ChordError::from)?
                    .connect()
                    .await
                    .map_err(ChordError::from)?
            }
            None => Channel::from_shared(format!("http://{}", addr))
                .map_err(|e| ChordError::Transport(e.to_string()))?
                .connect()
                .await
                .map_err(ChordError::from)?,
        };

        let client = ChordClient::new(channel);
        self.channels
            .lock()
            .await
            .insert(addr.to_string(), client.clone());
        Ok(client)
    }

    /// Discards a cached channel after an RPC on it failed at the
    /// transport level, so the next call reconnects.
    pub async fn discard(&self, addr: &str) {
        self.channels.lock().await.remove(addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_derives_id_from_address() {
        let node = NodeDescriptor::new("127.0.0.1:7402");
        assert_eq!(node.id, Identifier::hash(b"127.0.0.1:7402"));
        assert!(node.verify_identity());
    }

    #[test]
    fn spoofed_descriptor_fails_identity_check() {
        let mut node = NodeDescriptor::new("victim:1");
        node.id = Identifier::hash(b"attacker");
        assert!(!node.verify_identity());
    }

    #[test]
    fn equality_is_by_id_only() {
        let a = NodeDescriptor::new("127.0.0.1:7402");
        let mut b = a.clone();
        b.addr = "renamed-but-same-id".to_string();
        assert_eq!(a, b);
    }
}
