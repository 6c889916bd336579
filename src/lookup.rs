//! Recursive `find_successor` lookup (C7).

use std::sync::{Arc, Mutex};

use tonic::Request;

use crate::error::ChordError;
use crate::identifier::Identifier;
use crate::node_handle::{ChannelPool, NodeDescriptor};
use crate::routing::RoutingState;
use crate::rpc::chord_proto::IdMsg;

/// `find_successor(id)` on the node backed by `state`:
///
/// 1. If `id` is covered by our immediate successor, return it directly.
/// 2. Otherwise find the closest preceding finger and forward the call.
/// 3. If no finger precedes `id` (we'd forward to ourselves), our
///    successor is the answer (degenerate single-node case).
pub async fn find_successor(
    state: &Arc<Mutex<RoutingState>>,
    pool: &Arc<ChannelPool>,
    id: Identifier,
) -> Result<NodeDescriptor, ChordError> {
    let (self_id, successor, candidate) = {
        let guard = state.lock().unwrap();
        (
            guard.self_node.id,
            guard.successor(),
            guard.closest_preceding_finger(id),
        )
    };

    if Identifier::in_range_half_open(id, self_id, successor.id) {
        return Ok(successor);
    }

    if candidate.id == self_id {
        // No finger strictly precedes `id`: we are the last hop and our
        // own successor is the answer.
        return Ok(successor);
    }

    let mut client = match pool.client_for(&candidate.addr).await {
        Ok(client) => client,
        Err(err) => {
            pool.discard(&candidate.addr).await;
            return Err(err);
        }
    };

    let response = client
        .find_successor(Request::new(IdMsg {
            id: id.as_bytes().to_vec(),
        }))
        .await;

    match response {
        Ok(resp) => {
            let msg = resp.into_inner();
            NodeDescriptor::from_slice(&msg.id, msg.addr).ok_or(ChordError::IdentityMismatch)
        }
        Err(status) => {
            pool.discard(&candidate.addr).await;
            Err(ChordError::from(status))
        }
    }
}

impl NodeDescriptor {
    /// Builds a descriptor from a wire `(id, addr)` pair: `find_successor`'s
    /// answer is re-validated here exactly like `Notify`/`Stabilize` already
    /// are, so a spoofed `(id, addr)` pair is rejected at every hop.
    pub fn from_slice(id_bytes: &[u8], addr: String) -> Option<NodeDescriptor> {
        let id = Identifier::from_slice(id_bytes)?;
        if id != Identifier::hash(addr.as_bytes()) {
            return None;
        }
        Some(NodeDescriptor { id, addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_handle::TlsMaterial;

    #[test]
    fn from_slice_rejects_spoofed_pair() {
        let bad_id = Identifier::hash(b"attacker").as_bytes().to_vec();
        assert!(NodeDescriptor::from_slice(&bad_id, "victim:1".to_string()).is_none());
    }

    #[test]
    fn from_slice_accepts_consistent_pair() {
        let addr = "127.0.0.1:7402".to_string();
        let id = Identifier::hash(addr.as_bytes()).as_bytes().to_vec();
        let node = NodeDescriptor::from_slice(&id, addr.clone()).unwrap();
        assert_eq!(node.addr, addr);
    }

    #[tokio::test]
    async fn find_successor_returns_direct_successor_when_in_range() {
        let self_node = NodeDescriptor::new("127.0.0.1:7402");
        let state = Arc::new(Mutex::new(RoutingState::singleton(self_node.clone())));
        // Singleton ring: successor is self, so every id is "in range".
        let tls = test_tls_material();
        let pool = ChannelPool::new(tls);
        let answer = find_successor(&state, &pool, Identifier::hash(b"anything"))
            .await
            .unwrap();
        assert_eq!(answer, self_node);
    }

    fn test_tls_material() -> TlsMaterial {
        // Only used to construct a ChannelPool whose dial path is never
        // exercised in a singleton-ring lookup.
        TlsMaterial {
            ca_certificate: tonic::transport::Certificate::from_pem(""),
            client_identity: tonic::transport::Identity::from_pem("", ""),
        }
    }
}
