//! Scaffolding shared by the async wire-path tests in `stabilizer`, `rpc`,
//! and `node`: spins up a real `ChordService` behind a plaintext (no mTLS)
//! tonic server, since standing up a certificate chain has nothing to do
//! with the routing logic those tests exercise.

#![cfg(test)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tonic::transport::Server;

use crate::node_handle::{ChannelPool, NodeDescriptor};
use crate::routing::RoutingState;
use crate::rpc::chord_proto::chord_server::ChordServer;
use crate::rpc::ChordService;
use crate::storage::LocalStore;

pub struct TestNode {
    pub descriptor: NodeDescriptor,
    pub state: Arc<Mutex<RoutingState>>,
    pub store: Arc<LocalStore>,
}

/// Reserves a loopback port (binding and immediately dropping a listener
/// on it), builds a `ChordService` bound to that address, and serves it on
/// a detached background task. The returned `TestNode` starts as its own
/// singleton ring; callers wire up successors/predecessors afterwards.
pub async fn spawn_node(pool: Arc<ChannelPool>) -> TestNode {
    let addr = reserve_port().await;
    let descriptor = NodeDescriptor::new(addr.to_string());
    let state = Arc::new(Mutex::new(RoutingState::singleton(descriptor.clone())));
    let store = Arc::new(LocalStore::open(&format!("test_{}.json", addr.port())).unwrap());

    let service = ChordService {
        state: state.clone(),
        pool,
        store: store.clone(),
    };

    tokio::spawn(async move {
        Server::builder()
            .add_service(ChordServer::new(service))
            .serve(addr)
            .await
            .unwrap();
    });

    wait_for_listener(addr).await;

    TestNode { descriptor, state, store }
}

async fn reserve_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Polls until something is accepting connections on `addr`, so callers
/// don't race the background server task past its bind.
async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("test server at {} never came up", addr);
}
