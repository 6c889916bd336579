//! Top-level node orchestration: bootstrap/join, and wiring the gRPC
//! server, client gateway, and stabilizer into one running process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::transport::Server;

use crate::config::Params;
use crate::error::ChordError;
use crate::gateway;
use crate::node_handle::{ChannelPool, NodeDescriptor, TlsMaterial};
use crate::routing::RoutingState;
use crate::rpc::chord_proto::chord_server::ChordServer;
use crate::rpc::chord_proto::IdMsg;
use crate::rpc::ChordService;
use crate::stabilizer;
use crate::storage::LocalStore;
use crate::tls;

pub struct Node {
    state: Arc<Mutex<RoutingState>>,
    pool: Arc<ChannelPool>,
    store: Arc<LocalStore>,
    tls_material: Option<TlsMaterial>,
    params: Params,
    stopped: Arc<AtomicBool>,
}

impl Node {
    /// Builds a node, performing the `find_successor(self.id)` bootstrap
    /// hop against `bootstrapper` when one is configured.
    pub async fn bootstrap(params: Params) -> Result<Node, ChordError> {
        let tls_material = tls::load_tls_material(&params.ca_cert, &params.hostcert, &params.hostkey)?;
        let pool = ChannelPool::new(tls_material.clone());
        Node::bootstrap_with_pool(params, pool, Some(tls_material)).await
    }

    /// The pool-agnostic half of `bootstrap`, split out so tests can
    /// supply a plaintext `ChannelPool` instead of routing through TLS
    /// material that would require a real certificate chain.
    async fn bootstrap_with_pool(
        params: Params,
        pool: Arc<ChannelPool>,
        tls_material: Option<TlsMaterial>,
    ) -> Result<Node, ChordError> {
        let store = Arc::new(LocalStore::open(&params.data_file)?);
        let self_node = NodeDescriptor::new(params.p2p_address.clone());

        let state = Arc::new(Mutex::new(RoutingState::singleton(self_node.clone())));

        if let Some(bootstrap_addr) = &params.bootstrapper {
            info!("joining ring via bootstrap peer {}", bootstrap_addr);
            // The bootstrap peer, not our own (still singleton) state, is
            // authoritative for where we belong: ask it directly rather
            // than going through the local find_successor wrapper.
            let mut client = pool.client_for(bootstrap_addr).await?;
            let response = client
                .find_successor(tonic::Request::new(IdMsg {
                    id: self_node.id.as_bytes().to_vec(),
                }))
                .await
                .map_err(ChordError::from)?
                .into_inner();
            let successor = NodeDescriptor::from_slice(&response.id, response.addr)
                .ok_or(ChordError::IdentityMismatch)?;
            state.lock().unwrap().set_successor(successor);
        } else {
            info!("no bootstrapper configured; starting a new ring at {}", self_node.addr);
        }

        Ok(Node {
            state,
            pool,
            store,
            tls_material,
            params,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Spawns the gRPC server, client gateway, and stabilizer, returning
    /// once all three have exited (after `stop()` is called).
    pub async fn serve(&self) -> Result<(), ChordError> {
        let chord_service = ChordService {
            state: self.state.clone(),
            pool: self.pool.clone(),
            store: self.store.clone(),
        };

        let tls_material = self
            .tls_material
            .as_ref()
            .ok_or_else(|| ChordError::Configured("serve() requires TLS material".to_string()))?;
        let tls_config = tls::server_tls_config(tls_material);
        let p2p_addr = self.params.p2p_address.parse().map_err(|e| {
            ChordError::Configured(format!("invalid p2p_address {}: {}", self.params.p2p_address, e))
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let grpc_server = Server::builder()
            .tls_config(tls_config)
            .map_err(ChordError::from)?
            .add_service(ChordServer::new(chord_service))
            .serve_with_shutdown(p2p_addr, async {
                let _ = shutdown_rx.await;
            });

        let api_listener = TcpListener::bind(&self.params.api_address).await?;
        let gateway_task = gateway::serve(api_listener, self.state.clone(), self.pool.clone(), self.stopped.clone());

        let stabilizer_task = stabilizer::run(
            self.state.clone(),
            self.pool.clone(),
            self.stopped.clone(),
            stabilizer::DEFAULT_TICK,
        );

        let stopped = self.stopped.clone();
        let watchdog = async move {
            while !stopped.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            let _ = shutdown_tx.send(());
        };

        tokio::join!(
            async {
                if let Err(err) = grpc_server.await {
                    log::error!("grpc server exited with error: {}", err);
                }
            },
            gateway_task,
            stabilizer_task,
            watchdog,
        );

        Ok(())
    }

    /// Flips the `stopped` flag: the stabilizer and gateway observe it
    /// between steps, and the gRPC server's shutdown future resolves on
    /// its next watchdog poll.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn routing_summary(&self) -> String {
        self.state.lock().unwrap().summary()
    }
}
