//! The six-method Chord RPC service (C3 server side, C7, C8).

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tonic::{Request, Response, Status};

use crate::identifier::Identifier;
use crate::lookup;
use crate::node_handle::{ChannelPool, NodeDescriptor};
use crate::routing::RoutingState;
use crate::storage::LocalStore;
use crate::time::now_ms;

pub mod chord_proto {
    tonic::include_proto!("chord");
}

use chord_proto::chord_server::Chord;
use chord_proto::{
    Empty, GetRequest, GetResponse, IdMsg, NodeMsg, OptionalNodeMsg, PutRequest, SuccessorListMsg,
};

pub struct ChordService {
    pub state: Arc<Mutex<RoutingState>>,
    pub pool: Arc<ChannelPool>,
    pub store: Arc<LocalStore>,
}

fn to_msg(node: &NodeDescriptor) -> NodeMsg {
    NodeMsg {
        id: node.id.as_bytes().to_vec(),
        addr: node.addr.clone(),
    }
}

#[tonic::async_trait]
impl Chord for ChordService {
    /// Lookup (C7): forwards to `lookup::find_successor`.
    async fn find_successor(&self, request: Request<IdMsg>) -> Result<Response<NodeMsg>, Status> {
        let id = Identifier::from_slice(&request.into_inner().id)
            .ok_or_else(|| Status::invalid_argument("id must be 20 bytes"))?;
        let answer = lookup::find_successor(&self.state, &self.pool, id).await?;
        debug!("find_successor({:?}) -> {}", id, answer.addr);
        Ok(Response::new(to_msg(&answer)))
    }

    async fn get_predecessor(&self, _: Request<Empty>) -> Result<Response<OptionalNodeMsg>, Status> {
        let predecessor = self.state.lock().unwrap().predecessor.clone();
        Ok(Response::new(OptionalNodeMsg {
            node: predecessor.as_ref().map(to_msg),
        }))
    }

    /// Notify handler: rejects spoofed callers, otherwise conditionally
    /// adopts `caller` as predecessor and always answers with
    /// `[self, successor_list...]`.
    async fn notify(&self, request: Request<NodeMsg>) -> Result<Response<SuccessorListMsg>, Status> {
        let msg = request.into_inner();
        let caller = NodeDescriptor::from_slice(&msg.id, msg.addr.clone())
            .ok_or_else(|| {
                warn!("notify: identity check failed for claimed addr {}", msg.addr);
                Status::permission_denied("identity check error")
            })?;

        let response = {
            let mut guard = self.state.lock().unwrap();
            let adopted = guard.maybe_adopt_predecessor(&caller);
            if adopted {
                debug!("notify: adopted {} as predecessor", caller.addr);
            }
            guard.notify_response()
        };

        Ok(Response::new(SuccessorListMsg {
            nodes: response.iter().map(to_msg).collect(),
        }))
    }

    async fn ping(&self, _: Request<Empty>) -> Result<Response<Empty>, Status> {
        Ok(Response::new(Empty {}))
    }

    /// Replicated write (C8): stores locally (if the TTL hasn't already
    /// elapsed) then forwards down the replication chain.
    async fn put(&self, request: Request<PutRequest>) -> Result<Response<Empty>, Status> {
        let mut req = request.into_inner();
        let self_addr = self.state.lock().unwrap().self_node.addr.clone();

        if req.initiator_addr.is_empty() {
            req.initiator_addr = self_addr.clone();
        } else if req.initiator_addr == self_addr {
            // The replication chain wrapped around the ring.
            return Ok(Response::new(Empty {}));
        }

        let ttl_ms = req.expire_at_ms - now_ms();
        if ttl_ms > 0 {
            self.store.put_absolute(req.key.clone(), req.value.clone(), req.expire_at_ms);
        }

        if req.replication <= 1 {
            return Ok(Response::new(Empty {}));
        }

        let next_addr = self.state.lock().unwrap().successor().addr.clone();
        let mut client = self.pool.client_for(&next_addr).await.map_err(|err| {
            warn!("put: forwarding to {} failed: {}", next_addr, err);
            Status::from(err)
        })?;

        client
            .put(Request::new(PutRequest {
                key: req.key,
                value: req.value,
                expire_at_ms: req.expire_at_ms,
                initiator_addr: req.initiator_addr,
                replication: req.replication - 1,
            }))
            .await?;

        Ok(Response::new(Empty {}))
    }

    /// `Get(key)` (C8): a local-only read. The client gateway is
    /// responsible for having already routed to the true successor.
    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let key = request.into_inner().key;
        let (value, present) = self.store.get(&key);
        Ok(Response::new(GetResponse { value, present }))
    }
}
