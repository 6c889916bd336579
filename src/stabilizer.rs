//! Background maintenance task (C6): liveness checks, stabilize, fix
//! fingers, run on a fixed tick, one step after another with a sleep
//! between rounds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use tonic::Request;

use crate::identifier::ID_BITS;
use crate::lookup;
use crate::node_handle::{ChannelPool, NodeDescriptor};
use crate::routing::RoutingState;
use crate::rpc::chord_proto::{Empty, NodeMsg};
use std::sync::Mutex;

pub const STARTUP_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_TICK: Duration = Duration::from_millis(200);

/// Drives the stabilizer loop until `stopped` is set. Intended to be
/// spawned as its own task by `Node::serve`.
pub async fn run(
    state: Arc<Mutex<RoutingState>>,
    pool: Arc<ChannelPool>,
    stopped: Arc<AtomicBool>,
    tick: Duration,
) {
    tokio::time::sleep(STARTUP_DELAY).await;
    while !stopped.load(Ordering::Relaxed) {
        check_predecessor_and_successor(&state, &pool).await;
        stabilize(&state, &pool).await;
        fix_fingers(&state, &pool).await;
        debug!("{}", state.lock().unwrap().summary());
        tokio::time::sleep(tick).await;
    }
}

/// Step A: pings `finger[0]` and the predecessor. A dead successor is
/// replaced from the successor list; a dead predecessor is simply
/// forgotten.
async fn check_predecessor_and_successor(state: &Arc<Mutex<RoutingState>>, pool: &Arc<ChannelPool>) {
    let (successor, predecessor) = {
        let guard = state.lock().unwrap();
        (guard.successor(), guard.predecessor.clone())
    };

    if !ping(pool, &successor.addr).await {
        warn!("stabilizer: successor {} unreachable, promoting next", successor.addr);
        state.lock().unwrap().promote_next_successor();
    }

    if let Some(pred) = predecessor {
        if !ping(pool, &pred.addr).await {
            debug!("stabilizer: predecessor {} unreachable, clearing", pred.addr);
            let mut guard = state.lock().unwrap();
            if guard.predecessor.as_ref().map(|p| p.addr.as_str()) == Some(pred.addr.as_str()) {
                guard.predecessor = None;
            }
        }
    }
}

async fn ping(pool: &Arc<ChannelPool>, addr: &str) -> bool {
    match pool.client_for(addr).await {
        Ok(mut client) => match client.ping(Request::new(Empty {})).await {
            Ok(_) => true,
            Err(_) => {
                pool.discard(addr).await;
                false
            }
        },
        Err(_) => false,
    }
}

/// Step B: asks `finger[0]` for its predecessor, adopts it as our new
/// successor if it lies strictly between us and the old one, then
/// notifies whichever node ends up as our successor and records the
/// successor list it hands back.
async fn stabilize(state: &Arc<Mutex<RoutingState>>, pool: &Arc<ChannelPool>) {
    let (self_id, self_node, successor) = {
        let guard = state.lock().unwrap();
        (guard.self_node.id, guard.self_node.clone(), guard.successor())
    };

    let mut client = match pool.client_for(&successor.addr).await {
        Ok(client) => client,
        Err(_) => return,
    };

    let maybe_predecessor = match client.get_predecessor(Request::new(Empty {})).await {
        Ok(resp) => resp.into_inner().node,
        Err(_) => {
            pool.discard(&successor.addr).await;
            return;
        }
    };

    let mut effective_successor = successor.clone();
    if let Some(msg) = maybe_predecessor {
        if let Some(candidate) = NodeDescriptor::from_slice(&msg.id, msg.addr) {
            if crate::identifier::Identifier::in_range_open(candidate.id, self_id, successor.id) {
                effective_successor = candidate;
                state.lock().unwrap().set_successor(effective_successor.clone());
            }
        } else {
            warn!("stabilizer: predecessor reported by {} failed identity check", successor.addr);
        }
    }

    let mut successor_client = match pool.client_for(&effective_successor.addr).await {
        Ok(client) => client,
        Err(_) => return,
    };

    let notify_msg = NodeMsg {
        id: self_node.id.as_bytes().to_vec(),
        addr: self_node.addr.clone(),
    };
    match successor_client.notify(Request::new(notify_msg)).await {
        Ok(resp) => {
            // The response is `[callee, callee.successor_list...]` verbatim
            // (routing.rs's `notify_response`); storing it as-is is what
            // carries the callee's own address one hop further down the
            // ring on every tick. `promote_next_successor` accounts for
            // the duplicate head entry this produces.
            let list: Vec<NodeDescriptor> = resp
                .into_inner()
                .nodes
                .into_iter()
                .filter_map(|msg| NodeDescriptor::from_slice(&msg.id, msg.addr))
                .collect();
            state.lock().unwrap().set_successor_list(list);
        }
        Err(_) => {
            pool.discard(&effective_successor.addr).await;
        }
    }
}

/// Step C: refreshes one randomly chosen finger per tick, amortizing the
/// cost of keeping the whole table fresh.
async fn fix_fingers(state: &Arc<Mutex<RoutingState>>, pool: &Arc<ChannelPool>) {
    let index = rand::thread_rng().gen_range(1..ID_BITS);
    let (self_id, target) = {
        let guard = state.lock().unwrap();
        (guard.self_node.id, guard.self_node.id.add_pow2(index))
    };

    match lookup::find_successor(state, pool, target).await {
        Ok(node) => {
            let mut guard = state.lock().unwrap();
            guard.fingers[index] = node;
        }
        Err(err) => {
            debug!("stabilizer: fix_fingers({}) for self {:?} failed: {}", index, self_id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stabilize_populates_successor_list_from_real_notify_traffic() {
        let pool = ChannelPool::insecure();
        let a = crate::test_support::spawn_node(pool.clone()).await;
        let b = crate::test_support::spawn_node(pool.clone()).await;
        a.state.lock().unwrap().set_successor(b.descriptor.clone());
        b.state.lock().unwrap().set_successor(a.descriptor.clone());

        for _ in 0..5 {
            stabilize(&a.state, &pool).await;
            stabilize(&b.state, &pool).await;
        }

        let a_list = a.state.lock().unwrap().successor_list.clone();
        let b_list = b.state.lock().unwrap().successor_list.clone();
        assert!(!a_list.is_empty(), "a's successor_list should fill in from b's Notify replies");
        assert!(!b_list.is_empty(), "b's successor_list should fill in from a's Notify replies");
    }

    #[tokio::test]
    async fn check_predecessor_and_successor_promotes_past_a_dead_successor() {
        let pool = ChannelPool::insecure();
        let a = crate::test_support::spawn_node(pool.clone()).await;
        let c = crate::test_support::spawn_node(pool.clone()).await;

        // Nothing is bound on this address; it stands in for a dead
        // finger[0]. The verbatim Notify shape means its own echo sits at
        // index 0 of successor_list, with the real candidate at index 1.
        let dead = NodeDescriptor::new("127.0.0.1:1".to_string());
        a.state.lock().unwrap().set_successor(dead.clone());
        a.state
            .lock()
            .unwrap()
            .set_successor_list(vec![dead, c.descriptor.clone()]);

        check_predecessor_and_successor(&a.state, &pool).await;

        assert_eq!(a.state.lock().unwrap().successor(), c.descriptor);
    }
}
