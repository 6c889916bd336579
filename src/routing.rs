//! Routing state: finger table, successor list, predecessor (C5).
//!
//! This is the per-node mutable state: finger table, successor list,
//! and predecessor, guarded by a single `std::sync::Mutex` scoped to the
//! local node. Lock acquisition never suspends; callers snapshot what
//! they need, release the lock, do network I/O, then reacquire to
//! install results.

use crate::identifier::{Identifier, ID_BITS};
use crate::node_handle::NodeDescriptor;

/// Cache of up to `K` successors beyond `self`, used as a fallback when
/// `finger[0]` dies.
pub const K_SUCCESSORS: usize = 4;

pub struct RoutingState {
    pub self_node: NodeDescriptor,
    pub predecessor: Option<NodeDescriptor>,
    /// `finger[0..M)`; `finger[0]` doubles as the immediate successor.
    pub fingers: Vec<NodeDescriptor>,
    pub successor_list: Vec<NodeDescriptor>,
}

impl RoutingState {
    /// A freshly created node is a singleton ring: every finger points at
    /// itself and there is no predecessor.
    pub fn singleton(self_node: NodeDescriptor) -> Self {
        let fingers = vec![self_node.clone(); ID_BITS];
        RoutingState {
            self_node,
            predecessor: None,
            fingers,
            successor_list: Vec::new(),
        }
    }

    pub fn successor(&self) -> NodeDescriptor {
        self.fingers[0].clone()
    }

    pub fn set_successor(&mut self, node: NodeDescriptor) {
        self.fingers[0] = node;
    }

    /// Replaces a dead `finger[0]` with the next live successor.
    /// `successor_list` is stored verbatim from the last `Notify` response,
    /// so its own head entry (index 0) is always an echo of the (now dead)
    /// current `finger[0]`, not a fresh candidate; the real replacement is
    /// whatever follows it. If nothing follows, the node becomes a
    /// singleton ring.
    pub fn promote_next_successor(&mut self) {
        if self.successor_list.len() > 1 {
            self.successor_list.remove(0);
            self.fingers[0] = self.successor_list.remove(0);
        } else {
            self.fingers[0] = self.self_node.clone();
            self.successor_list.clear();
        }
    }

    /// Installs a freshly fetched successor list, truncated to `K`
    /// entries.
    pub fn set_successor_list(&mut self, mut list: Vec<NodeDescriptor>) {
        list.truncate(K_SUCCESSORS);
        self.successor_list = list;
    }

    /// The `[self, successor_list...]` answer the `Notify` RPC hands back
    /// to its caller, truncated to `K`.
    pub fn notify_response(&self) -> Vec<NodeDescriptor> {
        let mut out = Vec::with_capacity(K_SUCCESSORS);
        out.push(self.self_node.clone());
        for node in &self.successor_list {
            if out.len() >= K_SUCCESSORS {
                break;
            }
            out.push(node.clone());
        }
        out
    }

    /// Scans `finger[M-1] .. finger[0]` for the closest preceding finger
    /// of `id`, falling back to `self`.
    pub fn closest_preceding_finger(&self, id: Identifier) -> NodeDescriptor {
        for finger in self.fingers.iter().rev() {
            if Identifier::in_range_open(finger.id, self.self_node.id, id) {
                return finger.clone();
            }
        }
        self.self_node.clone()
    }

    /// Applies the `Notify` handler's predecessor-update rule: adopt
    /// `caller` as predecessor if none is set, or if `caller` lies
    /// strictly between the current predecessor and `self`.
    pub fn maybe_adopt_predecessor(&mut self, caller: &NodeDescriptor) -> bool {
        let should_adopt = match &self.predecessor {
            None => true,
            Some(pred) => Identifier::in_range_open(caller.id, pred.id, self.self_node.id),
        };
        if should_adopt {
            self.predecessor = Some(caller.clone());
        }
        should_adopt
    }

    /// A one-line summary of current routing state for trace logging
    /// (not exposed over RPC).
    pub fn summary(&self) -> String {
        format!(
            "self={} pred={} succ={} succ_list_len={}",
            self.self_node.addr,
            self.predecessor
                .as_ref()
                .map(|n| n.addr.as_str())
                .unwrap_or("<none>"),
            self.fingers[0].addr,
            self.successor_list.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: &str) -> NodeDescriptor {
        NodeDescriptor::new(addr)
    }

    #[test]
    fn singleton_ring_points_every_finger_at_self() {
        let n = node("127.0.0.1:7402");
        let state = RoutingState::singleton(n.clone());
        assert!(state.predecessor.is_none());
        assert!(state.fingers.iter().all(|f| *f == n));
        assert_eq!(state.successor(), n);
    }

    #[test]
    fn promote_next_successor_falls_back_to_self_when_list_empty() {
        let n = node("a");
        let mut state = RoutingState::singleton(n.clone());
        state.promote_next_successor();
        assert_eq!(state.successor(), n);
    }

    #[test]
    fn promote_next_successor_skips_the_dead_successors_own_echo() {
        let n = node("a");
        let s1 = node("b");
        let s2 = node("c");
        let mut state = RoutingState::singleton(n);
        state.set_successor(s1.clone());
        // Verbatim Notify response shape: [dead successor, its own next].
        state.set_successor_list(vec![s1, s2.clone()]);
        state.promote_next_successor();
        assert_eq!(state.successor(), s2);
        assert!(state.successor_list.is_empty());
    }

    #[test]
    fn promote_next_successor_falls_back_to_self_when_only_the_echo_remains() {
        let n = node("a");
        let s1 = node("b");
        let mut state = RoutingState::singleton(n.clone());
        state.set_successor(s1.clone());
        state.set_successor_list(vec![s1]);
        state.promote_next_successor();
        assert_eq!(state.successor(), n);
        assert!(state.successor_list.is_empty());
    }

    #[test]
    fn notify_response_puts_self_first() {
        let n = node("a");
        let s1 = node("b");
        let mut state = RoutingState::singleton(n.clone());
        state.set_successor_list(vec![s1.clone()]);
        let resp = state.notify_response();
        assert_eq!(resp[0], n);
        assert_eq!(resp[1], s1);
    }

    #[test]
    fn adopt_predecessor_when_unset() {
        let n = node("a");
        let caller = node("b");
        let mut state = RoutingState::singleton(n);
        assert!(state.maybe_adopt_predecessor(&caller));
        assert_eq!(state.predecessor, Some(caller));
    }

    #[test]
    fn reject_stale_predecessor_update() {
        let n = node("a");
        let closer = node("b");
        let farther = node("c");
        let mut state = RoutingState::singleton(n);
        // whichever of `closer`/`farther` lands strictly between the
        // existing predecessor and self wins; simulate by adopting one
        // then attempting the other in the wrong direction.
        state.predecessor = Some(closer.clone());
        if Identifier::in_range_open(farther.id, closer.id, state.self_node.id) {
            assert!(state.maybe_adopt_predecessor(&farther));
        } else {
            assert!(!state.maybe_adopt_predecessor(&farther));
            assert_eq!(state.predecessor, Some(closer));
        }
    }
}
