//! The decision engine driving connection admission, peer-list gossip,
//! rewiring, and island discovery. Pure decision functions are kept free
//! of I/O so they can be unit-tested directly; the `TopologyOptimizer`
//! wires them to the transport and shared state as six cooperative
//! tasks.

use crate::mesh::config::MeshConfig;
use crate::mesh::dispatcher::SharedMeshStateHandle;
use crate::mesh::envelope::{self, NetworkMessage, NodeId};
use crate::mesh::host::{ErrorKind, HostSink};
use crate::mesh::transport::ConnectionManager;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Connection admission: called for each `discoveredEndpoints`
/// event. The optimizer never fills above `target_connections` proactively.
pub fn should_connect_on_discovery(
    peer_id: &NodeId,
    connected_peers: &HashSet<NodeId>,
    target_connections: usize,
) -> bool {
    if connected_peers.contains(peer_id) {
        return false;
    }
    connected_peers.len() < target_connections
}

/// `findRedundantPeer`: among the current direct peers,
/// finds an ordered pair `(A, B)`, both direct peers, such that the
/// last-received peer list from `A` contains `B`. Ties broken by
/// lexicographically smallest `B` for determinism.
pub fn find_redundant_peer(
    connected_peers: &HashSet<NodeId>,
    neighbor_peer_lists: &HashMap<NodeId, Vec<NodeId>>,
) -> Option<NodeId> {
    let mut candidates: Vec<NodeId> = Vec::new();
    for a in connected_peers {
        let Some(reported) = neighbor_peer_lists.get(a) else {
            continue;
        };
        for b in reported {
            if b != a && connected_peers.contains(b) {
                candidates.push(b.clone());
            }
        }
    }
    candidates.into_iter().min()
}

/// The `farthest` target for a rewiring long-edge: the node with the
/// greatest fresh hop count that is not `self` and not already a direct
/// peer. Ties broken by lexicographically smallest id.
pub fn find_farthest_target(
    fresh_hop_records: &HashMap<NodeId, u32>,
    self_node_id: &NodeId,
    connected_peers: &HashSet<NodeId>,
) -> Option<NodeId> {
    fresh_hop_records
        .iter()
        .filter(|(node, _)| *node != self_node_id && !connected_peers.contains(*node))
        .max_by(|(node_a, hop_a), (node_b, hop_b)| {
            hop_a.cmp(hop_b).then_with(|| node_b.cmp(node_a))
        })
        .map(|(node, _)| node.clone())
}

/// Drives the six cooperative tasks against one transport.
pub struct TopologyOptimizer {
    self_node_id: NodeId,
    config: MeshConfig,
    transport: Arc<dyn ConnectionManager>,
    shared: SharedMeshStateHandle,
    host: Arc<dyn HostSink>,
    last_rewire_at: Mutex<Option<Instant>>,
    error_latched: AtomicBool,
}

impl TopologyOptimizer {
    pub fn new(
        self_node_id: NodeId,
        config: MeshConfig,
        transport: Arc<dyn ConnectionManager>,
        shared: SharedMeshStateHandle,
        host: Arc<dyn HostSink>,
    ) -> Self {
        Self {
            self_node_id,
            config,
            transport,
            shared,
            host,
            last_rewire_at: Mutex::new(None),
            error_latched: AtomicBool::new(false),
        }
    }

    /// Task 1: discovery consumer.
    pub async fn run_discovery_consumer(&self, cancel: CancellationToken) {
        let mut discovered = self.transport.take_discovered_endpoints();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = discovered.recv() => {
                    let Some(peer_id) = event else { return };
                    let connected = self.transport.connected_peers().borrow().clone();
                    if should_connect_on_discovery(&peer_id, &connected, self.config.target_connections) {
                        debug!(peer = %peer_id, "admitting discovered peer");
                        self.transport.connect_to(peer_id).await;
                    }
                }
            }
        }
    }

    /// Task 3: gossip timer.
    pub async fn run_gossip_timer(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.gossip_interval);
        ticker.tick().await; // first tick fires immediately; consume it
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.gossip_once().await,
            }
        }
    }

    async fn gossip_once(&self) {
        let peers: Vec<NodeId> = self
            .transport
            .connected_peers()
            .borrow()
            .iter()
            .cloned()
            .collect();
        if peers.is_empty() {
            return;
        }
        let message = NetworkMessage::new_gossip(Uuid::new_v4().to_string(), peers.clone());
        let Ok(bytes) = envelope::encode(&message) else {
            return;
        };
        debug!(peer_count = peers.len(), "gossiping peer list");
        self.transport.send_payload(&peers, bytes).await;
    }

    /// Task 4: rewiring analyzer.
    pub async fn run_rewiring_analyzer(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.rewiring_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.rewiring_tick().await,
            }
        }
    }

    async fn rewiring_tick(&self) {
        let now = Instant::now();
        {
            let last = self.last_rewire_at.lock().unwrap();
            if let Some(last) = *last {
                if now.duration_since(last) < self.config.rewiring_cooldown {
                    return;
                }
            }
        }
        let connected = self.transport.connected_peers().borrow().clone();
        if connected.len() < 2 {
            return;
        }
        let redundant = {
            let shared = self.shared.lock().unwrap();
            find_redundant_peer(&connected, &shared.neighbor_list_snapshot())
        };
        let Some(redundant) = redundant else {
            return;
        };
        let farthest = {
            let shared = self.shared.lock().unwrap();
            let fresh = shared.fresh_hop_records_snapshot(self.config.hop_count_ttl, now);
            find_farthest_target(&fresh, &self.self_node_id, &connected)
        };
        // The redundant edge is shed regardless of whether a long-range
        // replacement is known yet; a fresh discovery event will refill the
        // freed slot (§4.4.1) if no farthest target is available now.
        info!(redundant = %redundant, farthest = ?farthest, "rewiring: dropping redundant triangle edge");
        self.transport.disconnect_from(redundant.clone()).await;
        if let Some(farthest) = farthest {
            info!(farthest = %farthest, "rewiring: opening long-range shortcut");
            self.transport.connect_to(farthest).await;
        }
        *self.last_rewire_at.lock().unwrap() = Some(now);
    }

    /// Task 5: island probe.
    pub async fn run_island_probe(&self, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.config.island_discovery_initial_delay) => {}
        }
        let mut ticker = tokio::time::interval(self.config.island_discovery_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.island_probe_tick().await,
            }
        }
    }

    async fn island_probe_tick(&self) {
        let connected = self.transport.connected_peers().borrow().clone();
        if connected.len() < self.config.target_connections {
            return;
        }
        let candidate = {
            let shared = self.shared.lock().unwrap();
            find_redundant_peer(&connected, &shared.neighbor_list_snapshot())
        };
        let Some(candidate) = candidate else {
            return;
        };
        info!(peer = %candidate, "island discovery: sacrificing redundant edge");
        self.transport.disconnect_from(candidate).await;
    }

    /// Task 6: hop-record/seen-message/pending-file sweeper, run every
    /// `hop_count_cleanup_interval`.
    pub async fn run_sweeper(
        &self,
        reassembler: Arc<Mutex<crate::mesh::chunker::Reassembler>>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.hop_count_cleanup_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let now = Instant::now();
                    {
                        let mut shared = self.shared.lock().unwrap();
                        shared.expire_hop_records(self.config.hop_count_ttl, now);
                        shared.evict_expired_seen(self.config.seen_message_ttl, now);
                    }
                    reassembler.lock().unwrap().sweep_expired();
                }
            }
        }
    }

    /// Reports a transport fault to the host exactly once, latching the
    /// node into the `Error(reason)` state.
    pub fn report_transport_fault(&self, message: &str) {
        if self.error_latched.swap(true, Ordering::SeqCst) {
            return;
        }
        self.host.on_error(ErrorKind::TransportFault, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<NodeId> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn admission_skips_already_connected() {
        let connected = set(&["a"]);
        assert!(!should_connect_on_discovery(&"a".to_string(), &connected, 4));
    }

    #[test]
    fn admission_skips_when_at_target() {
        let connected = set(&["a", "b", "c", "d"]);
        assert!(!should_connect_on_discovery(
            &"e".to_string(),
            &connected,
            4
        ));
    }

    #[test]
    fn admission_connects_below_target() {
        let connected = set(&["a"]);
        assert!(should_connect_on_discovery(&"b".to_string(), &connected, 4));
    }

    #[test]
    fn find_redundant_peer_detects_triangle() {
        let connected = set(&["b", "c"]);
        let mut lists = HashMap::new();
        lists.insert("b".to_string(), vec!["c".to_string()]);
        lists.insert("c".to_string(), vec!["b".to_string()]);
        // Both B and C qualify (triangle self-B-C); pick lexicographically smallest.
        assert_eq!(find_redundant_peer(&connected, &lists), Some("b".to_string()));
    }

    #[test]
    fn find_redundant_peer_none_without_triangle() {
        let connected = set(&["b", "c"]);
        let lists = HashMap::new();
        assert_eq!(find_redundant_peer(&connected, &lists), None);
    }

    #[test]
    fn find_redundant_peer_ignores_peers_not_directly_connected() {
        let connected = set(&["b"]);
        let mut lists = HashMap::new();
        // b reports knowing "z", but z is not our direct peer -> no triangle.
        lists.insert("b".to_string(), vec!["z".to_string()]);
        assert_eq!(find_redundant_peer(&connected, &lists), None);
    }

    #[test]
    fn find_farthest_target_picks_max_hop_count() {
        let mut hops = HashMap::new();
        hops.insert("near".to_string(), 1);
        hops.insert("far".to_string(), 5);
        let connected = set(&["near"]);
        let self_id = "self".to_string();
        assert_eq!(
            find_farthest_target(&hops, &self_id, &connected),
            Some("far".to_string())
        );
    }

    #[test]
    fn find_farthest_target_excludes_self_and_direct_peers() {
        let mut hops = HashMap::new();
        hops.insert("self".to_string(), 0);
        hops.insert("peer".to_string(), 9);
        let connected = set(&["peer"]);
        let self_id = "self".to_string();
        assert_eq!(find_farthest_target(&hops, &self_id, &connected), None);
    }

    fn test_optimizer(
        sim: &crate::mesh::simulator::Simulator,
        self_node_id: &str,
        rewiring_cooldown: std::time::Duration,
    ) -> TopologyOptimizer {
        let transport = Arc::new(sim.register(self_node_id.to_string()));
        let shared = Arc::new(Mutex::new(crate::mesh::dispatcher::SharedMeshState::new()));
        let config = MeshConfig {
            rewiring_cooldown,
            ..MeshConfig::default()
        };
        TopologyOptimizer::new(
            self_node_id.to_string(),
            config,
            transport,
            shared,
            Arc::new(crate::mesh::host::NullHostSink),
        )
    }

    /// `rewiring_tick` is gated by `rewiring_cooldown`: a tick called again
    /// before the cooldown elapses must not touch the transport at all,
    /// even when a redundant peer is present.
    #[tokio::test]
    async fn rewiring_tick_is_a_no_op_within_cooldown() {
        let sim = crate::mesh::simulator::Simulator::new(4);
        let optimizer = test_optimizer(&sim, "A", std::time::Duration::from_millis(200));
        sim.register("B".to_string());
        sim.register("C".to_string());

        // A connects to both B and C, and B/C's gossiped peer lists make
        // each other a redundant triangle edge from A's perspective.
        optimizer.transport.connect_to("B".to_string()).await;
        optimizer.transport.connect_to("C".to_string()).await;
        {
            let mut shared = optimizer.shared.lock().unwrap();
            shared.update_neighbor_list("B".to_string(), vec!["C".to_string()]);
            shared.update_neighbor_list("C".to_string(), vec!["B".to_string()]);
        }

        // Pretend a rewire just happened, putting us inside the cooldown.
        *optimizer.last_rewire_at.lock().unwrap() = Some(std::time::Instant::now());
        optimizer.rewiring_tick().await;
        assert_eq!(
            optimizer.transport.connected_peers().borrow().len(),
            2,
            "a tick inside the cooldown window must not disconnect anything"
        );

        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        optimizer.rewiring_tick().await;
        assert_eq!(
            optimizer.transport.connected_peers().borrow().len(),
            1,
            "once the cooldown has elapsed, the redundant edge is dropped"
        );
    }
}
