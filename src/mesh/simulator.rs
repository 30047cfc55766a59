//! Reference in-memory `ConnectionManager` implementation.
//! Used by the test suite and by any host embedding LocalMesh
//! without a real radio transport. A `Simulator` is a shared "world"
//! that several `SimulatorTransport` handles, one per simulated node,
//! plug into; it wires connect/disconnect and payload delivery between
//! them without any real network I/O.

use crate::mesh::envelope::NodeId;
use crate::mesh::transport::{
    ConnectedPeersReceiver, ConnectionManager, DiscoveredEndpointsReceiver,
    IncomingPayloadsReceiver,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::debug;

struct NodeChannels {
    connected_peers_tx: watch::Sender<HashSet<NodeId>>,
    connected_peers_rx: ConnectedPeersReceiver,
    discovered_tx: mpsc::Sender<NodeId>,
    discovered_rx: Mutex<Option<DiscoveredEndpointsReceiver>>,
    incoming_tx: mpsc::Sender<(NodeId, Vec<u8>)>,
    incoming_rx: Mutex<Option<IncomingPayloadsReceiver>>,
}

struct World {
    nodes: HashMap<NodeId, Arc<NodeChannels>>,
    links: HashSet<(NodeId, NodeId)>,
}

fn link_key(a: &NodeId, b: &NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// The shared simulated radio medium. Clone freely; every clone refers to
/// the same world.
#[derive(Clone)]
pub struct Simulator {
    world: Arc<Mutex<World>>,
    max_connections: usize,
}

impl Simulator {
    pub fn new(max_connections: usize) -> Self {
        Self {
            world: Arc::new(Mutex::new(World {
                nodes: HashMap::new(),
                links: HashSet::new(),
            })),
            max_connections,
        }
    }

    /// Registers a node and returns its `ConnectionManager` handle.
    pub fn register(&self, node_id: NodeId) -> SimulatorTransport {
        let (connected_peers_tx, connected_peers_rx) = watch::channel(HashSet::new());
        let (discovered_tx, discovered_rx) = mpsc::channel(256);
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        let channels = Arc::new(NodeChannels {
            connected_peers_tx,
            connected_peers_rx,
            discovered_tx,
            discovered_rx: Mutex::new(Some(discovered_rx)),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
        });
        self.world
            .lock()
            .unwrap()
            .nodes
            .insert(node_id.clone(), channels);
        SimulatorTransport {
            node_id,
            world: self.world.clone(),
            max_connections: self.max_connections,
        }
    }

    /// Makes `observer` discover `candidate` (a simulated radio-proximity
    /// event). Call twice with arguments swapped for mutual discovery.
    pub fn reveal(&self, observer: &NodeId, candidate: &NodeId) {
        let world = self.world.lock().unwrap();
        if let Some(channels) = world.nodes.get(observer) {
            let _ = channels.discovered_tx.try_send(candidate.clone());
        }
    }

    /// Convenience: reveals every pair among `node_ids` to each other,
    /// simulating a fully-reachable radio neighborhood.
    pub fn reveal_all_pairs(&self, node_ids: &[NodeId]) {
        for a in node_ids {
            for b in node_ids {
                if a != b {
                    self.reveal(a, b);
                }
            }
        }
    }

    pub fn is_connected(&self, a: &NodeId, b: &NodeId) -> bool {
        self.world.lock().unwrap().links.contains(&link_key(a, b))
    }

    pub fn connection_count(&self, node_id: &NodeId) -> usize {
        self.world
            .lock()
            .unwrap()
            .links
            .iter()
            .filter(|(a, b)| a == node_id || b == node_id)
            .count()
    }
}

/// Per-node handle into the shared `Simulator` world, implementing
/// `ConnectionManager`.
pub struct SimulatorTransport {
    node_id: NodeId,
    world: Arc<Mutex<World>>,
    max_connections: usize,
}

#[async_trait]
impl ConnectionManager for SimulatorTransport {
    async fn start_discovery(&self, _advertise_payload: Vec<u8>) {
        // The simulator's discovery surface is driven externally via
        // `Simulator::reveal`; nothing to do here besides being
        // idempotent by construction.
    }

    async fn stop_discovery(&self) {}

    async fn connect_to(&self, peer_id: NodeId) {
        let mut world = self.world.lock().unwrap();
        if !world.nodes.contains_key(&peer_id) {
            debug!(peer = %peer_id, "connect_to: unknown peer, ignored");
            return;
        }
        world.links.insert(link_key(&self.node_id, &peer_id));
        let self_id = self.node_id.clone();
        for (id, other) in [(self.node_id.clone(), peer_id.clone()), (peer_id, self_id)] {
            if let Some(channels) = world.nodes.get(&id) {
                channels.connected_peers_tx.send_modify(|set| {
                    set.insert(other);
                });
            }
        }
    }

    async fn disconnect_from(&self, peer_id: NodeId) {
        let mut world = self.world.lock().unwrap();
        world.links.remove(&link_key(&self.node_id, &peer_id));
        let self_id = self.node_id.clone();
        for (id, other) in [
            (self.node_id.clone(), peer_id.clone()),
            (peer_id, self_id),
        ] {
            if let Some(channels) = world.nodes.get(&id) {
                channels.connected_peers_tx.send_modify(|set| {
                    set.remove(&other);
                });
            }
        }
    }

    async fn send_payload(&self, peer_ids: &[NodeId], bytes: Vec<u8>) {
        let world = self.world.lock().unwrap();
        for peer_id in peer_ids {
            if !world.links.contains(&link_key(&self.node_id, peer_id)) {
                continue;
            }
            if let Some(channels) = world.nodes.get(peer_id) {
                let _ = channels
                    .incoming_tx
                    .try_send((self.node_id.clone(), bytes.clone()));
            }
        }
    }

    async fn stop(&self) {
        let mut world = self.world.lock().unwrap();
        let self_id = self.node_id.clone();
        let peers: Vec<NodeId> = world
            .links
            .iter()
            .filter_map(|(a, b)| {
                if a == &self_id {
                    Some(b.clone())
                } else if b == &self_id {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect();
        for peer in peers {
            world.links.remove(&link_key(&self_id, &peer));
            if let Some(channels) = world.nodes.get(&peer) {
                channels.connected_peers_tx.send_modify(|set| {
                    set.remove(&self_id);
                });
            }
        }
        if let Some(channels) = world.nodes.get(&self_id) {
            channels.connected_peers_tx.send_modify(|set| set.clear());
        }
    }

    fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn connected_peers(&self) -> ConnectedPeersReceiver {
        self.world
            .lock()
            .unwrap()
            .nodes
            .get(&self.node_id)
            .expect("registered node")
            .connected_peers_rx
            .clone()
    }

    fn take_discovered_endpoints(&self) -> DiscoveredEndpointsReceiver {
        self.world
            .lock()
            .unwrap()
            .nodes
            .get(&self.node_id)
            .expect("registered node")
            .discovered_rx
            .lock()
            .unwrap()
            .take()
            .expect("discovered_endpoints taken more than once")
    }

    fn take_incoming_payloads(&self) -> IncomingPayloadsReceiver {
        self.world
            .lock()
            .unwrap()
            .nodes
            .get(&self.node_id)
            .expect("registered node")
            .incoming_rx
            .lock()
            .unwrap()
            .take()
            .expect("incoming_payloads taken more than once")
    }
}
