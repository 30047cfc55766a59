//! The inbound handler for every payload from `incomingPayloads`:
//! decode, de-dup, observe topology, deliver locally, forward.
//!
//! `SharedMeshState` holds the three maps the Dispatcher owns
//! (`seenMessages`, `NeighborPeerList`, `HopRecord`). The Topology
//! Optimizer reads it only through snapshot methods, never mutates it —
//! there's no cross-task mutation of shared state.

use crate::mesh::envelope::{self, FileChunk, HttpRequestWrapper, NetworkMessage, NodeId};
use crate::mesh::error::MeshError;
use crate::mesh::host::{ErrorKind, HostSink};
use crate::mesh::transport::ConnectionManager;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub struct SharedMeshState {
    seen_order: VecDeque<(String, Instant)>,
    seen_ids: HashSet<String>,
    neighbor_peer_lists: HashMap<NodeId, Vec<NodeId>>,
    hop_records: HashMap<NodeId, (u32, Instant)>,
}

impl SharedMeshState {
    pub fn new() -> Self {
        Self {
            seen_order: VecDeque::new(),
            seen_ids: HashSet::new(),
            neighbor_peer_lists: HashMap::new(),
            hop_records: HashMap::new(),
        }
    }

    pub fn contains_seen(&self, message_id: &str) -> bool {
        self.seen_ids.contains(message_id)
    }

    /// Records a message as seen, evicting the oldest entry if
    /// `max_seen_messages` is exceeded.
    pub fn record_seen(&mut self, message_id: String, now: Instant, max_seen_messages: usize) {
        if self.seen_ids.contains(&message_id) {
            return;
        }
        self.seen_ids.insert(message_id.clone());
        self.seen_order.push_back((message_id, now));
        while self.seen_order.len() > max_seen_messages {
            if let Some((oldest_id, _)) = self.seen_order.pop_front() {
                self.seen_ids.remove(&oldest_id);
            }
        }
    }

    /// Evicts seen-message entries older than `ttl`. Entries are in
    /// insertion order, which is chronological since they are only ever
    /// appended by the single task that owns this state.
    pub fn evict_expired_seen(&mut self, ttl: Duration, now: Instant) {
        while let Some((_, first_seen)) = self.seen_order.front() {
            if now.duration_since(*first_seen) <= ttl {
                break;
            }
            if let Some((oldest_id, _)) = self.seen_order.pop_front() {
                self.seen_ids.remove(&oldest_id);
            }
        }
    }

    pub fn seen_count(&self) -> usize {
        self.seen_ids.len()
    }

    pub fn update_neighbor_list(&mut self, peer_id: NodeId, peer_list: Vec<NodeId>) {
        self.neighbor_peer_lists.insert(peer_id, peer_list);
    }

    pub fn neighbor_list_snapshot(&self) -> HashMap<NodeId, Vec<NodeId>> {
        self.neighbor_peer_lists.clone()
    }

    /// Overwrites `HopRecord[source_node_id]` only if absent or the new
    /// observation is at least as fresh as what is stored. Under
    /// single-task sequential processing `now` only ever advances, so
    /// this always holds, but the check is kept explicit so the
    /// invariant stays true if this state is ever driven from more than
    /// one call site.
    pub fn update_hop_record(&mut self, source_node_id: NodeId, hop_count: u32, now: Instant) {
        let fresher = match self.hop_records.get(&source_node_id) {
            None => true,
            Some((_, observed_at)) => now >= *observed_at,
        };
        if fresher {
            self.hop_records.insert(source_node_id, (hop_count, now));
        }
    }

    pub fn expire_hop_records(&mut self, ttl: Duration, now: Instant) {
        self.hop_records
            .retain(|_, (_, observed_at)| now.duration_since(*observed_at) <= ttl);
    }

    /// Fresh hop records, for use by the rewiring/island-discovery
    /// analyses (`findRedundantPeer`'s farthest-target search, spec
    /// §4.4.3 step 4).
    pub fn fresh_hop_records_snapshot(
        &self,
        ttl: Duration,
        now: Instant,
    ) -> HashMap<NodeId, u32> {
        self.hop_records
            .iter()
            .filter(|(_, (_, observed_at))| now.duration_since(*observed_at) <= ttl)
            .map(|(node, (hop_count, _))| (node.clone(), *hop_count))
            .collect()
    }
}

impl Default for SharedMeshState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedMeshStateHandle = Arc<Mutex<SharedMeshState>>;

pub struct Dispatcher {
    pub self_node_id: NodeId,
    pub shared: SharedMeshStateHandle,
    pub transport: Arc<dyn ConnectionManager>,
    pub reassembler: Arc<Mutex<crate::mesh::chunker::Reassembler>>,
    pub host: Arc<dyn HostSink>,
    pub max_frame_size: usize,
    pub max_seen_messages: usize,
}

impl Dispatcher {
    /// Processes one inbound `(senderPeerId, bytes)` pair through the
    /// six-step decode/de-dup/observe/deliver/forward pipeline.
    pub async fn handle_incoming(&self, sender_peer_id: NodeId, bytes: Vec<u8>) {
        // Rule 1: decode (includes the frame-size check).
        if let Err(err) = envelope::check_frame_size(&bytes, self.max_frame_size) {
            warn!(sender = %sender_peer_id, error = %err, "dropping oversized frame");
            return;
        }
        let message = match envelope::decode(&bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!(sender = %sender_peer_id, error = %err, "dropping malformed envelope");
                return;
            }
        };
        self.process_decoded(sender_peer_id, message).await;
    }

    /// Ingests a message originated on this node: records it as seen (so a
    /// copy that loops back through the mesh is rejected by Rule 2 as a
    /// duplicate) and forwards it to every connected peer. Unlike
    /// `process_decoded`, this skips Rule 3 (topology observation) and
    /// Rule 4 (local delivery) entirely — a self-originated request isn't
    /// a peer's gossip or hop-count evidence, and `on_application_request`
    /// /`on_file_assembled` only fire for a message that has genuinely
    /// round-tripped through the network and come back.
    pub async fn dispatch_local_origination(&self, message: NetworkMessage) {
        let now = Instant::now();
        {
            let mut shared = self.shared.lock().unwrap();
            shared.record_seen(message.message_id.clone(), now, self.max_seen_messages);
        }
        if message.http_request.is_some() || message.file_chunk.is_some() {
            self.forward(self.self_node_id.clone(), message).await;
        }
    }

    /// Ingests a message received from a peer, applying rules 2-6.
    async fn process_decoded(&self, sender_peer_id: NodeId, message: NetworkMessage) {
        let now = Instant::now();

        // Rule 2: de-dup.
        let is_duplicate = {
            let shared = self.shared.lock().unwrap();
            shared.contains_seen(&message.message_id)
        };
        if is_duplicate {
            trace!(message_id = %message.message_id, "dropping duplicate message");
            return;
        }
        {
            let mut shared = self.shared.lock().unwrap();
            shared.record_seen(message.message_id.clone(), now, self.max_seen_messages);
        }

        // Rule 3: observe topology.
        if let Some(request) = &message.http_request {
            let mut shared = self.shared.lock().unwrap();
            shared.update_hop_record(request.source_node_id.clone(), message.hop_count, now);
        }
        if let Some(gossip) = &message.gossip {
            if let Some(peer_list) = gossip.get(envelope::PEER_LIST_TOPIC) {
                let mut shared = self.shared.lock().unwrap();
                shared.update_neighbor_list(sender_peer_id.clone(), peer_list.clone());
            }
        }

        // Rule 4: deliver locally.
        if let Some(request) = &message.http_request {
            self.host.on_application_request(request);
        }
        if let Some(chunk) = message.file_chunk.clone() {
            self.deliver_file_chunk(chunk).await;
        }
        // Gossip is consumed entirely by rule 3; no further delivery.

        // Rule 5 / Rule 6: forward http_request and file_chunk only;
        // gossip is never forwarded (one-hop by design).
        if message.http_request.is_some() || message.file_chunk.is_some() {
            self.forward(sender_peer_id, message).await;
        }
    }

    async fn deliver_file_chunk(&self, chunk: FileChunk) {
        let outcome = {
            let mut reassembler = self.reassembler.lock().unwrap();
            reassembler.add_chunk(chunk)
        };
        match outcome {
            Ok(crate::mesh::chunker::AddChunkOutcome::Assembled { destination_path }) => {
                self.host.on_file_assembled(&destination_path);
            }
            Ok(crate::mesh::chunker::AddChunkOutcome::Pending) => {}
            Err(MeshError::FileWriteFailed { path, cause }) => {
                warn!(path = %path, cause = %cause, "file write failed, dropping pending entry");
                self.host.on_error(
                    ErrorKind::FileWriteFailed,
                    &format!("failed to write {path}: {cause}"),
                );
            }
            Err(err) => {
                warn!(error = %err, "dropping reassembly error locally");
            }
        }
    }

    async fn forward(&self, received_from: NodeId, message: NetworkMessage) {
        let forwarded = message.forwarded();
        let bytes = match envelope::encode(&forwarded) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode forwarded message");
                return;
            }
        };
        let peers: Vec<NodeId> = self
            .transport
            .connected_peers()
            .borrow()
            .iter()
            .filter(|peer| **peer != received_from)
            .cloned()
            .collect();
        if peers.is_empty() {
            return;
        }
        debug!(
            message_id = %forwarded.message_id,
            hop_count = forwarded.hop_count,
            peer_count = peers.len(),
            "forwarding message"
        );
        self.transport.send_payload(&peers, bytes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_set_respects_max_size_oldest_first() {
        let mut state = SharedMeshState::new();
        let now = Instant::now();
        for i in 0..5 {
            state.record_seen(format!("m{i}"), now, 3);
        }
        assert_eq!(state.seen_count(), 3);
        assert!(!state.contains_seen("m0"));
        assert!(!state.contains_seen("m1"));
        assert!(state.contains_seen("m4"));
    }

    #[test]
    fn evict_expired_seen_drops_only_stale_entries() {
        let mut state = SharedMeshState::new();
        let t0 = Instant::now();
        state.record_seen("old".to_string(), t0, 100);
        let t1 = t0 + Duration::from_secs(200);
        state.record_seen("new".to_string(), t1, 100);
        state.evict_expired_seen(Duration::from_secs(120), t1);
        assert!(!state.contains_seen("old"));
        assert!(state.contains_seen("new"));
    }

    #[test]
    fn hop_record_expiry_drops_stale_entries() {
        let mut state = SharedMeshState::new();
        let t0 = Instant::now();
        state.update_hop_record("far".to_string(), 5, t0);
        let t1 = t0 + Duration::from_secs(121);
        state.expire_hop_records(Duration::from_secs(120), t1);
        assert!(state.fresh_hop_records_snapshot(Duration::from_secs(120), t1).is_empty());
    }

    #[test]
    fn fresh_hop_records_snapshot_excludes_stale() {
        let mut state = SharedMeshState::new();
        let t0 = Instant::now();
        state.update_hop_record("near".to_string(), 1, t0);
        let t1 = t0 + Duration::from_millis(10);
        state.update_hop_record("far".to_string(), 9, t1);
        let snapshot = state.fresh_hop_records_snapshot(Duration::from_secs(120), t1);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("far"), Some(&9));
    }
}
