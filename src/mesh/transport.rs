//! The abstract transport façade: a uniform view over a
//! discovery-and-link transport regardless of underlying radio. Real
//! radio, LAN, and in-memory simulator implementations all satisfy this
//! one capability set.

use crate::mesh::envelope::NodeId;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

/// One payload arriving from a connected peer. Per-sender order is
/// preserved; cross-sender order is not guaranteed.
pub type IncomingPayload = (NodeId, Vec<u8>);

/// `connectedPeers`: a reactive set, single-producer many-consumer.
/// `watch` gives every consumer the latest snapshot and a way to await
/// the next change, which is exactly the monotonic-between-any-two-
/// snapshots guarantee consumers need.
pub type ConnectedPeersReceiver = watch::Receiver<std::collections::HashSet<NodeId>>;

/// `discoveredEndpoints`: an append-only stream of NodeId, possibly with
/// duplicates; consumers must debounce.
pub type DiscoveredEndpointsReceiver = mpsc::Receiver<NodeId>;

/// `incomingPayloads`: an ordered stream of `(senderPeerId, bytes)`.
pub type IncomingPayloadsReceiver = mpsc::Receiver<IncomingPayload>;

/// The transport capability set every `ConnectionManager` implementation
/// exposes. Implementations never raise errors across this façade; lost
/// links manifest purely as `connectedPeers` membership changes.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Begins advertising and scanning. Idempotent; calling twice
    /// re-advertises with the new payload.
    async fn start_discovery(&self, advertise_payload: Vec<u8>);

    /// Halts scanning/advertising but preserves existing links.
    async fn stop_discovery(&self);

    /// Initiates a link. Success appears as `peer_id` joining
    /// `connected_peers()`. Failure is silent at this layer.
    async fn connect_to(&self, peer_id: NodeId);

    /// Terminates the link; the peer leaves `connected_peers()`.
    async fn disconnect_from(&self, peer_id: NodeId);

    /// Best-effort delivery to each listed peer. Delivery order to a
    /// given peer equals call order.
    async fn send_payload(&self, peer_ids: &[NodeId], bytes: Vec<u8>);

    /// Tears down all links and both streams. Idempotent.
    async fn stop(&self);

    /// An integer bound the optimizer must respect.
    fn max_connections(&self) -> usize;

    /// A reactive snapshot/subscription handle for `connectedPeers`.
    fn connected_peers(&self) -> ConnectedPeersReceiver;

    /// Takes ownership of the discovery stream. Each implementation
    /// yields this receiver exactly once; the Optimizer's discovery
    /// consumer task owns it for the node's lifetime.
    fn take_discovered_endpoints(&self) -> DiscoveredEndpointsReceiver;

    /// Takes ownership of the incoming-payload stream, once, for the
    /// Dispatcher's payload consumer task.
    fn take_incoming_payloads(&self) -> IncomingPayloadsReceiver;
}
