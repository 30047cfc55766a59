//! A `libp2p`-backed `ConnectionManager` over plain LAN TCP with mDNS
//! peer discovery — the closest faithful analogue to a real short-range
//! radio transport that is reachable without vendor hardware. The actual
//! radio layer is an external collaborator; this adapter stands in for it.
//!
//! One Swarm owned by a single spawned task, driven by a command channel, with
//! `NetworkBehaviour` composed of `mdns` for discovery and
//! `request_response` for point-to-point frame delivery.

use crate::mesh::envelope::NodeId;
use crate::mesh::transport::{
    ConnectedPeersReceiver, ConnectionManager, DiscoveredEndpointsReceiver,
    IncomingPayloadsReceiver,
};
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures::StreamExt;
use libp2p::{
    identity, mdns, noise,
    swarm::{NetworkBehaviour, Swarm, SwarmEvent},
    tcp, yamux, PeerId, Transport,
};
use libp2p_request_response as rr;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

#[derive(Clone, Default)]
struct FrameCodec;

#[async_trait]
impl rr::Codec for FrameCodec {
    type Protocol = String;
    type Request = Vec<u8>;
    type Response = Vec<u8>;

    async fn read_request<T>(&mut self, _p: &Self::Protocol, io: &mut T) -> std::io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut buf = Vec::new();
        io.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn read_response<T>(&mut self, _p: &Self::Protocol, io: &mut T) -> std::io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut buf = Vec::new();
        io.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn write_request<T>(&mut self, _p: &Self::Protocol, io: &mut T, req: Self::Request) -> std::io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.write_all(&req).await
    }

    async fn write_response<T>(&mut self, _p: &Self::Protocol, io: &mut T, res: Self::Response) -> std::io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.write_all(&res).await
    }
}

#[derive(NetworkBehaviour)]
struct Behaviour {
    mdns: mdns::tokio::Behaviour,
    rr: rr::Behaviour<FrameCodec>,
}

enum Command {
    Connect(PeerId),
    Disconnect(PeerId),
    Send(Vec<PeerId>, Vec<u8>),
    Stop,
}

/// `ConnectionManager` implementation backed by a `libp2p` swarm on
/// plain TCP, with mDNS for LAN discovery. `NodeId` is the textual form
/// of the node's `PeerId`.
pub struct LibP2pConnectionManager {
    local_node_id: NodeId,
    command_tx: mpsc::Sender<Command>,
    connected_peers_rx: ConnectedPeersReceiver,
    discovered_rx: Mutex<Option<DiscoveredEndpointsReceiver>>,
    incoming_rx: Mutex<Option<IncomingPayloadsReceiver>>,
    max_connections: usize,
}

impl LibP2pConnectionManager {
    /// Spawns the swarm-owning task and returns a handle satisfying
    /// `ConnectionManager`. `listen_addr` is a `/ip4/.../tcp/0`-style
    /// multiaddr; port 0 lets the OS pick a free port, matching how the
    /// host's existing P2P runtime is wired up.
    pub async fn spawn(
        listen_addr: libp2p::Multiaddr,
        max_connections: usize,
    ) -> anyhow::Result<Self> {
        let local_key = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());

        let transport = tcp::tokio::Transport::default()
            .upgrade(libp2p::core::upgrade::Version::V1)
            .authenticate(noise::Config::new(&local_key)?)
            .multiplex(yamux::Config::default())
            .timeout(Duration::from_secs(20))
            .boxed();

        let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;
        let protocols = std::iter::once(("/localmesh/frame/1".to_string(), rr::ProtocolSupport::Full));
        let rr = rr::Behaviour::<FrameCodec>::new(protocols, Default::default());
        let behaviour = Behaviour { mdns, rr };

        let mut swarm = Swarm::new(
            transport,
            behaviour,
            local_peer_id,
            libp2p::swarm::Config::with_tokio_executor(),
        );
        swarm.listen_on(listen_addr)?;

        let (connected_peers_tx, connected_peers_rx) = watch::channel(HashSet::new());
        let (discovered_tx, discovered_rx) = mpsc::channel(256);
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        let (command_tx, mut command_rx) = mpsc::channel::<Command>(64);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(cmd) = command_rx.recv() => {
                        match cmd {
                            Command::Connect(peer) => { let _ = swarm.dial(peer); }
                            Command::Disconnect(peer) => { let _ = swarm.disconnect_peer_id(peer); }
                            Command::Send(peers, bytes) => {
                                for peer in peers {
                                    swarm.behaviour_mut().rr.send_request(&peer, bytes.clone());
                                }
                            }
                            Command::Stop => {
                                for peer in swarm.connected_peers().cloned().collect::<Vec<_>>() {
                                    let _ = swarm.disconnect_peer_id(peer);
                                }
                                return;
                            }
                        }
                    }
                    event = swarm.select_next_some() => {
                        match event {
                            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                                connected_peers_tx.send_modify(|set| { set.insert(peer_id.to_string()); });
                            }
                            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                                connected_peers_tx.send_modify(|set| { set.remove(&peer_id.to_string()); });
                            }
                            SwarmEvent::Behaviour(BehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                                for (peer_id, _addr) in peers {
                                    let _ = discovered_tx.try_send(peer_id.to_string());
                                }
                            }
                            SwarmEvent::Behaviour(BehaviourEvent::Rr(rr::Event::Message { peer, message })) => {
                                if let rr::Message::Request { request, channel, .. } = message {
                                    let _ = incoming_tx.try_send((peer.to_string(), request));
                                    let _ = swarm.behaviour_mut().rr.send_response(channel, Vec::new());
                                }
                            }
                            SwarmEvent::Behaviour(BehaviourEvent::Mdns(mdns::Event::Expired(_))) => {}
                            other => debug!(?other, "unhandled swarm event"),
                        }
                    }
                }
            }
        });

        Ok(Self {
            local_node_id: local_peer_id.to_string(),
            command_tx,
            connected_peers_rx,
            discovered_rx: Mutex::new(Some(discovered_rx)),
            incoming_rx: Mutex::new(Some(incoming_rx)),
            max_connections,
        })
    }

    pub fn local_node_id(&self) -> &NodeId {
        &self.local_node_id
    }

    fn parse_peer(node_id: &NodeId) -> Option<PeerId> {
        node_id.parse().ok()
    }
}

#[async_trait]
impl ConnectionManager for LibP2pConnectionManager {
    async fn start_discovery(&self, _advertise_payload: Vec<u8>) {
        // mDNS advertises/scans automatically once the behaviour is
        // live; this implementation has nothing additional to toggle.
    }

    async fn stop_discovery(&self) {}

    async fn connect_to(&self, peer_id: NodeId) {
        let Some(peer) = Self::parse_peer(&peer_id) else {
            warn!(peer = %peer_id, "connect_to: not a valid PeerId, ignored");
            return;
        };
        let _ = self.command_tx.send(Command::Connect(peer)).await;
    }

    async fn disconnect_from(&self, peer_id: NodeId) {
        let Some(peer) = Self::parse_peer(&peer_id) else {
            return;
        };
        let _ = self.command_tx.send(Command::Disconnect(peer)).await;
    }

    async fn send_payload(&self, peer_ids: &[NodeId], bytes: Vec<u8>) {
        let peers: Vec<PeerId> = peer_ids.iter().filter_map(Self::parse_peer).collect();
        if peers.is_empty() {
            return;
        }
        let _ = self.command_tx.send(Command::Send(peers, bytes)).await;
    }

    async fn stop(&self) {
        let _ = self.command_tx.send(Command::Stop).await;
    }

    fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn connected_peers(&self) -> ConnectedPeersReceiver {
        self.connected_peers_rx.clone()
    }

    fn take_discovered_endpoints(&self) -> DiscoveredEndpointsReceiver {
        self.discovered_rx
            .lock()
            .unwrap()
            .take()
            .expect("discovered_endpoints taken more than once")
    }

    fn take_incoming_payloads(&self) -> IncomingPayloadsReceiver {
        self.incoming_rx
            .lock()
            .unwrap()
            .take()
            .expect("incoming_payloads taken more than once")
    }
}
