//! `MeshNode`: the host-to-core contract and the owner of the six
//! cooperative tasks that keep the mesh running. Ties `TopologyOptimizer`,
//! `Dispatcher`, a `ConnectionManager`, and the `Reassembler` together
//! behind one-way ownership: `MeshNode` owns everything, the
//! `ConnectionManager` holds nothing back.

use crate::mesh::chunker::Chunker;
use crate::mesh::config::MeshConfig;
use crate::mesh::dispatcher::{Dispatcher, SharedMeshState};
use crate::mesh::envelope::{HttpRequestWrapper, NetworkMessage, NodeId};
use crate::mesh::error::Result;
use crate::mesh::host::{ErrorKind, HostSink};
use crate::mesh::state::ServiceState;
use crate::mesh::topology::TopologyOptimizer;
use crate::mesh::transport::ConnectionManager;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// Read-only snapshot returned by `MeshNode::observed_state`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ObservedState {
    pub state: String,
    pub connected_peers: Vec<NodeId>,
    pub peer_count: usize,
    pub uptime: Option<std::time::Duration>,
    pub last_error: Option<String>,
}

struct RunningTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct MeshNode {
    self_node_id: NodeId,
    config: MeshConfig,
    transport: Arc<dyn ConnectionManager>,
    host: Arc<dyn HostSink>,
    dispatcher: Arc<Dispatcher>,
    optimizer: Arc<TopologyOptimizer>,
    reassembler: Arc<Mutex<crate::mesh::chunker::Reassembler>>,
    state: Mutex<ServiceState>,
    started_at: Mutex<Option<Instant>>,
    last_error: Mutex<Option<String>>,
    running: Mutex<Option<RunningTasks>>,
}

impl MeshNode {
    pub fn new(
        self_node_id: NodeId,
        config: MeshConfig,
        transport: Arc<dyn ConnectionManager>,
        host: Arc<dyn HostSink>,
    ) -> Self {
        let shared = Arc::new(Mutex::new(SharedMeshState::new()));
        let reassembler = Arc::new(Mutex::new(crate::mesh::chunker::Reassembler::new(
            config.cache_root.clone(),
            config.file_reassembly_ttl,
        )));
        let dispatcher = Arc::new(Dispatcher {
            self_node_id: self_node_id.clone(),
            shared: shared.clone(),
            transport: transport.clone(),
            reassembler: reassembler.clone(),
            host: host.clone(),
            max_frame_size: config.max_frame_size,
            max_seen_messages: config.max_seen_messages,
        });
        let optimizer = Arc::new(TopologyOptimizer::new(
            self_node_id.clone(),
            config.clone(),
            transport.clone(),
            shared,
            host.clone(),
        ));
        Self {
            self_node_id,
            config,
            transport,
            host,
            dispatcher,
            optimizer,
            reassembler,
            state: Mutex::new(ServiceState::Idle),
            started_at: Mutex::new(None),
            last_error: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    fn set_state(&self, state: ServiceState) {
        info!(state = %state, "mesh node state transition");
        *self.state.lock().unwrap() = state;
    }

    /// Validates configuration and spawns the six cooperative tasks,
    /// transitioning `Idle -> Starting -> Running`. Rejects invalid
    /// configuration with `ConfigurationInvalid` before anything starts.
    pub async fn start(&self) -> Result<()> {
        {
            let current = self.state.lock().unwrap().clone();
            if current == ServiceState::Running || current == ServiceState::Starting {
                return Ok(());
            }
        }
        self.set_state(ServiceState::Starting);
        if let Err(err) = self.config.validate() {
            self.set_state(ServiceState::Error(err.to_string()));
            *self.last_error.lock().unwrap() = Some(err.to_string());
            self.host
                .on_error(ErrorKind::ConfigurationInvalid, &err.to_string());
            return Err(err);
        }

        self.transport.start_discovery(Vec::new()).await;

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        {
            let optimizer = self.optimizer.clone();
            let token = cancel.clone();
            handles.push(tokio::spawn(
                async move { optimizer.run_discovery_consumer(token).await },
            ));
        }
        {
            let optimizer = self.optimizer.clone();
            let token = cancel.clone();
            handles.push(tokio::spawn(async move {
                optimizer.run_gossip_timer(token).await
            }));
        }
        {
            let optimizer = self.optimizer.clone();
            let token = cancel.clone();
            handles.push(tokio::spawn(async move {
                optimizer.run_rewiring_analyzer(token).await
            }));
        }
        {
            let optimizer = self.optimizer.clone();
            let token = cancel.clone();
            handles.push(tokio::spawn(async move {
                optimizer.run_island_probe(token).await
            }));
        }
        {
            let optimizer = self.optimizer.clone();
            let reassembler = self.reassembler.clone();
            let token = cancel.clone();
            handles.push(tokio::spawn(async move {
                optimizer.run_sweeper(reassembler, token).await
            }));
        }
        {
            let dispatcher = self.dispatcher.clone();
            let transport = self.transport.clone();
            let host = self.host.clone();
            let token = cancel.clone();
            handles.push(tokio::spawn(async move {
                let mut incoming = transport.take_incoming_payloads();
                let mut peer_count = transport.connected_peers().borrow().len();
                host.on_peer_count_changed(peer_count);
                let mut connected_peers_rx = transport.connected_peers();
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        Ok(()) = connected_peers_rx.changed() => {
                            let count = connected_peers_rx.borrow().len();
                            if count != peer_count {
                                peer_count = count;
                                host.on_peer_count_changed(peer_count);
                            }
                        }
                        event = incoming.recv() => {
                            let Some((sender, bytes)) = event else { return };
                            dispatcher.handle_incoming(sender, bytes).await;
                        }
                    }
                }
            }));
        }

        *self.running.lock().unwrap() = Some(RunningTasks { cancel, handles });
        *self.started_at.lock().unwrap() = Some(Instant::now());
        self.set_state(ServiceState::Running);
        Ok(())
    }

    /// Cancels all six tasks cooperatively and tears down the transport.
    /// Idempotent.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap().take();
        let Some(running) = running else { return };
        self.set_state(ServiceState::Stopping);
        running.cancel.cancel();
        for handle in running.handles {
            let _ = handle.await;
        }
        self.transport.stop().await;
        *self.started_at.lock().unwrap() = None;
        self.set_state(ServiceState::Idle);
    }

    /// Observationally equivalent to `stop` then `start` with the same
    /// configuration.
    pub async fn restart(&self) -> Result<()> {
        self.stop().await;
        self.start().await
    }

    /// Wraps `request` in a fresh `NetworkMessage`, inserts it into
    /// `seenMessages` before the first send so any looped-back copy is
    /// rejected, and sends to all current peers. Never delivers locally:
    /// `on_application_request` only fires if a copy of this request
    /// genuinely returns through the mesh (which Rule 2 then drops anyway).
    pub async fn broadcast_application_request(&self, request: HttpRequestWrapper) {
        let message = NetworkMessage::new_http_request(Uuid::new_v4().to_string(), request);
        self.dispatcher.dispatch_local_origination(message).await;
    }

    /// Invokes the `Chunker` and sends each chunk message independently,
    /// without reassembling or delivering any of them locally.
    pub async fn send_file(&self, source_path: &Path, destination_path: &str) -> Result<()> {
        let messages = Chunker::chunk_file(source_path, destination_path, self.config.chunk_size)?;
        for message in messages {
            self.dispatcher.dispatch_local_origination(message).await;
        }
        Ok(())
    }

    pub fn observed_state(&self) -> ObservedState {
        let state = self.state.lock().unwrap().clone();
        let connected_peers: Vec<NodeId> = self
            .transport
            .connected_peers()
            .borrow()
            .iter()
            .cloned()
            .collect();
        let uptime = self
            .started_at
            .lock()
            .unwrap()
            .map(|started| started.elapsed());
        ObservedState {
            state: state.to_string(),
            peer_count: connected_peers.len(),
            connected_peers,
            uptime,
            last_error: self.last_error.lock().unwrap().clone(),
        }
    }

    /// Called by a `ConnectionManager` implementation that detects an
    /// unrecoverable transport fault. Latches the node into the terminal
    /// `Error` state until an explicit restart.
    pub fn report_transport_fault(&self, message: &str) {
        error!(error = %message, "transport fault reported");
        *self.last_error.lock().unwrap() = Some(message.to_string());
        self.set_state(ServiceState::Error(message.to_string()));
        self.optimizer.report_transport_fault(message);
    }
}
