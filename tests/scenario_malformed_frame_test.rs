//! A frame with both `httpRequest` and `fileChunk` populated
//! is dropped on receipt, never reaches the host, and is never
//! forwarded.

use localmesh_lib::mesh::config::MeshConfig;
use localmesh_lib::mesh::envelope::{self, FileChunk, HttpRequestWrapper, NetworkMessage};
use localmesh_lib::mesh::host::{ErrorKind, HostSink};
use localmesh_lib::mesh::node::MeshNode;
use localmesh_lib::mesh::simulator::Simulator;
use localmesh_lib::mesh::transport::ConnectionManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct RecordingHost {
    requests: AtomicUsize,
    files: AtomicUsize,
}

impl HostSink for RecordingHost {
    fn on_application_request(&self, _request: &HttpRequestWrapper) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_assembled(&self, _destination_path: &str) {
        self.files.fetch_add(1, Ordering::SeqCst);
    }
    fn on_error(&self, _kind: ErrorKind, _message: &str) {}
    fn on_peer_count_changed(&self, _count: usize) {}
}

#[tokio::test]
async fn malformed_envelope_is_dropped_and_never_forwarded() {
    let dir = TempDir::new().unwrap();
    let sim = Simulator::new(4);
    let attacker = sim.register("attacker".to_string());
    let receiver_transport = Arc::new(sim.register("receiver".to_string()));
    let bystander_transport = Arc::new(sim.register("bystander".to_string()));

    attacker.connect_to("receiver".to_string()).await;
    receiver_transport
        .connect_to("bystander".to_string())
        .await;

    let host = Arc::new(RecordingHost {
        requests: AtomicUsize::new(0),
        files: AtomicUsize::new(0),
    });
    let receiver = MeshNode::new(
        "receiver".to_string(),
        MeshConfig {
            cache_root: dir.path().to_path_buf(),
            ..MeshConfig::default()
        },
        receiver_transport,
        host.clone(),
    );
    receiver.start().await.unwrap();

    let mut bystander_incoming = bystander_transport.take_incoming_payloads();

    // Hand-build a malformed message: both variants populated. `encode`
    // does not validate, only `decode` does, so this is constructible.
    let malformed = NetworkMessage {
        message_id: "evil-1".to_string(),
        hop_count: 0,
        http_request: Some(HttpRequestWrapper {
            method: "GET".to_string(),
            path: "/x".to_string(),
            query_params: HashMap::new(),
            body: String::new(),
            source_node_id: "attacker".to_string(),
        }),
        file_chunk: Some(FileChunk {
            file_id: "f".to_string(),
            destination_path: "f.bin".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            data: vec![],
        }),
        gossip: None,
    };
    let bytes = envelope::encode(&malformed).unwrap();
    attacker
        .send_payload(&["receiver".to_string()], bytes)
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(host.requests.load(Ordering::SeqCst), 0);
    assert_eq!(host.files.load(Ordering::SeqCst), 0);
    assert!(
        bystander_incoming.try_recv().is_err(),
        "malformed frame must never be forwarded"
    );

    receiver.stop().await;
}
