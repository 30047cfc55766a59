//! The host-to-core contract exposed to the webview, and the
//! core-to-host upcalls delivered back via Tauri events. This module is
//! the "foreground service shell" / "embedded HTTP server" / "UI"
//! boundary that sits outside the mesh core's scope, pinned here at the
//! contract level.

use crate::mesh::host::{ErrorKind, HostSink};
use crate::mesh::{HttpRequestWrapper, MeshConfig, MeshNode, ObservedState};
use serde::Serialize;
use std::sync::Arc;
use tauri::{AppHandle, Emitter};
use tracing::error;

/// Delivers `HostSink` upcalls to the webview by emitting the same kind
/// of named event `commands::app::initialize_app` already uses for
/// `init-progress`.
struct TauriHostSink {
    app: AppHandle,
}

#[derive(Serialize, Clone)]
struct ErrorEvent {
    kind: String,
    message: String,
}

impl HostSink for TauriHostSink {
    fn on_application_request(&self, request: &HttpRequestWrapper) {
        if let Err(e) = self.app.emit("mesh-application-request", request) {
            error!("failed to emit mesh-application-request: {}", e);
        }
    }

    fn on_file_assembled(&self, destination_path: &str) {
        if let Err(e) = self.app.emit("mesh-file-assembled", destination_path) {
            error!("failed to emit mesh-file-assembled: {}", e);
        }
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        let event = ErrorEvent {
            kind: kind.to_string(),
            message: message.to_string(),
        };
        if let Err(e) = self.app.emit("mesh-error", event) {
            error!("failed to emit mesh-error: {}", e);
        }
    }

    fn on_peer_count_changed(&self, count: usize) {
        if let Err(e) = self.app.emit("mesh-peer-count-changed", count) {
            error!("failed to emit mesh-peer-count-changed: {}", e);
        }
    }
}

/// Builds the node's `MeshNode` against the in-memory simulator
/// transport, used until a real `libp2p` listen address is plumbed
/// through from the UI. Exposed so `commands::app::initialize_app` can
/// start the mesh as one of its init phases.
pub fn build_mesh_node(app: AppHandle, node_id: String) -> Arc<MeshNode> {
    let simulator = crate::mesh::simulator::Simulator::new(MeshConfig::default().max_connections);
    let transport = Arc::new(simulator.register(node_id.clone()));
    let host = Arc::new(TauriHostSink { app });
    Arc::new(MeshNode::new(
        node_id,
        MeshConfig::default(),
        transport,
        host,
    ))
}

#[tauri::command]
pub async fn start_mesh_node(node: tauri::State<'_, Arc<MeshNode>>) -> Result<(), String> {
    node.start().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn stop_mesh_node(node: tauri::State<'_, Arc<MeshNode>>) -> Result<(), String> {
    node.stop().await;
    Ok(())
}

#[tauri::command]
pub async fn restart_mesh_node(node: tauri::State<'_, Arc<MeshNode>>) -> Result<(), String> {
    node.restart().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn broadcast_application_request(
    node: tauri::State<'_, Arc<MeshNode>>,
    request: HttpRequestWrapper,
) -> Result<(), String> {
    node.broadcast_application_request(request).await;
    Ok(())
}

#[tauri::command]
pub async fn send_mesh_file(
    node: tauri::State<'_, Arc<MeshNode>>,
    source_path: String,
    destination_path: String,
) -> Result<(), String> {
    node.send_file(std::path::Path::new(&source_path), &destination_path)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_mesh_observed_state(
    node: tauri::State<'_, Arc<MeshNode>>,
) -> Result<ObservedState, String> {
    Ok(node.observed_state())
}
