use crate::commands::mesh::build_mesh_node;
use crate::mesh::MeshNode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tauri::{AppHandle, Emitter, Manager};
use tracing::{error, info};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InitProgress {
    pub phase: String,
    pub message: String,
    pub progress: f32,
    pub icon: String,
}

#[tauri::command]
pub async fn initialize_app(app: AppHandle) -> Result<(), String> {
    info!("Starting application initialization");

    let main_window = app.get_webview_window("main").ok_or("Main window not found")?;

    let splash_window = app.get_webview_window("splashscreen");

    let phases = vec![
        InitProgress {
            phase: "config".to_string(),
            message: "Loading mesh configuration".to_string(),
            progress: 0.0,
            icon: "Settings".to_string(),
        },
        InitProgress {
            phase: "transport".to_string(),
            message: "Starting local transport".to_string(),
            progress: 25.0,
            icon: "Radio".to_string(),
        },
        InitProgress {
            phase: "discovery".to_string(),
            message: "Discovering nearby peers".to_string(),
            progress: 50.0,
            icon: "Users".to_string(),
        },
        InitProgress {
            phase: "topology".to_string(),
            message: "Starting topology optimizer".to_string(),
            progress: 75.0,
            icon: "Share2".to_string(),
        },
        InitProgress {
            phase: "complete".to_string(),
            message: "Mesh node ready".to_string(),
            progress: 100.0,
            icon: "CheckCircle".to_string(),
        },
    ];

    for (i, phase) in phases.iter().enumerate() {
        info!("Initialization phase: {}", phase.phase);

        if let Err(e) = main_window.emit("init-progress", phase) {
            error!("Failed to emit progress: {}", e);
        }

        if phase.phase == "transport" {
            let node_id = uuid::Uuid::new_v4().to_string();
            let node = build_mesh_node(app.clone(), node_id);
            if let Err(e) = node.start().await {
                error!("Failed to start mesh node: {}", e);
                return Err(e.to_string());
            }
            app.manage(node as Arc<MeshNode>);
        }

        let delay = if i == phases.len() - 1 { 300 } else { 400 };
        thread::sleep(Duration::from_millis(delay as u64));
    }

    main_window.show().map_err(|e| e.to_string())?;
    main_window.set_focus().map_err(|e| e.to_string())?;

    if let Some(splash) = splash_window {
        let _ = splash.close();
    }

    info!("Application initialization completed");
    Ok(())
}

#[tauri::command]
pub async fn get_app_ready_state() -> Result<bool, String> {
    thread::sleep(Duration::from_millis(100));
    Ok(true)
}

#[tauri::command]
pub async fn close_splash_screen(app: AppHandle) -> Result<(), String> {
    if let Some(splash_window) = app.get_webview_window("splashscreen") {
        splash_window.close().map_err(|e| e.to_string())?;
    }
    Ok(())
}
