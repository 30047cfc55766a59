// Learn more about Tauri commands at https://tauri.app/develop/calling-rust/
pub mod commands;
pub mod mesh;
pub mod utils;

use crate::commands::{
    broadcast_application_request, close_splash_screen, get_app_ready_state,
    get_mesh_observed_state, initialize_app, restart_mesh_node, send_mesh_file, start_mesh_node,
    stop_mesh_node,
};
use crate::utils::{init_logging, LoggingConfig};
use std::thread;
use tracing::info;

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    // Initialize basic logging
    let log_config = LoggingConfig::default();
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!("Starting LocalMesh application");

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            info!("LocalMesh setup completed");
            // Ensure cache directory exists in dev runs
            if let Ok(exe_dir) = std::env::current_exe().and_then(|p| Ok(p.parent().map(|p| p.to_path_buf()).unwrap_or_default())) {
                let res_dir = exe_dir.join("resources");
                let _ = std::fs::create_dir_all(&res_dir);
            }

            // Auto-start the initialization process, which brings the mesh
            // node up as one of its phases.
            let app_handle = app.handle().clone();
            thread::spawn(move || {
                // Small delay to ensure splash screen is shown
                thread::sleep(std::time::Duration::from_millis(1000));

                tauri::async_runtime::spawn(async move {
                    if let Err(e) = initialize_app(app_handle).await {
                        eprintln!("Initialization failed: {}", e);
                    }
                });
            });

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            initialize_app,
            get_app_ready_state,
            close_splash_screen,
            start_mesh_node,
            stop_mesh_node,
            restart_mesh_node,
            broadcast_application_request,
            send_mesh_file,
            get_mesh_observed_state,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
