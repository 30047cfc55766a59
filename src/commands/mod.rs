pub mod app;
pub mod mesh;

pub use app::{close_splash_screen, get_app_ready_state, initialize_app, InitProgress};
pub use mesh::{
    broadcast_application_request, get_mesh_observed_state, restart_mesh_node, send_mesh_file,
    start_mesh_node, stop_mesh_node,
};
