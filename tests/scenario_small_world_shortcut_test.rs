//! A triangle with a trailing chain exposes a genuine
//! redundant edge plus a genuinely farther node, and one rewiring tick
//! turns a long detour into a direct shortcut.
//!
//! Topology: N1=N2=N3 (triangle) with a chain N3-N4-N5-N6 trailing off
//! N3. Before rewiring, N1's shortest path to N6 is N1-N3-N4-N5-N6 (4
//! hops); N1 also has a genuine redundant peer (N2, since both N2 and N3
//! each report the other corner of the triangle). Only N1 is given a
//! fast rewiring interval, so the rewiring outcome is deterministic.

use localmesh_lib::mesh::config::MeshConfig;
use localmesh_lib::mesh::envelope::HttpRequestWrapper;
use localmesh_lib::mesh::host::NullHostSink;
use localmesh_lib::mesh::node::MeshNode;
use localmesh_lib::mesh::simulator::Simulator;
use localmesh_lib::mesh::transport::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &std::path::Path, rewiring_interval: Duration) -> MeshConfig {
    MeshConfig {
        cache_root: dir.to_path_buf(),
        gossip_interval: Duration::from_millis(15),
        rewiring_interval,
        rewiring_cooldown: Duration::from_millis(0),
        ..MeshConfig::default()
    }
}

fn request(from: &str) -> HttpRequestWrapper {
    HttpRequestWrapper {
        method: "GET".to_string(),
        path: "/ping".to_string(),
        query_params: HashMap::new(),
        body: String::new(),
        source_node_id: from.to_string(),
    }
}

#[tokio::test]
async fn rewiring_turns_detour_into_shortcut() {
    let dir = TempDir::new().unwrap();
    let sim = Simulator::new(4);
    let ids = ["N1", "N2", "N3", "N4", "N5", "N6"];
    let transports: HashMap<&str, Arc<_>> = ids
        .iter()
        .map(|id| (*id, Arc::new(sim.register(id.to_string()))))
        .collect();

    // Triangle.
    transports["N1"].connect_to("N2".to_string()).await;
    transports["N2"].connect_to("N3".to_string()).await;
    transports["N1"].connect_to("N3".to_string()).await;
    // Trailing chain off N3.
    transports["N3"].connect_to("N4".to_string()).await;
    transports["N4"].connect_to("N5".to_string()).await;
    transports["N5"].connect_to("N6".to_string()).await;

    let slow = Duration::from_secs(10_000);
    let fast = Duration::from_millis(20);
    let mut nodes = HashMap::new();
    for id in ids {
        let rewiring = if id == "N1" { fast } else { slow };
        let node = MeshNode::new(
            id.to_string(),
            config(dir.path(), rewiring),
            transports[id].clone(),
            Arc::new(NullHostSink),
        );
        node.start().await.unwrap();
        nodes.insert(id, node);
    }

    // Only N6 broadcasts, so the only entry in every HopRecord table is
    // N6's, making the farthest-target choice unambiguous.
    nodes["N6"].broadcast_application_request(request("N6")).await;

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(
        !sim.is_connected(&"N1".to_string(), &"N2".to_string()),
        "N1 should have dropped its redundant triangle edge to N2"
    );
    assert!(
        sim.is_connected(&"N1".to_string(), &"N3".to_string()),
        "the non-redundant triangle edge stays"
    );
    assert!(
        sim.is_connected(&"N1".to_string(), &"N6".to_string()),
        "N1 should have opened a direct shortcut to the farthest known node"
    );

    for node in nodes.values() {
        node.stop().await;
    }
}
