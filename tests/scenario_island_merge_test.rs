//! Two disjoint triangles, each already at
//! `target_connections`, each sacrifice one redundant edge via island
//! discovery; once freed, a later discovery reveal across the two
//! islands lets a cross-link form and the six nodes become one
//! connected graph.

use localmesh_lib::mesh::config::MeshConfig;
use localmesh_lib::mesh::host::NullHostSink;
use localmesh_lib::mesh::node::MeshNode;
use localmesh_lib::mesh::simulator::Simulator;
use localmesh_lib::mesh::transport::ConnectionManager;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &std::path::Path) -> MeshConfig {
    MeshConfig {
        cache_root: dir.to_path_buf(),
        target_connections: 2,
        max_connections: 4,
        gossip_interval: Duration::from_millis(15),
        island_discovery_initial_delay: Duration::from_millis(30),
        island_discovery_interval: Duration::from_millis(40),
        ..MeshConfig::default()
    }
}

fn is_connected_graph(sim: &Simulator, ids: &[&str]) -> bool {
    let start = ids[0].to_string();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(start.clone());
    queue.push_back(start);
    while let Some(node) = queue.pop_front() {
        for other in ids {
            let other = other.to_string();
            if !seen.contains(&other) && sim.is_connected(&node, &other) {
                seen.insert(other.clone());
                queue.push_back(other);
            }
        }
    }
    seen.len() == ids.len()
}

#[tokio::test]
async fn two_islands_eventually_merge_into_one_graph() {
    let dir = TempDir::new().unwrap();
    let sim = Simulator::new(4);
    let island1 = ["A", "B", "C"];
    let island2 = ["D", "E", "F"];
    let all: Vec<&str> = island1.iter().chain(island2.iter()).copied().collect();

    let transports: std::collections::HashMap<&str, Arc<_>> = all
        .iter()
        .map(|id| (*id, Arc::new(sim.register(id.to_string()))))
        .collect();

    transports["A"].connect_to("B".to_string()).await;
    transports["B"].connect_to("C".to_string()).await;
    transports["A"].connect_to("C".to_string()).await;
    transports["D"].connect_to("E".to_string()).await;
    transports["E"].connect_to("F".to_string()).await;
    transports["D"].connect_to("F".to_string()).await;

    let mut nodes = std::collections::HashMap::new();
    for id in &all {
        let node = MeshNode::new(
            id.to_string(),
            config(dir.path()),
            transports[id].clone(),
            Arc::new(NullHostSink),
        );
        node.start().await.unwrap();
        nodes.insert(*id, node);
    }

    assert!(!is_connected_graph(&sim, &all), "islands start disjoint");

    // Let gossip populate NeighborPeerList and island discovery sacrifice
    // one redundant edge per island.
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Now that some nodes have dropped below target_connections, reveal
    // every cross-island pair (but no intra-island pair, so admission
    // can't simply reconnect the edge it just dropped) so a genuine
    // cross-island link can form.
    for a in &island1 {
        for b in &island2 {
            sim.reveal(&a.to_string(), &b.to_string());
            sim.reveal(&b.to_string(), &a.to_string());
        }
    }

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(
        is_connected_graph(&sim, &all),
        "all six nodes should be one connected graph after islands merge"
    );

    for node in nodes.values() {
        node.stop().await;
    }
}
