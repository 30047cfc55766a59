//! Runtime configuration surface for the mesh overlay: connection
//! targets, timer intervals, and chunking/cache knobs, validated once
//! at `MeshNode::start()`.

use crate::mesh::error::{MeshError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Desired direct-link count the optimizer actively seeks.
    pub target_connections: usize,
    /// Hard bound on direct-link count.
    pub max_connections: usize,

    pub gossip_interval: Duration,
    pub rewiring_interval: Duration,
    pub rewiring_cooldown: Duration,
    pub island_discovery_initial_delay: Duration,
    pub island_discovery_interval: Duration,

    pub hop_count_ttl: Duration,
    pub hop_count_cleanup_interval: Duration,
    /// Defaults to `hop_count_ttl` unless overridden.
    pub seen_message_ttl: Duration,
    pub max_seen_messages: usize,

    pub chunk_size: usize,
    pub file_reassembly_ttl: Duration,
    pub cache_root: PathBuf,

    pub max_frame_size: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        let hop_count_ttl = Duration::from_secs(120);
        Self {
            target_connections: 4,
            max_connections: 8,
            gossip_interval: Duration::from_secs(30),
            rewiring_interval: Duration::from_secs(60),
            rewiring_cooldown: Duration::from_secs(60),
            island_discovery_initial_delay: Duration::from_secs(30),
            island_discovery_interval: Duration::from_secs(5 * 60),
            hop_count_ttl,
            hop_count_cleanup_interval: Duration::from_secs(60),
            seen_message_ttl: hop_count_ttl,
            max_seen_messages: 10_000,
            chunk_size: crate::mesh::chunker::DEFAULT_CHUNK_SIZE,
            file_reassembly_ttl: crate::mesh::chunker::DEFAULT_FILE_REASSEMBLY_TTL,
            cache_root: PathBuf::from("localmesh-cache"),
            max_frame_size: 256 * 1024,
        }
    }
}

impl MeshConfig {
    /// Raises `ConfigurationInvalid` for `target_connections >
    /// max_connections`, non-positive intervals, or an empty `cache_root`.
    pub fn validate(&self) -> Result<()> {
        if self.target_connections > self.max_connections {
            return Err(MeshError::ConfigurationInvalid(format!(
                "target_connections ({}) must not exceed max_connections ({})",
                self.target_connections, self.max_connections
            )));
        }
        if self.max_connections == 0 {
            return Err(MeshError::ConfigurationInvalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        let positive_intervals = [
            ("gossip_interval", self.gossip_interval),
            ("rewiring_interval", self.rewiring_interval),
            ("rewiring_cooldown", self.rewiring_cooldown),
            ("island_discovery_interval", self.island_discovery_interval),
            ("hop_count_ttl", self.hop_count_ttl),
            (
                "hop_count_cleanup_interval",
                self.hop_count_cleanup_interval,
            ),
            ("seen_message_ttl", self.seen_message_ttl),
            ("file_reassembly_ttl", self.file_reassembly_ttl),
        ];
        for (name, value) in positive_intervals {
            if value.is_zero() {
                return Err(MeshError::ConfigurationInvalid(format!(
                    "{name} must be a positive duration"
                )));
            }
        }
        if self.max_seen_messages == 0 {
            return Err(MeshError::ConfigurationInvalid(
                "max_seen_messages must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(MeshError::ConfigurationInvalid(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.cache_root.as_os_str().is_empty() {
            return Err(MeshError::ConfigurationInvalid(
                "cache_root must not be empty".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(MeshError::ConfigurationInvalid(
                "max_frame_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
