//! The self-optimizing mesh overlay: envelope codec, file chunking,
//! the abstract transport, the topology optimizer, and the gossip
//! dispatcher.

pub mod chunker;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod host;
pub mod libp2p_adapter;
pub mod node;
pub mod simulator;
pub mod state;
pub mod topology;
pub mod transport;

pub use config::MeshConfig;
pub use envelope::{FileChunk, HttpRequestWrapper, NetworkMessage, NodeId};
pub use error::{MeshError, Result};
pub use host::{ErrorKind, HostSink};
pub use node::{MeshNode, ObservedState};
pub use state::ServiceState;
pub use transport::ConnectionManager;
