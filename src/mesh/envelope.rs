//! The single on-wire record type and its canonical text
//! encoding: JSON with base64-encoded binary chunk data, so the wire
//! format is self-delimited, human-inspectable, and forward-compatible
//! with unknown fields.

use crate::mesh::error::{MeshError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type NodeId = String;

/// A request the host wants to propagate to the rest of the mesh,
/// embedded verbatim in a `NetworkMessage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestWrapper {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    pub source_node_id: NodeId,
}

/// One piece of a file split by the `Chunker`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub file_id: String,
    pub destination_path: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A one-hop peer-list gossip exchange. The only key in use
/// today is `"peerList"`, but the map shape keeps room for future topics
/// without touching the envelope's wire format.
pub type GossipPayload = HashMap<String, Vec<NodeId>>;

pub const PEER_LIST_TOPIC: &str = "peerList";

/// The single envelope type that rides every mesh link.
/// Exactly one of `http_request`, `file_chunk`, `gossip` SHOULD be
/// populated; `decode` rejects frames that populate more than one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMessage {
    pub message_id: String,
    pub hop_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_request: Option<HttpRequestWrapper>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_chunk: Option<FileChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gossip: Option<GossipPayload>,
}

impl NetworkMessage {
    pub fn new_http_request(message_id: String, request: HttpRequestWrapper) -> Self {
        Self {
            message_id,
            hop_count: 0,
            http_request: Some(request),
            file_chunk: None,
            gossip: None,
        }
    }

    pub fn new_file_chunk(message_id: String, chunk: FileChunk) -> Self {
        Self {
            message_id,
            hop_count: 0,
            http_request: None,
            file_chunk: Some(chunk),
            gossip: None,
        }
    }

    pub fn new_gossip(message_id: String, peer_list: Vec<NodeId>) -> Self {
        let mut gossip = GossipPayload::new();
        gossip.insert(PEER_LIST_TOPIC.to_string(), peer_list);
        Self {
            message_id,
            hop_count: 0,
            http_request: None,
            file_chunk: None,
            gossip: Some(gossip),
        }
    }

    /// Builds the forwarded copy of a message: same `message_id`, hop
    /// count incremented by exactly one (spec invariant: hop count
    /// strictly increases along any forwarding path).
    pub fn forwarded(&self) -> Self {
        let mut copy = self.clone();
        copy.hop_count += 1;
        copy
    }

    fn populated_variant_count(&self) -> usize {
        [
            self.http_request.is_some(),
            self.file_chunk.is_some(),
            self.gossip.is_some(),
        ]
        .into_iter()
        .filter(|p| *p)
        .count()
    }

    fn validate(&self) -> Result<()> {
        if self.message_id.is_empty() {
            return Err(MeshError::MalformedEnvelope(
                "messageId is empty".to_string(),
            ));
        }
        if self.populated_variant_count() > 1 {
            return Err(MeshError::MalformedEnvelope(
                "more than one payload variant populated".to_string(),
            ));
        }
        Ok(())
    }
}

/// Encodes a message to its canonical wire bytes: a self-delimited byte
/// sequence over the UTF-8 text encoding of a structured serialization
/// that preserves all fields exactly.
pub fn encode(message: &NetworkMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decodes wire bytes back into a `NetworkMessage`, enforcing the schema
/// invariants `hopCount >= 0` (the unsigned `u32` type already enforces
/// this at the type level) and "at most one payload variant".
pub fn decode(bytes: &[u8]) -> Result<NetworkMessage> {
    if bytes.len() > u32::MAX as usize {
        return Err(MeshError::MalformedEnvelope("frame absurdly large".into()));
    }
    let message: NetworkMessage = serde_json::from_slice(bytes)
        .map_err(|e| MeshError::MalformedEnvelope(e.to_string()))?;
    message.validate()?;
    Ok(message)
}

/// Rejects inbound frames exceeding `max_frame_size` before decoding them
/// (default 256 KiB).
pub fn check_frame_size(bytes: &[u8], max_frame_size: usize) -> Result<()> {
    if bytes.len() > max_frame_size {
        return Err(MeshError::PayloadTooLarge {
            size: bytes.len(),
            max: max_frame_size,
        });
    }
    Ok(())
}
