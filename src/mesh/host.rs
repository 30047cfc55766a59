//! Core-to-host upcalls. `HostSink` is a plain trait object the
//! `MeshNode` holds by reference; observation streams replace callbacks
//! so the core never holds a reference back into host-owned state.

use crate::mesh::envelope::HttpRequestWrapper;

/// Error kinds reported to the host via `on_error`: only the
/// host-relevant kinds ever reach here, never per-message drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FileWriteFailed,
    TransportFault,
    ConfigurationInvalid,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::FileWriteFailed => "FileWriteFailed",
            ErrorKind::TransportFault => "TransportFault",
            ErrorKind::ConfigurationInvalid => "ConfigurationInvalid",
        };
        write!(f, "{s}")
    }
}

/// The upcall surface a host implements to observe the mesh core.
pub trait HostSink: Send + Sync {
    /// Called for every non-duplicate inbound `httpRequest`, whether
    /// originated locally (after loopback via the transport) or
    /// remotely.
    fn on_application_request(&self, request: &HttpRequestWrapper);

    fn on_file_assembled(&self, destination_path: &str);

    fn on_error(&self, kind: ErrorKind, message: &str);

    fn on_peer_count_changed(&self, count: usize);
}

/// A `HostSink` that drops every upcall; useful as a default for tests
/// and for `ConnectionManager` implementations driven without a host.
pub struct NullHostSink;

impl HostSink for NullHostSink {
    fn on_application_request(&self, _request: &HttpRequestWrapper) {}
    fn on_file_assembled(&self, _destination_path: &str) {}
    fn on_error(&self, _kind: ErrorKind, _message: &str) {}
    fn on_peer_count_changed(&self, _count: usize) {}
}
