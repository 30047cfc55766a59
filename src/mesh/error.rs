use thiserror::Error;

/// Error taxonomy for the mesh core.
///
/// Per-message kinds (`MalformedEnvelope`, `PayloadTooLarge`,
/// `UnsafeDestinationPath`) are absorbed locally by the component that
/// raises them and never propagate past a log line. The remaining kinds
/// are host-relevant and cross the `HostSink::on_error` upcall exactly
/// once per occurrence.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("payload too large: {size} bytes exceeds max_frame_size {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("unsafe destination path: {0}")]
    UnsafeDestinationPath(String),

    #[error("failed to write assembled file {path}: {cause}")]
    FileWriteFailed { path: String, cause: String },

    #[error("transport fault: {0}")]
    TransportFault(String),

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MeshError {
    /// Per-message errors are dropped locally and never surfaced via
    /// `HostSink::on_error`.
    pub fn is_local_only(&self) -> bool {
        matches!(
            self,
            MeshError::MalformedEnvelope(_)
                | MeshError::PayloadTooLarge { .. }
                | MeshError::UnsafeDestinationPath(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MeshError::MalformedEnvelope(_) => "MalformedEnvelope",
            MeshError::PayloadTooLarge { .. } => "PayloadTooLarge",
            MeshError::UnsafeDestinationPath(_) => "UnsafeDestinationPath",
            MeshError::FileWriteFailed { .. } => "FileWriteFailed",
            MeshError::TransportFault(_) => "TransportFault",
            MeshError::ConfigurationInvalid(_) => "ConfigurationInvalid",
            MeshError::Io(_) => "Io",
            MeshError::Serialization(_) => "Serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;

impl From<MeshError> for tauri::Error {
    fn from(err: MeshError) -> Self {
        tauri::Error::Anyhow(anyhow::anyhow!(err))
    }
}
