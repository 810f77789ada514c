use std::io;

pub type PeerResult<T> = Result<T, PeerError>;

/// Error taxonomy for a single peer connection.
///
/// `Framing` and `Semantic` variants are fatal to the session that raised
/// them. Unknown commands never reach a handler at all - they're drained
/// and logged by the framing layer, never turned into a `PeerError`.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("framing error: {0}")]
    Framing(String),

    #[error("protocol error: {0}")]
    Semantic(String),

    #[error("checkpoint store error: {0}")]
    CheckpointStore(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl PeerError {
    pub fn framing<S: Into<String>>(msg: S) -> Self {
        PeerError::Framing(msg.into())
    }

    pub fn semantic<S: Into<String>>(msg: S) -> Self {
        PeerError::Semantic(msg.into())
    }

    pub fn checkpoint<S: Into<String>>(msg: S) -> Self {
        PeerError::CheckpointStore(msg.into())
    }
}

impl From<&str> for PeerError {
    fn from(msg: &str) -> Self {
        PeerError::Semantic(msg.to_string())
    }
}

impl From<String> for PeerError {
    fn from(msg: String) -> Self {
        PeerError::Semantic(msg)
    }
}
