use thiserror::Error;

use crate::{drm::DrmError, sink::SubmitStatus, types::StreamType};

#[derive(Error, Debug)]
pub enum EsError {
    /// Storage queue closed for writing and fully drained.
    #[error("{0}: end of stream")]
    EndOfStream(StreamType),

    #[error("operation cancelled")]
    Cancelled,

    /// The sink refused a packet in a non-retryable way.
    #[error("{stream}: packet submit error: {status}")]
    Submit {
        stream: StreamType,
        status: SubmitStatus,
    },

    #[error("decrypt error: {0}")]
    Drm(#[from] DrmError),

    #[error("{0}: not configured")]
    NotConfigured(StreamType),

    #[error("{0}: no stream configuration available")]
    NoConfiguration(StreamType),

    #[error("{0}: no player attached")]
    NoPlayer(StreamType),

    #[error("{0}: stream faulted, reset required")]
    Faulted(StreamType),

    #[error("{0}: transfer is running")]
    Busy(StreamType),

    /// A collaborator panicked inside the transfer loop.
    #[error("transfer loop panicked: {0}")]
    Panicked(String),

    #[error("sink error: {0:#}")]
    Sink(#[source] anyhow::Error),
}

impl EsError {
    /// Cancellation and end of stream terminate a transfer without being
    /// failures.
    pub fn is_benign(&self) -> bool {
        matches!(self, EsError::Cancelled | EsError::EndOfStream(_))
    }
}

pub type Result<T> = std::result::Result<T, EsError>;
