use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::packet::Packet;

#[derive(Debug, Error)]
pub enum DrmError {
    #[error("session not ready for decryption")]
    NotReady,

    #[error("decryption failed: {0}")]
    DecryptFailed(String),

    #[error("session wait cancelled")]
    Cancelled,
}

/// Decryption session attached to encrypted packets.
///
/// A session may need to finish license acquisition before it can decrypt;
/// [`DrmSession::can_decrypt`] reports that and
/// [`DrmSession::wait_for_ready`] suspends until it changes.
#[async_trait]
pub trait DrmSession: Send + Sync {
    fn can_decrypt(&self) -> bool;

    /// Resolves once the session can decrypt. Must return
    /// `Err(DrmError::Cancelled)` promptly when `cancel` fires.
    async fn wait_for_ready(&self, cancel: &CancellationToken) -> Result<(), DrmError>;

    /// Produces the decrypted form of `packet`. The returned packet owns
    /// whatever decoder-side handle the decryption produced.
    async fn decrypt(&self, packet: &Packet, cancel: &CancellationToken)
    -> Result<Packet, DrmError>;
}
