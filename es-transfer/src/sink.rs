use std::fmt::{Display, Formatter};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    config::StreamConfig,
    error::{EsError, Result},
    packet::Packet,
    settings::TransferSettings,
};

/// Outcome of a single submission to the sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitStatus {
    Success,
    /// Sink not ready to take data yet; retry later.
    NotPrepared,
    /// Sink input buffer full; retry later.
    Full,
    /// Terminal refusal with the sink's reason.
    Rejected(String),
}

impl SubmitStatus {
    /// Backoff before the next attempt, `None` when the status is final.
    pub fn retry_delay(&self, settings: &TransferSettings) -> Option<Duration> {
        match self {
            SubmitStatus::NotPrepared => Some(settings.not_prepared_delay()),
            SubmitStatus::Full => Some(settings.full_delay()),
            SubmitStatus::Success | SubmitStatus::Rejected(_) => None,
        }
    }
}

impl Display for SubmitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitStatus::Success => f.write_str("Success"),
            SubmitStatus::NotPrepared => f.write_str("NotPrepared"),
            SubmitStatus::Full => f.write_str("Full"),
            SubmitStatus::Rejected(reason) => write!(f, "Rejected({})", reason),
        }
    }
}

/// The hardware elementary-stream decoder.
///
/// Both calls are expected to return quickly; backpressure is signalled with
/// [`SubmitStatus::Full`] / [`SubmitStatus::NotPrepared`] rather than by
/// blocking.
pub trait EsSink: Send + Sync {
    fn set_stream(&self, config: &StreamConfig) -> anyhow::Result<()>;

    fn submit(&self, packet: &Packet) -> SubmitStatus;
}

/// Submit `packet` until the sink accepts it.
///
/// Retryable statuses back off per `settings` and try the very same packet
/// again; a rejection fails with [`EsError::Submit`], cancellation during a
/// backoff with [`EsError::Cancelled`].
pub async fn submit_with_retry(
    sink: &dyn EsSink,
    packet: &Packet,
    settings: &TransferSettings,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        let status = sink.submit(packet);
        log::debug!("{} ({})", packet, status);

        let delay = match status.retry_delay(settings) {
            Some(delay) => delay,
            None if status == SubmitStatus::Success => return Ok(()),
            None => {
                return Err(EsError::Submit {
                    stream: packet.stream(),
                    status,
                });
            }
        };

        if status == SubmitStatus::NotPrepared {
            log::info!("{}: packet not prepared, retry in {:?}", packet.stream(), delay);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(EsError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;
