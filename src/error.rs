use thiserror::Error;

/// Errors produced by the SharePoint protocol layers.
///
/// Transport failures are the only retryable kind, and only the copy job
/// poller retries them. Everything else is surfaced to the command layer
/// on first occurrence.
#[derive(Debug, Error)]
pub enum SpoError {
    /// The request never produced a usable response (network failure or a
    /// non-success HTTP status).
    #[error("{0}")]
    Transport(String),

    /// A business error reported by the server inside a ClientSvc envelope.
    #[error("{0}")]
    ClientSvc(String),

    /// The response parsed but lacked a field the protocol guarantees.
    #[error("{0}")]
    Protocol(String),

    /// A copy job reported JobError or JobFatalError in its log stream.
    #[error("{0}")]
    JobFailed(String),

    /// The poll attempt budget ran out while the job was still in progress.
    #[error("getCopyJobProgress timed out")]
    JobTimeout,
}

impl SpoError {
    pub fn is_transport(&self) -> bool {
        matches!(self, SpoError::Transport(_))
    }
}
