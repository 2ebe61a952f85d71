//! Error types for the eventing crate.

/// Errors from outbound GENA subscription operations.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// The endpoint URL could not be parsed or lacks a host.
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    /// An HTTP request failed to reach the device.
    #[error("Network error: {0}")]
    Network(String),

    /// The device answered with a non-success status.
    #[error("Request rejected: HTTP {0}")]
    Rejected(u16),

    /// A successful SUBSCRIBE response carried no SID header.
    #[error("Missing SID header in SUBSCRIBE response")]
    MissingSid,
}

/// Errors from parsing one inbound notification connection.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Reading from or writing to the connection failed.
    #[error("Connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The request used a method other than NOTIFY.
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// The request line or header block was not well formed.
    #[error("Malformed request: {0}")]
    Malformed(String),
}
