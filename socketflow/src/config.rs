//! Configuration for dispatchers and pipelines.

use std::time::Duration;

use crate::codec::MessageFormat;

/// Default bound on waiting for a channel to open.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration shared by a dispatcher and every stage derived from it.
#[derive(Clone, Debug)]
pub struct FlowConfig {
    /// Maximum time to wait for the channel to reach the open state.
    ///
    /// Exceeding it fails the startup path with `FlowError::ConnectionTimeout`.
    pub open_timeout: Duration,

    /// How inbound payloads are handed to stage handlers.
    pub format: MessageFormat,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            format: MessageFormat::Json,
        }
    }
}

impl FlowConfig {
    /// Create a new configuration with specified parameters.
    pub fn new(open_timeout: Duration, format: MessageFormat) -> Self {
        Self {
            open_timeout,
            format,
        }
    }

    /// Override the open timeout.
    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    /// Override the inbound message format.
    pub fn with_format(mut self, format: MessageFormat) -> Self {
        self.format = format;
        self
    }

    /// Configuration handing raw bytes to handlers instead of parsed JSON.
    pub fn buffered() -> Self {
        Self::default().with_format(MessageFormat::Buffer)
    }
}
