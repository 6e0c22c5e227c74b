//! Connection options for remote scanner sessions

use scanlink_proto::DEFAULT_MAX_FRAME_LENGTH;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound for establishing the TCP connection
    pub connect_timeout: Duration,

    /// Upper bound for a single request/response exchange. Must exceed the
    /// service's prepare heartbeat interval.
    pub request_timeout: Duration,

    /// Largest frame accepted or sent, in bytes
    pub max_message_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            max_message_size: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ConnectOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }
}
