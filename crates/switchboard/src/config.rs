//! Relay configuration.

use std::time::Duration;

use switchboard_protocol::DEFAULT_MAX_BUFFER_LEN;
use switchboard_transport::BindRetry;

/// Tunables for one relay instance.
///
/// Start from `RelayConfig::default()` and override the fields you care
/// about, or use the setters on
/// [`RelayServerBuilder`](crate::RelayServerBuilder).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the listener binds to. Default: `0.0.0.0:8080`.
    pub bind_addr: String,

    /// Live connections accepted at once. Further accepts are closed
    /// immediately. Default: 1000.
    pub max_connections: usize,

    /// A connection on which no bytes move, in either direction, for this
    /// long is closed through the normal disconnect path. Default: 5 minutes.
    pub idle_timeout: Duration,

    /// Ceiling on unterminated bytes held per connection. Default: 10,000.
    pub max_buffer_len: usize,

    /// How often to log stats. `Duration::ZERO` turns it off.
    /// Default: 60 seconds.
    pub stats_interval: Duration,

    /// TCP keep-alive probe interval for accepted sockets, so peers that
    /// vanished without a FIN are noticed. `Duration::ZERO` leaves
    /// keep-alive off. Default: 60 seconds.
    pub keepalive_interval: Duration,

    /// Retry policy when the bind address is still in use.
    pub bind_retry: BindRetry,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            max_buffer_len: DEFAULT_MAX_BUFFER_LEN,
            stats_interval: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(60),
            bind_retry: BindRetry::default(),
        }
    }
}
