//! Relay configuration.

use std::time::Duration;

/// Runtime configuration for the relay.
///
/// The binary fills this from command-line flags; tests build it directly.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the telnet listener binds to
    pub host: String,
    /// Port the telnet listener binds to (0 picks an ephemeral port)
    pub port: u16,
    /// Broker location
    pub redis_url: String,
    /// List the relay pushes egress events onto
    pub egress_key: String,
    /// List the relay pops ingress events from
    pub ingress_key: String,
    /// Tag identifying this relay instance in egress events
    pub client_kind: String,
    /// Upper bound of one blocking broker poll; also the shutdown latency of the bridge
    pub poll_timeout: Duration,
    /// Longer lines are dropped and the stream resynchronizes on the next newline
    pub max_line_length: usize,
    /// Pending outgoing lines per session before new ones are dropped
    pub outbound_capacity: usize,
    /// Write `You sent: <line>` back after forwarding each command
    pub echo: bool,
    /// Port of the admin HTTP API; disabled when `None`
    pub admin_port: Option<u16>,
    /// Line broadcast to every session on shutdown
    pub shutdown_notice: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 23,
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            egress_key: "kingdom:egress".to_string(),
            ingress_key: "kingdom:ingress".to_string(),
            client_kind: "telnet".to_string(),
            poll_timeout: Duration::from_secs(1),
            max_line_length: 4096,
            outbound_capacity: 256,
            echo: false,
            admin_port: None,
            shutdown_notice: "Server is shutting down".to_string(),
        }
    }
}

impl RelayConfig {
    /// `host:port` of the telnet listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `host:port` of the admin API, when enabled
    pub fn admin_bind_addr(&self) -> Option<String> {
        self.admin_port.map(|port| format!("{}:{}", self.host, port))
    }
}
