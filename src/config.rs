use std::time::Duration;

use tokio::sync::Semaphore;

use crate::channel::OverflowPolicy;

pub const DEFAULT_LISTEN: &str = ":8080";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;
pub const DEFAULT_READ_BUFFER: usize = 2048;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;
pub const DEFAULT_READ_RETRIES: u32 = 3;

/// Upper bound for queue slots and connection slots; tokio rejects more.
pub const MAX_PERMITS: usize = Semaphore::MAX_PERMITS;
pub const MAX_READ_BUFFER: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port`; a bare `:port` binds every interface.
    pub listen: String,
    pub channel_capacity: usize,
    pub overflow: OverflowPolicy,
    pub read_buffer: usize,
    pub max_connections: usize,
    pub read_retries: u32,
    /// First backoff step after a transient read error; doubles per attempt.
    pub retry_base_delay: Duration,
    pub accept_error_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            overflow: OverflowPolicy::default(),
            read_buffer: DEFAULT_READ_BUFFER,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            read_retries: DEFAULT_READ_RETRIES,
            retry_base_delay: Duration::from_millis(10),
            accept_error_delay: Duration::from_millis(50),
        }
    }
}

impl ServerConfig {
    pub fn with_listen(listen: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            ..Self::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        normalize_listen(&self.listen)
    }
}

pub fn clamp_permits(n: usize) -> usize {
    n.clamp(1, MAX_PERMITS)
}

pub fn clamp_read_buffer(n: usize) -> usize {
    n.clamp(1, MAX_READ_BUFFER)
}

pub fn normalize_listen(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.listen, ":8080");
        assert_eq!(config.channel_capacity, 10);
        assert_eq!(config.read_buffer, 2048);
        assert_eq!(config.overflow, OverflowPolicy::Block);
    }

    #[test]
    fn bare_port_binds_all_interfaces() {
        assert_eq!(normalize_listen(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_listen("127.0.0.1:9000"), "127.0.0.1:9000");
        assert_eq!(normalize_listen(" [::1]:7000 "), "[::1]:7000");
    }

    #[test]
    fn out_of_range_sizes_are_clamped() {
        assert_eq!(clamp_permits(0), 1);
        assert_eq!(clamp_permits(usize::MAX), MAX_PERMITS);
        assert_eq!(clamp_permits(10), 10);
        assert_eq!(clamp_read_buffer(0), 1);
        assert_eq!(clamp_read_buffer(usize::MAX), MAX_READ_BUFFER);
        assert_eq!(clamp_read_buffer(2048), 2048);
    }

    #[test]
    fn with_listen_keeps_other_defaults() {
        let config = ServerConfig::with_listen("127.0.0.1:0");
        assert_eq!(config.bind_addr(), "127.0.0.1:0");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }
}
