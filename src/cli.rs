use clap::Parser;

use crate::channel::OverflowPolicy;
use crate::config::{self, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on. A bare `:port` listens on every interface.
    #[arg(default_value = config::DEFAULT_LISTEN)]
    pub listen: String,

    /// Slots in the message queue shared by all connections.
    #[arg(long, default_value_t = config::DEFAULT_CHANNEL_CAPACITY, value_parser = parse_slots)]
    pub channel_capacity: usize,

    /// What a connection does when the message queue is full.
    #[arg(long, value_enum, default_value_t = OverflowPolicy::Block)]
    pub overflow: OverflowPolicy,

    /// Maximum bytes taken from a connection per read.
    #[arg(long, default_value_t = config::DEFAULT_READ_BUFFER, value_parser = parse_read_buffer)]
    pub read_buffer: usize,

    /// Concurrent connections served before new ones wait.
    #[arg(long, default_value_t = config::DEFAULT_MAX_CONNECTIONS, value_parser = parse_slots)]
    pub max_connections: usize,

    /// Retries after a transient read error before the connection is dropped.
    #[arg(long, default_value_t = config::DEFAULT_READ_RETRIES)]
    pub read_retries: u32,

    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            listen: self.listen,
            channel_capacity: self.channel_capacity,
            overflow: self.overflow,
            read_buffer: self.read_buffer,
            max_connections: self.max_connections,
            read_retries: self.read_retries,
            ..ServerConfig::default()
        }
    }
}

fn parse_slots(s: &str) -> Result<usize, String> {
    parse_bounded(s, config::MAX_PERMITS)
}

fn parse_read_buffer(s: &str) -> Result<usize, String> {
    parse_bounded(s, config::MAX_READ_BUFFER)
}

fn parse_bounded(s: &str, max: usize) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if (1..=max).contains(&n) => Ok(n),
        Ok(_) => Err(format!("must be between 1 and {max}")),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_server_config() {
        let cli = Cli::try_parse_from(["funnel"]).unwrap();
        let config = cli.into_config();

        assert_eq!(config.listen, ":8080");
        assert_eq!(config.channel_capacity, 10);
        assert_eq!(config.overflow, OverflowPolicy::Block);
        assert_eq!(config.read_buffer, 2048);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "funnel",
            "127.0.0.1:9000",
            "--channel-capacity",
            "64",
            "--overflow",
            "drop",
            "--max-connections",
            "8",
        ])
        .unwrap();
        let config = cli.into_config();

        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.channel_capacity, 64);
        assert_eq!(config.overflow, OverflowPolicy::Drop);
        assert_eq!(config.max_connections, 8);
    }

    #[test]
    fn out_of_range_sizes_are_rejected() {
        let huge = usize::MAX.to_string();
        for flag in ["--channel-capacity", "--max-connections", "--read-buffer"] {
            assert!(Cli::try_parse_from(["funnel", flag, "0"]).is_err(), "{flag} 0");
            assert!(Cli::try_parse_from(["funnel", flag, huge.as_str()]).is_err(), "{flag} max");
        }

        let at_limit = config::MAX_PERMITS.to_string();
        let cli = Cli::try_parse_from(["funnel", "--max-connections", at_limit.as_str()]).unwrap();
        assert_eq!(cli.max_connections, config::MAX_PERMITS);
    }
}
