use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "beach-tandem-server",
    author,
    version,
    about = "Pairs anonymous chat clients and relays their ciphertext"
)]
pub struct Cli {
    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "BEACH_TANDEM_LISTEN_ADDR", default_value = "0.0.0.0:9295")]
    pub listen_addr: String,

    /// Time a new socket has to send its connect frame.
    #[arg(
        long,
        env = "BEACH_TANDEM_HANDSHAKE_TIMEOUT_SECS",
        default_value_t = 10
    )]
    pub handshake_timeout_secs: u64,

    /// Outbound events buffered per socket before new ones are dropped.
    #[arg(long, env = "BEACH_TANDEM_CONNECTION_BUFFER", default_value_t = 64)]
    pub per_connection_buffer: usize,

    /// Largest inbound frame accepted, in bytes.
    #[arg(long, env = "BEACH_TANDEM_MAX_FRAME_BYTES", default_value_t = 65_536)]
    pub max_frame_bytes: usize,

    /// Requests per second a single client IP may make to the index page.
    #[arg(long, env = "BEACH_TANDEM_INDEX_RATE_LIMIT", default_value_t = 10)]
    pub index_rate_limit: usize,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BEACH_TANDEM_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub handshake_timeout: Duration,
    pub per_connection_buffer: usize,
    pub max_frame_bytes: usize,
    pub index_rate_limit: usize,
    pub index_rate_window: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9295)),
            handshake_timeout: Duration::from_secs(10),
            per_connection_buffer: 64,
            max_frame_bytes: 65_536,
            index_rate_limit: 10,
            index_rate_window: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.per_connection_buffer == 0 {
            bail!("per-connection buffer must be greater than zero");
        }
        if cli.max_frame_bytes == 0 {
            bail!("max frame size must be greater than zero");
        }
        if cli.index_rate_limit == 0 {
            bail!("index rate limit must be greater than zero");
        }
        if cli.handshake_timeout_secs == 0 {
            bail!("handshake timeout must be greater than zero");
        }
        Ok(ServerConfig {
            listen_addr,
            handshake_timeout: Duration::from_secs(cli.handshake_timeout_secs),
            per_connection_buffer: cli.per_connection_buffer,
            max_frame_bytes: cli.max_frame_bytes,
            index_rate_limit: cli.index_rate_limit,
            index_rate_window: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let mut argv = vec!["beach-tandem-server"];
        argv.extend_from_slice(args);
        ServerConfig::try_from(Cli::try_parse_from(argv)?)
    }

    #[test]
    fn explicit_flags_are_applied() {
        let config = parse(&[
            "--listen-addr",
            "127.0.0.1:4000",
            "--handshake-timeout-secs",
            "3",
            "--per-connection-buffer",
            "8",
        ])
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.per_connection_buffer, 8);
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let err = parse(&["--listen-addr", "not-an-addr"]).unwrap_err();
        assert!(err.to_string().contains("invalid listen address"));
    }

    #[test]
    fn cli_defaults_match_server_defaults() {
        let parsed = parse(&[]).unwrap();
        let defaults = ServerConfig::default();

        assert_eq!(parsed.listen_addr, defaults.listen_addr);
        assert_eq!(parsed.handshake_timeout, defaults.handshake_timeout);
        assert_eq!(parsed.per_connection_buffer, defaults.per_connection_buffer);
        assert_eq!(parsed.max_frame_bytes, defaults.max_frame_bytes);
        assert_eq!(parsed.index_rate_limit, defaults.index_rate_limit);
        assert_eq!(parsed.index_rate_window, defaults.index_rate_window);
        assert_eq!(parsed.shutdown_grace, defaults.shutdown_grace);
    }

    #[test]
    fn zero_buffer_is_rejected() {
        assert!(parse(&["--per-connection-buffer", "0"]).is_err());
    }

    #[test]
    fn zero_frame_limit_is_rejected() {
        assert!(parse(&["--max-frame-bytes", "0"]).is_err());
    }
}
