//! CLI argument definitions using clap
//!
//! Flags override values loaded from the config file.

use clap::Parser;
use std::path::PathBuf;

use crate::config::RelayConfig;

/// File-backed state relay over WebSocket
#[derive(Parser, Debug)]
#[command(name = "live-relay")]
#[command(about = "Watches a state directory and relays changes to WebSocket clients")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, default_value = "live-relay.toml")]
    pub config: PathBuf,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory to watch
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Shared secret required on application upgrades
    #[arg(long, env = "LIVE_RELAY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Host of the secondary upgrade upstream
    #[arg(long)]
    pub upstream_host: Option<String>,

    /// Port of the secondary upgrade upstream
    #[arg(long)]
    pub upstream_port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Apply flag overrides on top of a loaded config
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(root) = &self.root {
            config.watch.root = root.clone();
        }
        if let Some(token) = &self.token {
            config.server.auth_token = Some(token.clone());
        }
        if let Some(host) = &self.upstream_host {
            config.tunnel.upstream_host = host.clone();
        }
        if let Some(port) = self.upstream_port {
            config.tunnel.upstream_port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "live-relay",
            "--port",
            "4000",
            "--root",
            "/tmp/state",
            "--token",
            "s3cret",
            "--upstream-port",
            "5173",
        ])
        .unwrap();

        let mut config = RelayConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.watch.root, PathBuf::from("/tmp/state"));
        assert_eq!(config.server.secret(), Some("s3cret"));
        assert_eq!(config.tunnel.upstream_port, 5173);
    }

    #[test]
    fn test_no_flags_keeps_config() {
        let cli = Cli::try_parse_from(["live-relay", "--config", "custom.toml"]).unwrap();
        let mut config = RelayConfig::parse("[server]\nport = 9000\n").unwrap();
        cli.apply(&mut config);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(config.server.port, 9000);
    }
}
