//! Centralized configuration for Streamtide.
//!
//! All tunable parameters live here with their defaults; the CLI overrides
//! individual fields from flags.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Streamtide components.
#[derive(Debug, Clone, Default)]
pub struct StreamtideConfig {
    pub streaming: StreamingConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub swarm: SwarmConfig,
    pub display: DisplayConfig,
}

/// Reader, scheduler and readiness tuning.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Percentage of pieces bumped to readahead once metadata arrives
    pub initial_readahead_percent: u32,
    /// Completion fraction at which playback is considered safe
    pub readiness_threshold: f64,
    /// Pieces past each read bumped to readahead
    pub readahead_window_pieces: u32,
    /// Upper bound on a single underlying read
    pub max_read_chunk: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            initial_readahead_percent: 5,
            readiness_threshold: 0.05,
            readahead_window_pieces: 4,
            max_read_chunk: 256 * 1024, // 256 KiB
        }
    }
}

/// HTTP content server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl ServerConfig {
    /// Socket address to bind.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// URL players should open.
    pub fn stream_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

/// Download engine session settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scratch directory for downloaded piece data
    pub data_dir: PathBuf,
    /// Keep connections open after the download completes
    pub seed: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::temp_dir().join("streamtide"),
            seed: false,
        }
    }
}

/// Local swarm engine settings.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Directory holding seed `.torrent` files and their content
    pub swarm_dir: PathBuf,
    /// Simulated peer connections per torrent
    pub peers: usize,
    /// Download bandwidth limit in bytes per second (None = unlimited)
    pub download_rate: Option<u64>,
    /// Delay before metadata becomes available
    pub metadata_delay: Duration,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            swarm_dir: PathBuf::from("swarm"),
            peers: 4,
            download_rate: None,
            metadata_delay: Duration::from_millis(200),
        }
    }
}

/// Terminal dashboard settings.
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Render the dashboard at all
    pub enabled: bool,
    /// Interval between redraws
    pub refresh_interval: Duration,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamtideConfig::default();
        assert_eq!(config.streaming.initial_readahead_percent, 5);
        assert_eq!(config.streaming.readiness_threshold, 0.05);
        assert_eq!(config.server.port, 8080);
        assert!(!config.engine.seed);
        assert!(config.engine.data_dir.starts_with(std::env::temp_dir()));
        assert_eq!(config.display.refresh_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_server_addresses() {
        let server = ServerConfig {
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(server.bind_addr().to_string(), "0.0.0.0:9000");
        assert_eq!(server.stream_url(), "http://localhost:9000");
    }
}
