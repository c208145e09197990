use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::service::{AppError, AppResult};

/// Tunables of the transport layer.
///
/// A config is handed explicitly to each `Listener` and `Dialer`; there is no
/// process-global instance. Values can come from a TOML file, from
/// `WIREMUX_*` environment variables, or from `Default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Upper bound on concurrently running inbound handshakes.
    #[serde(default = "defaults::max_parallel_handshakes")]
    pub max_parallel_handshakes: usize,
    /// Capacity of the accept fan-in channel shared by all links of one
    /// listener or dialer. A full channel blocks link read loops.
    #[serde(default = "defaults::accept_buffer_len")]
    pub accept_buffer_len: usize,
    /// Capacity of the per-conn inbound payload queue.
    #[serde(default = "defaults::pipelining")]
    pub pipelining: usize,
    /// Largest frame body accepted off the wire.
    #[serde(default = "defaults::max_frame_size")]
    pub max_frame_size: usize,
}

mod defaults {
    pub fn max_parallel_handshakes() -> usize {
        100
    }
    pub fn accept_buffer_len() -> usize {
        200
    }
    pub fn pipelining() -> usize {
        8
    }
    pub fn max_frame_size() -> usize {
        16 * 1024 * 1024
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            max_parallel_handshakes: defaults::max_parallel_handshakes(),
            accept_buffer_len: defaults::accept_buffer_len(),
            pipelining: defaults::pipelining(),
            max_frame_size: defaults::max_frame_size(),
        }
    }
}

impl TransportConfig {
    /// Load from a TOML file, with `WIREMUX_*` environment variables taking
    /// precedence over file values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<TransportConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| AppError::DetailedIo("config file path is not valid utf-8".to_string()))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix("WIREMUX"))
            .build()?;
        let config = config.try_deserialize()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load from `WIREMUX_*` environment variables alone; unset fields fall
    /// back to their defaults.
    pub fn from_env() -> AppResult<TransportConfig> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("WIREMUX"))
            .build()?;
        let config = config.try_deserialize()?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &TransportConfig) -> AppResult<()> {
        if config.max_parallel_handshakes == 0 {
            return Err(AppError::DetailedIo(
                "max_parallel_handshakes must be at least 1".to_string(),
            ));
        }
        if config.accept_buffer_len == 0 {
            return Err(AppError::DetailedIo(
                "accept_buffer_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = TransportConfig::default();
        assert_eq!(config.max_parallel_handshakes, 100);
        assert_eq!(config.accept_buffer_len, 200);
        assert_eq!(config.pipelining, 8);
    }

    #[test]
    fn env_loading_falls_back_to_defaults() {
        let config = TransportConfig::from_env().unwrap();
        assert_eq!(config.accept_buffer_len, TransportConfig::default().accept_buffer_len);
    }
}
