//! Engine configuration: board size, turn timing and the two resolution
//! grace delays.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/flipmatch.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "FLIPMATCH_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the engine.
pub struct EngineConfig {
    /// Pairs laid out per board; the board holds twice as many cards.
    pub pairs_per_board: usize,
    /// How long a player may hold the turn before it passes.
    pub turn_timeout: Duration,
    /// Pause between the second card flipping up and the pair resolving,
    /// so both clients get to render the flip.
    pub reveal_grace: Duration,
    /// Pause before a mismatched pair flips back down.
    pub mismatch_grace: Duration,
}

impl EngineConfig {
    /// Load the engine configuration from disk, falling back to the
    /// built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        pairs = config.pairs_per_board,
                        "loaded engine configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pairs_per_board: 8,
            turn_timeout: Duration::from_secs(10),
            reveal_grace: Duration::from_millis(500),
            mismatch_grace: Duration::from_millis(900),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file.
struct RawConfig {
    pairs_per_board: usize,
    turn_timeout_ms: u64,
    reveal_grace_ms: u64,
    mismatch_grace_ms: u64,
}

impl From<RawConfig> for EngineConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            pairs_per_board: value.pairs_per_board,
            turn_timeout: Duration::from_millis(value.turn_timeout_ms),
            reveal_grace: Duration::from_millis(value.reveal_grace_ms),
            mismatch_grace: Duration::from_millis(value.mismatch_grace_ms),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
