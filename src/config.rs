use callcore::framing::FramingMode;
use callcore::signal::Dialect;
use callcore::types::Role;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_MIME_TYPE: &str = "video/webm; codecs=vp8,opus";

const ICE_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

const CALLER_CHUNK_INTERVAL_MS: u64 = 100;
const CALLEE_CHUNK_INTERVAL_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid ice server {0:?}: expected a stun: or turn: url")]
    IceServer(String),
}

/// Runtime settings for one call peer. Every field has a default, so a config
/// file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub role: Role,
    pub signaling_url: String,
    /// Pub/sub room to join. Without one the relay is used as a plain socket.
    pub room: Option<String>,
    pub client_id: Option<String>,
    pub dialect: Dialect,
    pub framing: FramingMode,
    pub ice_servers: Vec<String>,
    pub ring_timeout_secs: u64,
    pub tick_interval_ms: u64,
    /// Recorder timeslice. Defaults by role when unset.
    pub chunk_interval_ms: Option<u64>,
    pub mime_type: String,
    pub video_bits_per_second: u32,
    pub audio_bits_per_second: u32,
    pub event_buffer: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            role: Role::Caller,
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            room: None,
            client_id: None,
            dialect: Dialect::default(),
            framing: FramingMode::default(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            ring_timeout_secs: 45,
            tick_interval_ms: 1000,
            chunk_interval_ms: None,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            video_bits_per_second: 250_000,
            audio_bits_per_second: 64_000,
            event_buffer: 100,
        }
    }
}

impl CallConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            if !ICE_SCHEMES.iter().any(|scheme| server.starts_with(scheme)) {
                return Err(ConfigError::IceServer(server.clone()));
            }
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn chunk_interval(&self) -> Duration {
        let ms = self.chunk_interval_ms.unwrap_or(match self.role {
            Role::Caller => CALLER_CHUNK_INTERVAL_MS,
            Role::Callee => CALLEE_CHUNK_INTERVAL_MS,
        });
        Duration::from_millis(ms.max(1))
    }

    /// Bytes the recorder emits per timeslice at the configured bitrates.
    pub fn chunk_size(&self) -> usize {
        let bits_per_sec =
            u64::from(self.video_bits_per_second) + u64::from(self.audio_bits_per_second);
        let bytes = bits_per_sec / 8 * self.chunk_interval().as_millis() as u64 / 1000;
        (bytes as usize).max(1)
    }

    /// The configured client id, or a fresh random one.
    pub fn client_id_or_random(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("{}-{:08x}", self.role, rand::random::<u32>()))
    }
}
