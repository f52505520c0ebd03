use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context;
use es_transfer::TransferSettings;
use serde::Deserialize;

/// Environment variable naming an optional JSON settings file.
pub const CONFIG_ENV: &str = "ES_PLAYER_CONFIG";

/// Parameters of the synthetic content the demo plays.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub packets_per_stream: usize,
    pub fps: u32,
    pub audio_packet_ms: u64,
    /// The simulated sink answers `Full` on every n-th submission; 0 never.
    pub full_every: usize,
    /// Send video through a simulated DRM session.
    pub encrypted: bool,
    pub license_delay_ms: u64,
    /// Switch the audio sample rate in-band after this many packets.
    pub audio_switch_at: Option<usize>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            packets_per_stream: 250,
            fps: 25,
            audio_packet_ms: 21,
            full_every: 25,
            encrypted: false,
            license_delay_ms: 300,
            audio_switch_at: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub transfer: TransferSettings,
    pub demo: DemoConfig,
}

impl PlayerConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    fn from_env() -> Self {
        let Ok(path) = std::env::var(CONFIG_ENV) else {
            return Self::default();
        };
        match Self::load(&path) {
            Ok(config) => {
                log::info!("settings loaded from {}", path);
                config
            }
            Err(e) => {
                log::warn!("{:#}, using defaults", e);
                Self::default()
            }
        }
    }
}

pub fn config() -> &'static PlayerConfig {
    static CONFIG: LazyLock<PlayerConfig> = LazyLock::new(PlayerConfig::from_env);
    &CONFIG
}
