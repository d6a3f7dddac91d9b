use crate::core::landscape::{LossFunction, Viewport};
use crate::life::driver::Controls;
use crate::life::particle::PhysicsParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug)]
pub enum ConfigError {
    Read(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    Write(std::io::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(err) => write!(f, "failed to read config: {err}"),
            ConfigError::Parse(err) => write!(f, "failed to parse config: {err}"),
            ConfigError::Serialize(err) => write!(f, "failed to serialize config: {err}"),
            ConfigError::Write(err) => write!(f, "failed to write config: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read(err) | ConfigError::Write(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            ConfigError::Serialize(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationConfig {
    #[serde(default)]
    pub landscape: LossFunction,
    #[serde(default = "SimulationConfig::default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "SimulationConfig::default_momentum")]
    pub momentum: f64,
    #[serde(default = "SimulationConfig::default_true")]
    pub normalize_gradient: bool,
    #[serde(default = "SimulationConfig::default_true")]
    pub auto_spawn: bool,
    #[serde(default = "SimulationConfig::default_width")]
    pub width: f64,
    #[serde(default = "SimulationConfig::default_height")]
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl SimulationConfig {
    fn default_learning_rate() -> f64 {
        0.8
    }
    fn default_momentum() -> f64 {
        0.85
    }
    fn default_true() -> bool {
        true
    }
    fn default_width() -> f64 {
        1280.0
    }
    fn default_height() -> f64 {
        800.0
    }

    /// Knobs as the driver sees them, clamped into their legal ranges.
    pub fn controls(&self) -> Controls {
        Controls {
            landscape: self.landscape,
            learning_rate: self.learning_rate,
            momentum: self.momentum,
            normalize_gradient: self.normalize_gradient,
            auto_spawn: self.auto_spawn,
        }
        .clamped()
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            landscape: LossFunction::default(),
            learning_rate: Self::default_learning_rate(),
            momentum: Self::default_momentum(),
            normalize_gradient: true,
            auto_spawn: true,
            width: Self::default_width(),
            height: Self::default_height(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "AudioConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub master_gain_db: f32,
}

impl AudioConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_sample_rate() -> u32 {
        48_000
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            sample_rate: Self::default_sample_rate(),
            master_gain_db: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    #[serde(default = "RunConfig::default_duration_sec")]
    pub duration_sec: f32,
    #[serde(default = "RunConfig::default_frame_rate")]
    pub frame_rate: f32,
}

impl RunConfig {
    fn default_duration_sec() -> f32 {
        30.0
    }
    fn default_frame_rate() -> f32 {
        60.0
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_sec: Self::default_duration_sec(),
            frame_rate: Self::default_frame_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub physics: PhysicsParams,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub run: RunConfig,
}

impl AppConfig {
    fn format_float_compact(x: f64) -> String {
        let mut s = format!("{:.6}", x);
        while s.contains('.') && s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        if s.is_empty() { "0".to_string() } else { s }
    }

    /// Defaults rendered as TOML with every key commented out, so the file
    /// documents the knobs without pinning them.
    pub fn commented_defaults() -> Result<String, ConfigError> {
        let text = toml::to_string_pretty(&Self::default()).map_err(ConfigError::Serialize)?;
        let mut commented = String::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                commented.push('\n');
            } else if trimmed.starts_with('[') && trimmed.ends_with(']') {
                commented.push_str(line);
                commented.push('\n');
            } else {
                let mut out_line = line.to_string();
                if let Some((lhs, rhs)) = line.split_once('=') {
                    let rhs_trim = rhs.trim();
                    let has_decimal = rhs_trim.contains('.');
                    if has_decimal && !rhs_trim.contains('"') {
                        if let Ok(val) = rhs_trim.parse::<f64>() {
                            let mut formatted = Self::format_float_compact(val);
                            if !formatted.contains('.') {
                                formatted.push_str(".0");
                            }
                            out_line = format!("{} = {}", lhs.trim(), formatted);
                        }
                    }
                }
                commented.push_str("# ");
                commented.push_str(&out_line);
                commented.push('\n');
            }
        }
        Ok(commented)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(ConfigError::Read)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Missing file: write commented defaults and use them. Unreadable or
    /// malformed file: warn and use defaults.
    pub fn load_or_default(path: &str) -> Self {
        let path_obj = Path::new(path);
        if path_obj.exists() {
            return match Self::load(path_obj) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("{path}: {err}. Using defaults.");
                    Self::default()
                }
            };
        }

        match Self::commented_defaults() {
            Ok(text) => {
                if let Err(err) = fs::write(path_obj, text).map_err(ConfigError::Write) {
                    warn!("{path}: {err}");
                }
            }
            Err(err) => warn!("{err}; continuing with defaults"),
        }
        Self::default()
    }
}
