use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    acoustics::DEFAULT_SAMPLE_RATE,
    export::{DEFAULT_MAX_FRAMES, ExportOptions, MasteringSettings},
    mixdown::MixSettings,
    pool::DEFAULT_WORKERS,
};

pub const CONFIG_FILE_NAME: &str = "scorewave.config.toml";
pub const CONFIG_PATH_ENV: &str = "SCOREWAVE_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub synthesis: SynthesisConfig,
    pub mix: MixSettings,
    pub export: ExportConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub max_frames: usize,
    pub master_gain: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    pub ffmpeg_binary: PathBuf,
    pub bitrate_kbps: u32,
    #[serde(flatten)]
    pub mastering: MasteringSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub log_filter: String,
    pub file_prefix: String,
    pub logs_dir: PathBuf,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_frames: DEFAULT_MAX_FRAMES,
            master_gain: 1.0,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            ffmpeg_binary: PathBuf::from("ffmpeg"),
            bitrate_kbps: 192,
            mastering: MasteringSettings::default(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,scorewave_core=trace".to_string(),
            file_prefix: "scorewave".to_string(),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::from_path(&config_path)
    }

    pub fn load_or_default() -> Result<Self> {
        match discover_config_path() {
            Ok(path) => Self::from_path(&path),
            Err(_) => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid config TOML")
    }

    #[must_use]
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            sample_rate: self.audio.sample_rate,
            max_frames: self.audio.max_frames,
            mastering: self.export.mastering,
            ffmpeg_binary: self.export.ffmpeg_binary.clone(),
            bitrate_kbps: self.export.bitrate_kbps,
            ..ExportOptions::default()
        }
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [cwd.join(CONFIG_FILE_NAME), cwd.join("..").join(CONFIG_FILE_NAME)];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}
