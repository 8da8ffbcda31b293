use anyhow::{Context, Result};
use facecheck_vision::Pipeline;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACECHECK_CONFIG_PATH").unwrap_or("/usr/local/etc/facecheck/config.toml"))
});

pub static FACE_STORE_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACECHECK_FACE_STORE_PREFIX").unwrap_or("/usr/local/etc/facecheck"))
});

/// Card-vs-selfie acceptance threshold, tuned for retinaface+arcface.
pub const DEFAULT_THRESHOLD: f64 = 0.352;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum verification similarity, inclusive.
    pub threshold: f64,
    /// Store-wide embedding length.
    pub dimension: usize,
    pub service_url: String,
    pub timeout_secs: u64,
    pub verification_pipeline: Pipeline,
    pub identification_pipeline: Pipeline,
    pub store_path: PathBuf,
    pub registry_path: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            dimension: Pipeline::YunetSface.dimension(),
            service_url: "http://face:5000".to_string(),
            timeout_secs: 5,
            verification_pipeline: Pipeline::RetinafaceArcface,
            identification_pipeline: Pipeline::YunetSface,
            store_path: FACE_STORE_PREFIX.join("faces.bin"),
            registry_path: FACE_STORE_PREFIX.join("registry.toml"),
            upload_dir: FACE_STORE_PREFIX.join("uploads").join("selfies"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.threshold) {
            anyhow::bail!("threshold {} is outside [-1, 1]", self.threshold);
        }
        if self.dimension == 0 {
            anyhow::bail!("dimension must be positive");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be positive");
        }
        if self.identification_pipeline.dimension() != self.dimension {
            log::warn!(
                "identification pipeline {} produces {} values but the store expects {}",
                self.identification_pipeline,
                self.identification_pipeline.dimension(),
                self.dimension
            );
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
