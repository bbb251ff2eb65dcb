use crate::gpu::command::FenceWaitPolicy;
use crate::xr::{BlendMode, VisualizedSpace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "XR_CUBES_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub application_name: String,
    pub blend_mode: BlendMode,
    pub visualized_spaces: Vec<VisualizedSpace>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            application_name: "xr_cubes".to_string(),
            blend_mode: BlendMode::Opaque,
            visualized_spaces: VisualizedSpace::DEFAULTS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub near_z: f32,
    pub far_z: f32,
    pub clear_color: [f32; 4],
    pub space_cube_scale: f32,
    pub hand_cube_scale: f32,
    pub fence_timeout_ms: u64,
    pub fence_wait_attempts: u32,
    /// Enables the Khronos validation layer when the loader has it.
    pub validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            near_z: 0.05,
            far_z: 100.0,
            clear_color: [0.184_313_73, 0.309_803_93, 0.309_803_93, 1.0],
            space_cube_scale: 0.25,
            hand_cube_scale: 0.1,
            fence_timeout_ms: 1000,
            fence_wait_attempts: 5,
            validation: false,
        }
    }
}

impl RendererConfig {
    pub fn fence_policy(&self) -> FenceWaitPolicy {
        FenceWaitPolicy {
            timeout: Duration::from_millis(self.fence_timeout_ms),
            attempts: self.fence_wait_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Sleep between polls while the session is not running.
    pub idle_sleep_ms: u64,
    /// Stop after this many rendered frames. Unbounded when absent.
    pub max_frames: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            idle_sleep_ms: 250,
            max_frames: None,
        }
    }
}

impl DriverConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub renderer: RendererConfig,
    pub driver: DriverConfig,
}

impl AppConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Loads `path` if given, else the file named by [`CONFIG_ENV`], else
    /// the defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                log::info!("[config] loading {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.renderer;
        if !(r.near_z > 0.0) {
            return Err(ConfigError::Invalid(format!("near_z must be positive, got {}", r.near_z)));
        }
        if r.fence_wait_attempts == 0 {
            return Err(ConfigError::Invalid("fence_wait_attempts must be at least 1".into()));
        }
        if !(r.space_cube_scale > 0.0 && r.hand_cube_scale > 0.0) {
            return Err(ConfigError::Invalid("cube scales must be positive".into()));
        }
        if self.session.visualized_spaces.is_empty() {
            log::warn!("[config] no visualized spaces configured, only hands will be drawn");
        }
        Ok(())
    }
}
