use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Kiosk configuration: optional TOML file, overridden by `SHELFGATE_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD detector file name inside `model_dir`.
    pub detector_model: String,
    /// 128-dim embedding model file name inside `model_dir`.
    pub encoder_model: String,
    /// Square input side expected by the embedding model.
    pub encoder_input_size: u32,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for two faces to be the same person.
    /// Used for both duplicate rejection and kiosk identification.
    pub match_tolerance: f64,
    /// How long a verified person may transact before re-verifying.
    pub session_ttl_secs: u64,
    /// Upper bound on a single scan; 0 scans until cancelled.
    pub scan_timeout_secs: u64,
    /// Number of frames to capture per registration attempt.
    pub frames_per_enroll: usize,
    /// Number of frames discarded after opening the camera.
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            model_dir: shelfgate_core::default_model_dir(),
            detector_model: "det_10g.onnx".to_string(),
            encoder_model: "face_embedding_128.onnx".to_string(),
            encoder_input_size: 150,
            db_path: default_data_dir().join("library.db"),
            match_tolerance: 0.4,
            session_ttl_secs: 120,
            scan_timeout_secs: 0,
            frames_per_enroll: 5,
            warmup_frames: 4,
        }
    }
}

impl Config {
    /// Load `file` (if any), then apply environment overrides and validate.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `SHELFGATE_*` overrides looked up through `get`.
    pub fn apply_env<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("SHELFGATE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = get("SHELFGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SHELFGATE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        override_parsed(&get, "SHELFGATE_CAMERA_WIDTH", &mut self.camera_width)?;
        override_parsed(&get, "SHELFGATE_CAMERA_HEIGHT", &mut self.camera_height)?;
        override_parsed(&get, "SHELFGATE_ENCODER_INPUT_SIZE", &mut self.encoder_input_size)?;
        override_parsed(&get, "SHELFGATE_MATCH_TOLERANCE", &mut self.match_tolerance)?;
        override_parsed(&get, "SHELFGATE_SESSION_TTL_SECS", &mut self.session_ttl_secs)?;
        override_parsed(&get, "SHELFGATE_SCAN_TIMEOUT_SECS", &mut self.scan_timeout_secs)?;
        override_parsed(&get, "SHELFGATE_FRAMES_PER_ENROLL", &mut self.frames_per_enroll)?;
        override_parsed(&get, "SHELFGATE_WARMUP_FRAMES", &mut self.warmup_frames)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_tolerance.is_finite() && self.match_tolerance > 0.0) {
            return Err(ConfigError::Invalid {
                key: "match_tolerance",
                reason: format!("must be a positive distance, got {}", self.match_tolerance),
            });
        }
        if self.frames_per_enroll == 0 {
            return Err(ConfigError::Invalid {
                key: "frames_per_enroll",
                reason: "must be at least 1".into(),
            });
        }
        if ttl_duration(self.session_ttl_secs).is_none() {
            return Err(ConfigError::Invalid {
                key: "session_ttl_secs",
                reason: format!("{} seconds is out of range", self.session_ttl_secs),
            });
        }
        if self.encoder_input_size == 0 {
            return Err(ConfigError::Invalid {
                key: "encoder_input_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn encoder_path(&self) -> PathBuf {
        self.model_dir.join(&self.encoder_model)
    }

    /// Session lifetime; values `validate` rejects saturate at the maximum.
    pub fn session_ttl(&self) -> chrono::Duration {
        ttl_duration(self.session_ttl_secs).unwrap_or(chrono::Duration::MAX)
    }

    pub fn scan_timeout(&self) -> Option<std::time::Duration> {
        (self.scan_timeout_secs > 0).then(|| std::time::Duration::from_secs(self.scan_timeout_secs))
    }
}

fn override_parsed<F, T>(get: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(key) {
        *slot = raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: format!("{raw:?}: {e}"),
        })?;
    }
    Ok(())
}

fn ttl_duration(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("shelfgate")
}
