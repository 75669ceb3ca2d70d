use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Application configuration.
///
/// Resolved from built-in defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD detector file name inside `model_dir`.
    pub detector_model: String,
    /// FaceNet embedder file name inside `model_dir`.
    pub embedder_model: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory spreadsheet exports are written to.
    pub export_dir: PathBuf,
    /// Cosine distance below which a face counts as recognized.
    pub match_threshold: f32,
    /// Minimum detector score for a face to be processed.
    pub detection_confidence: f32,
    /// Minimum seconds between two attendance marks for the same student.
    pub rate_limit_secs: u64,
    /// Consecutive capture failures tolerated before recognition stops.
    pub max_frame_errors: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: data_dir.join("models"),
            detector_model: "det_10g.onnx".to_string(),
            embedder_model: "facenet_vggface2.onnx".to_string(),
            db_path: data_dir.join("attendance.db"),
            export_dir: PathBuf::from("."),
            match_threshold: rollcall_core::DEFAULT_MATCH_THRESHOLD,
            detection_confidence: 0.8,
            rate_limit_secs: 30,
            max_frame_errors: 30,
        }
    }
}

impl Config {
    /// Load from the config file (if any) and the process environment.
    ///
    /// The file is `$ROLLCALL_CONFIG` when set, otherwise
    /// `$XDG_CONFIG_HOME/rollcall/config.toml` if it exists. An explicitly
    /// named file that cannot be read is an error; a missing default file is not.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let default_path = config_dir().join("config.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Self::from_toml_str(&text)
    }

    /// Parse TOML; keys not present keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `ROLLCALL_*` variables. Unparseable numbers are
    /// ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_EXPORT_DIR") {
            self.export_dir = PathBuf::from(v);
        }
        env_parse(&lookup, "ROLLCALL_MATCH_THRESHOLD", &mut self.match_threshold);
        env_parse(&lookup, "ROLLCALL_DETECTION_CONFIDENCE", &mut self.detection_confidence);
        env_parse(&lookup, "ROLLCALL_RATE_LIMIT_SECS", &mut self.rate_limit_secs);
        env_parse(&lookup, "ROLLCALL_MAX_FRAME_ERRORS", &mut self.max_frame_errors);
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the FaceNet embedding model.
    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_secs)
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config value"),
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall")
}

fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("rollcall")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.match_threshold, 1.2);
        assert_eq!(c.detection_confidence, 0.8);
        assert_eq!(c.rate_limit_window(), Duration::from_secs(30));
        assert!(c.db_path.ends_with("rollcall/attendance.db"));
        assert!(c.detector_model_path().ends_with("models/det_10g.onnx"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = Config::from_toml_str(
            r#"
            camera_device = "/dev/video4"
            rate_limit_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(c.camera_device, "/dev/video4");
        assert_eq!(c.rate_limit_secs, 60);
        assert_eq!(c.detection_confidence, 0.8);
    }

    #[test]
    fn test_bad_toml_is_error() {
        assert!(matches!(
            Config::from_toml_str("rate_limit_secs = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = [
            ("ROLLCALL_DB_PATH", "/srv/rollcall.db"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.9"),
            ("ROLLCALL_RATE_LIMIT_SECS", "ten"),
        ]
        .into_iter()
        .collect();

        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.db_path, PathBuf::from("/srv/rollcall.db"));
        assert_eq!(c.match_threshold, 0.9);
        assert_eq!(c.rate_limit_secs, 30);
    }

    #[test]
    fn test_from_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
