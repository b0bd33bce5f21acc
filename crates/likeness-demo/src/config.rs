use crate::live::LiveSettings;
use likeness_core::ModelSource;
use likeness_hw::V4lCameraProvider;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Demo configuration.
///
/// Precedence, lowest to highest: built-in defaults, the TOML file named by
/// `LIKENESS_CONFIG`, then individual `LIKENESS_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory or base URL holding the five ONNX models.
    pub model_source: ModelSource,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Preferred capture size; the driver may settle on something else.
    pub camera_width: u32,
    pub camera_height: u32,
    /// Pause between live detection passes.
    pub sample_interval_ms: u64,
    /// How long an armed auto-capture waits before taking the frame.
    pub auto_capture_delay_ms: u64,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Whole-request timeout for remote model downloads.
    pub fetch_timeout_secs: u64,
}

/// Floor for the live sampling period; zero would spin the loop.
pub const MIN_SAMPLE_INTERVAL_MS: u64 = 10;

impl Default for Config {
    fn default() -> Self {
        Self {
            model_source: ModelSource::default(),
            camera_device: likeness_hw::camera::DEFAULT_DEVICE.to_string(),
            camera_width: likeness_hw::camera::DEFAULT_WIDTH,
            camera_height: likeness_hw::camera::DEFAULT_HEIGHT,
            sample_interval_ms: 100,
            auto_capture_delay_ms: 100,
            intra_threads: 2,
            fetch_timeout_secs: 60,
        }
    }
}

/// On-disk overlay; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    model_source: Option<String>,
    camera_device: Option<String>,
    camera_width: Option<u32>,
    camera_height: Option<u32>,
    sample_interval_ms: Option<u64>,
    auto_capture_delay_ms: Option<u64>,
    intra_threads: Option<usize>,
    fetch_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup("LIKENESS_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }

        if let Some(source) = lookup("LIKENESS_MODEL_SOURCE") {
            config.model_source = ModelSource::parse(&source);
        }
        if let Some(device) = lookup("LIKENESS_CAMERA_DEVICE") {
            config.camera_device = device;
        }
        config.camera_width = env_parse(&lookup, "LIKENESS_CAMERA_WIDTH", config.camera_width);
        config.camera_height = env_parse(&lookup, "LIKENESS_CAMERA_HEIGHT", config.camera_height);
        config.sample_interval_ms = env_parse(&lookup, "LIKENESS_SAMPLE_INTERVAL_MS", config.sample_interval_ms);
        config.auto_capture_delay_ms =
            env_parse(&lookup, "LIKENESS_AUTO_CAPTURE_DELAY_MS", config.auto_capture_delay_ms);
        config.intra_threads = env_parse(&lookup, "LIKENESS_INTRA_THREADS", config.intra_threads);
        config.fetch_timeout_secs = env_parse(&lookup, "LIKENESS_FETCH_TIMEOUT_SECS", config.fetch_timeout_secs);

        config.clamp();
        Ok(config)
    }

    /// Same bounds whichever layer supplied the value.
    fn clamp(&mut self) {
        if self.sample_interval_ms < MIN_SAMPLE_INTERVAL_MS {
            tracing::warn!(
                value = self.sample_interval_ms,
                min = MIN_SAMPLE_INTERVAL_MS,
                "sample interval too short; using minimum"
            );
            self.sample_interval_ms = MIN_SAMPLE_INTERVAL_MS;
        }
        self.intra_threads = self.intra_threads.max(1);
        self.fetch_timeout_secs = self.fetch_timeout_secs.max(1);
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "applying config file");

        if let Some(source) = file.model_source {
            self.model_source = ModelSource::parse(&source);
        }
        if let Some(device) = file.camera_device {
            self.camera_device = device;
        }
        self.camera_width = file.camera_width.unwrap_or(self.camera_width);
        self.camera_height = file.camera_height.unwrap_or(self.camera_height);
        self.sample_interval_ms = file.sample_interval_ms.unwrap_or(self.sample_interval_ms);
        self.auto_capture_delay_ms = file.auto_capture_delay_ms.unwrap_or(self.auto_capture_delay_ms);
        self.intra_threads = file.intra_threads.unwrap_or(self.intra_threads);
        self.fetch_timeout_secs = file.fetch_timeout_secs.unwrap_or(self.fetch_timeout_secs);
        Ok(())
    }

    pub fn camera_provider(&self) -> V4lCameraProvider {
        V4lCameraProvider::new(&self.camera_device, self.camera_width, self.camera_height)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn live_settings(&self) -> LiveSettings {
        LiveSettings {
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            auto_capture_delay: Duration::from_millis(self.auto_capture_delay_ms),
        }
    }
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!((config.camera_width, config.camera_height), (640, 480));
        assert_eq!(config.sample_interval_ms, 100);
        assert_eq!(config.intra_threads, 2);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(60));
        assert!(matches!(config.model_source, ModelSource::Directory(_)));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("LIKENESS_MODEL_SOURCE", "https://models.example.test/likeness/"),
            ("LIKENESS_CAMERA_DEVICE", "/dev/video4"),
            ("LIKENESS_SAMPLE_INTERVAL_MS", "250"),
            ("LIKENESS_INTRA_THREADS", "0"),
        ]))
        .unwrap();
        assert_eq!(
            config.model_source,
            ModelSource::Remote("https://models.example.test/likeness".into())
        );
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.live_settings().sample_interval, Duration::from_millis(250));
        assert_eq!(config.intra_threads, 1);
    }

    #[test]
    fn test_bad_number_falls_back() {
        let config = Config::from_lookup(lookup(&[("LIKENESS_CAMERA_WIDTH", "wide")])).unwrap();
        assert_eq!(config.camera_width, 640);
    }

    #[test]
    fn test_file_overlay_then_env() {
        let dir = std::env::temp_dir().join(format!("likeness-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("likeness.toml");
        std::fs::write(
            &path,
            "model_source = \"/opt/models\"\ncamera_device = \"/dev/video2\"\nauto_capture_delay_ms = 300\n",
        )
        .unwrap();

        let config = Config::from_lookup(lookup(&[
            ("LIKENESS_CONFIG", path.to_str().unwrap()),
            ("LIKENESS_CAMERA_DEVICE", "/dev/video6"),
        ]))
        .unwrap();
        assert_eq!(config.model_source, ModelSource::Directory(PathBuf::from("/opt/models")));
        assert_eq!(config.camera_device, "/dev/video6");
        assert_eq!(config.auto_capture_delay_ms, 300);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_values_clamped_on_both_layers() {
        let config = Config::from_lookup(lookup(&[
            ("LIKENESS_SAMPLE_INTERVAL_MS", "0"),
            ("LIKENESS_FETCH_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.sample_interval_ms, MIN_SAMPLE_INTERVAL_MS);
        assert_eq!(config.fetch_timeout_secs, 1);

        let dir = std::env::temp_dir().join(format!("likeness-config-zero-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("zero.toml");
        std::fs::write(&path, "sample_interval_ms = 0\nintra_threads = 0\n").unwrap();

        let config = Config::from_lookup(lookup(&[("LIKENESS_CONFIG", path.to_str().unwrap())])).unwrap();
        assert_eq!(config.sample_interval_ms, MIN_SAMPLE_INTERVAL_MS);
        assert_eq!(config.intra_threads, 1);
        assert!(config.live_settings().sample_interval >= Duration::from_millis(MIN_SAMPLE_INTERVAL_MS));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_errors() {
        let missing = Config::from_lookup(lookup(&[("LIKENESS_CONFIG", "/nonexistent/likeness.toml")]));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let dir = std::env::temp_dir().join(format!("likeness-config-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "sample_interval_ms = \"fast\"\n").unwrap();
        let bad = Config::from_lookup(lookup(&[("LIKENESS_CONFIG", path.to_str().unwrap())]));
        assert!(matches!(bad, Err(ConfigError::Parse { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }
}
