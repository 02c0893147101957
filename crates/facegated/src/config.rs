use facegate_core::upload::DEFAULT_RECOGNIZE_URL;
use facegate_core::Size;
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
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Where notifications go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierFormat {
    /// `tracing` events.
    Log,
    /// One JSON object per line on stdout.
    Json,
}

impl NotifierFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "log" => Some(Self::Log),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Resolution requested from the camera.
    pub capture_size: Size,
    /// Directory containing the three ONNX model files.
    pub model_dir: PathBuf,
    /// Recognition endpoint receiving face uploads.
    pub recognize_url: String,
    /// Period between detection cycles.
    pub cycle_interval: Duration,
    /// Deadline for a single upload to settle.
    pub upload_timeout: Duration,
    /// How long to wait for models before giving up; `None` waits forever.
    pub readiness_timeout: Option<Duration>,
    pub jpeg_quality: u8,
    /// Frames discarded after camera start (auto-exposure settling).
    pub warmup_frames: usize,
    pub notifier: NotifierFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_size: facegate_hw::DEFAULT_CAPTURE_SIZE,
            model_dir: facegate_core::default_model_dir(),
            recognize_url: DEFAULT_RECOGNIZE_URL.to_string(),
            cycle_interval: Duration::from_millis(5000),
            upload_timeout: Duration::from_secs(15),
            readiness_timeout: Some(Duration::from_secs(60)),
            jpeg_quality: facegate_core::encode::JPEG_QUALITY,
            warmup_frames: 4,
            notifier: NotifierFormat::Log,
        }
    }
}

/// Optional TOML overlay. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    capture_width: Option<u32>,
    capture_height: Option<u32>,
    model_dir: Option<PathBuf>,
    recognize_url: Option<String>,
    cycle_interval_ms: Option<u64>,
    upload_timeout_secs: Option<u64>,
    readiness_timeout_secs: Option<u64>,
    jpeg_quality: Option<u8>,
    warmup_frames: Option<usize>,
    notifier: Option<NotifierFormat>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file named by
    /// `FACEGATE_CONFIG` (if set), then `FACEGATE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("FACEGATE_CONFIG") {
            Some(path) => {
                let path = PathBuf::from(path);
                tracing::info!(path = %path.display(), "loading config file");
                FileConfig::load(&path)?
            }
            None => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let d = Self::default();

        let capture_size = Size::new(
            env_parse(&env, "FACEGATE_CAPTURE_WIDTH")
                .or(file.capture_width)
                .unwrap_or(d.capture_size.width),
            env_parse(&env, "FACEGATE_CAPTURE_HEIGHT")
                .or(file.capture_height)
                .unwrap_or(d.capture_size.height),
        );
        if capture_size.is_empty() {
            return Err(ConfigError::Invalid {
                key: "capture size",
                reason: format!("{capture_size} has a zero dimension"),
            });
        }

        let cycle_ms = env_parse(&env, "FACEGATE_CYCLE_INTERVAL_MS")
            .or(file.cycle_interval_ms)
            .unwrap_or(d.cycle_interval.as_millis() as u64);
        if cycle_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "cycle interval",
                reason: "must be at least 1 ms".to_string(),
            });
        }

        let upload_secs = env_parse(&env, "FACEGATE_UPLOAD_TIMEOUT_SECS")
            .or(file.upload_timeout_secs)
            .unwrap_or(d.upload_timeout.as_secs());
        if upload_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "upload timeout",
                reason: "must be at least 1 s".to_string(),
            });
        }

        let jpeg_quality = env_parse(&env, "FACEGATE_JPEG_QUALITY")
            .or(file.jpeg_quality)
            .unwrap_or(d.jpeg_quality);
        if !(1..=100).contains(&jpeg_quality) {
            return Err(ConfigError::Invalid {
                key: "jpeg quality",
                reason: format!("{jpeg_quality} is outside 1..=100"),
            });
        }

        // 0 disables the readiness deadline.
        let readiness_secs = env_parse(&env, "FACEGATE_READINESS_TIMEOUT_SECS")
            .or(file.readiness_timeout_secs);
        let readiness_timeout = match readiness_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => d.readiness_timeout,
        };

        let notifier = match env("FACEGATE_NOTIFIER") {
            Some(v) => NotifierFormat::parse(&v).ok_or_else(|| ConfigError::Invalid {
                key: "FACEGATE_NOTIFIER",
                reason: format!("expected \"log\" or \"json\", got {v:?}"),
            })?,
            None => file.notifier.unwrap_or(d.notifier),
        };

        Ok(Self {
            camera_device: env("FACEGATE_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or(d.camera_device),
            capture_size,
            model_dir: env("FACEGATE_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or(d.model_dir),
            recognize_url: env("FACEGATE_RECOGNIZE_URL")
                .or(file.recognize_url)
                .unwrap_or(d.recognize_url),
            cycle_interval: Duration::from_millis(cycle_ms),
            upload_timeout: Duration::from_secs(upload_secs),
            readiness_timeout,
            jpeg_quality,
            warmup_frames: env_parse(&env, "FACEGATE_WARMUP_FRAMES")
                .or(file.warmup_frames)
                .unwrap_or(d.warmup_frames),
            notifier,
        })
    }
}

fn env_parse<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(FileConfig::default(), env_of(&[])).unwrap();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.capture_size, Size::new(640, 480));
        assert_eq!(config.model_dir, PathBuf::from("models"));
        assert_eq!(config.recognize_url, "http://localhost:8000/api/recognize");
        assert_eq!(config.cycle_interval, Duration::from_millis(5000));
        assert_eq!(config.upload_timeout, Duration::from_secs(15));
        assert_eq!(config.readiness_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.jpeg_quality, 90);
        assert_eq!(config.notifier, NotifierFormat::Log);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            camera_device = "/dev/video2"
            cycle_interval_ms = 2000
            notifier = "json"
            "#,
        )
        .unwrap();
        let config = Config::resolve(
            file,
            env_of(&[
                ("FACEGATE_CYCLE_INTERVAL_MS", "750"),
                ("FACEGATE_RECOGNIZE_URL", "http://kiosk:9000/recognize"),
            ]),
        )
        .unwrap();

        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.cycle_interval, Duration::from_millis(750));
        assert_eq!(config.recognize_url, "http://kiosk:9000/recognize");
        assert_eq!(config.notifier, NotifierFormat::Json);
    }

    #[test]
    fn test_zero_readiness_timeout_disables_deadline() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[("FACEGATE_READINESS_TIMEOUT_SECS", "0")]),
        )
        .unwrap();
        assert_eq!(config.readiness_timeout, None);
    }

    #[test]
    fn test_unparsable_env_falls_back() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[("FACEGATE_WARMUP_FRAMES", "lots")]),
        )
        .unwrap();
        assert_eq!(config.warmup_frames, 4);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("FACEGATE_JPEG_QUALITY", "0")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("FACEGATE_NOTIFIER", "toast")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("FACEGATE_CYCLE_INTERVAL_MS", "0")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_rejects_zero_upload_timeout() {
        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("FACEGATE_UPLOAD_TIMEOUT_SECS", "0")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "upload timeout",
                ..
            }
        ));

        let file: FileConfig = toml::from_str("upload_timeout_secs = 0").unwrap();
        assert!(Config::resolve(file, env_of(&[])).is_err());
    }

    #[test]
    fn test_unknown_file_key_is_parse_error() {
        assert!(toml::from_str::<FileConfig>("frame_rate = 30").is_err());
    }
}
