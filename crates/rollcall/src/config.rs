use rollcall_core::matcher::{CosineMatcher, EuclideanMatcher, Matcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
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

/// Distance used to compare embeddings against the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Euclidean,
    Cosine,
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric '{other}' (expected euclidean or cosine)")),
        }
    }
}

/// Recorder configuration.
///
/// Layered: defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables. CLI flags are applied last by `main`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Requested capture size; the driver may negotiate another.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory of reference images, one person per file.
    pub gallery_dir: PathBuf,
    /// Attendance CSV file.
    pub ledger_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Integer shrink factor applied before detection.
    pub downscale: u32,
    pub metric: Metric,
    /// Tolerance (euclidean) or minimum similarity (cosine); metric default when unset.
    pub match_threshold: Option<f32>,
    pub speech_enabled: bool,
    /// Speech program, invoked as `<program> -s <rate> <text>`.
    pub speech_program: String,
    /// Words per minute.
    pub speech_rate: u32,
    pub window_title: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            gallery_dir: PathBuf::from("known_faces"),
            ledger_path: PathBuf::from("attendance.csv"),
            model_dir: rollcall_core::default_model_dir(),
            downscale: 4,
            metric: Metric::Euclidean,
            match_threshold: None,
            speech_enabled: true,
            speech_program: "espeak-ng".to_string(),
            speech_rate: 150,
            window_title: "Live Attendance".to_string(),
        }
    }
}

impl Config {
    /// Load from `path` (or `$ROLLCALL_CONFIG`) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `ROLLCALL_*` variables supplied by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_SPEECH_PROGRAM") {
            self.speech_program = v;
        }
        if let Some(v) = parse_env(&lookup, "ROLLCALL_FRAME_WIDTH") {
            self.frame_width = v;
        }
        if let Some(v) = parse_env(&lookup, "ROLLCALL_FRAME_HEIGHT") {
            self.frame_height = v;
        }
        if let Some(v) = parse_env(&lookup, "ROLLCALL_DOWNSCALE") {
            self.downscale = v;
        }
        if let Some(v) = parse_env(&lookup, "ROLLCALL_METRIC") {
            self.metric = v;
        }
        if let Some(v) = parse_env(&lookup, "ROLLCALL_SPEECH_RATE") {
            self.speech_rate = v;
        }
        if let Some(v) = parse_env(&lookup, "ROLLCALL_MATCH_THRESHOLD") {
            self.match_threshold = Some(v);
        }
        if let Some(v) = lookup("ROLLCALL_SPEECH_ENABLED") {
            self.speech_enabled = v != "0";
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(rollcall_core::DETECTOR_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(rollcall_core::RECOGNIZER_MODEL_FILE)
    }

    pub fn matcher(&self) -> Box<dyn Matcher> {
        match (self.metric, self.match_threshold) {
            (Metric::Euclidean, Some(tolerance)) => Box::new(EuclideanMatcher { tolerance }),
            (Metric::Euclidean, None) => Box::new(EuclideanMatcher::default()),
            (Metric::Cosine, Some(threshold)) => Box::new(CosineMatcher { threshold }),
            (Metric::Cosine, None) => Box::new(CosineMatcher::default()),
        }
    }
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = raw.parse().ok();
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.ledger_path, PathBuf::from("attendance.csv"));
        assert_eq!(c.downscale, 4);
        assert_eq!(c.speech_rate, 150);
        assert_eq!(c.metric, Metric::Euclidean);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            "gallery_dir = \"/srv/faces\"\nmetric = \"cosine\"\nmatch_threshold = 0.5\n",
        )
        .unwrap();

        let c = Config::from_file(&path).unwrap();
        assert_eq!(c.gallery_dir, PathBuf::from("/srv/faces"));
        assert_eq!(c.metric, Metric::Cosine);
        assert_eq!(c.match_threshold, Some(0.5));
        assert_eq!(c.window_title, "Live Attendance");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "camera = \"/dev/video9\"\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = Config::from_file(Path::new("/nonexistent/rollcall.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_env(lookup_from(&[
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video2"),
            ("ROLLCALL_DOWNSCALE", "2"),
            ("ROLLCALL_METRIC", "Cosine"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.55"),
            ("ROLLCALL_SPEECH_ENABLED", "0"),
            ("ROLLCALL_SPEECH_RATE", "fast"),
        ]));
        assert_eq!(c.camera_device, "/dev/video2");
        assert_eq!(c.downscale, 2);
        assert_eq!(c.metric, Metric::Cosine);
        assert_eq!(c.match_threshold, Some(0.55));
        assert!(!c.speech_enabled);
        assert_eq!(c.speech_rate, 150, "unparsable value keeps the default");
    }

    #[test]
    fn test_model_paths() {
        let c = Config {
            model_dir: PathBuf::from("/opt/models"),
            ..Config::default()
        };
        assert_eq!(c.detector_model_path(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(c.recognizer_model_path(), PathBuf::from("/opt/models/w600k_r50.onnx"));
    }
}
