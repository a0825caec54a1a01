use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use visionmate_core::CANONICAL_FACE_SIZE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Service configuration.
///
/// Built from defaults under the data directory, then an optional TOML file,
/// then `VISIONMATE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root of all persisted state (default: `$XDG_DATA_HOME/visionmate`).
    pub data_dir: PathBuf,
    /// One `user<id>` directory of face crops per identity.
    pub dataset_dir: PathBuf,
    /// JSON identity id → name mapping.
    pub registry_path: PathBuf,
    /// Trained model artifact.
    pub model_path: PathBuf,
    /// SCRFD ONNX detector model.
    pub detector_model_path: PathBuf,
    /// Maximum classifier distance accepted as a known face.
    pub confidence_threshold: f64,
    /// Samples read per identity when training.
    pub max_samples_per_identity: usize,
    /// Edge length of the square face crops fed to the classifier.
    pub face_size: u32,
    /// Train at startup when no usable model artifact exists.
    pub train_on_startup: bool,
}

/// On-disk form: every field optional, missing ones keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
    registry_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    detector_model_path: Option<PathBuf>,
    confidence_threshold: Option<f64>,
    max_samples_per_identity: Option<usize>,
    face_size: Option<u32>,
    train_on_startup: Option<bool>,
}

impl Config {
    /// Default layout rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            dataset_dir: data_dir.join("dataset"),
            registry_path: data_dir.join("user_mapping.json"),
            model_path: data_dir.join("face_model.lbph"),
            detector_model_path: data_dir.join("models").join("det_10g.onnx"),
            confidence_threshold: 80.0,
            max_samples_per_identity: 100,
            face_size: CANONICAL_FACE_SIZE,
            train_on_startup: true,
            data_dir,
        }
    }

    /// Load from the process environment.
    ///
    /// The TOML file is `$VISIONMATE_CONFIG` if set, else `config.toml` in the
    /// data directory when it exists.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env_data_dir = env("VISIONMATE_DATA_DIR").map(PathBuf::from);
        let data_dir = env_data_dir.clone().unwrap_or_else(|| default_data_dir(&env));

        let file = env("VISIONMATE_CONFIG")
            .map(PathBuf::from)
            .or_else(|| Some(data_dir.join("config.toml")).filter(|p| p.exists()));

        let mut config = match file {
            Some(path) => {
                let mut file = read_config_file(&path)?;
                // The environment outranks the file, data_dir included.
                if env_data_dir.is_some() {
                    file.data_dir = None;
                }
                Self::merge(file, data_dir)
            }
            None => Self::with_data_dir(data_dir),
        };
        config.apply_env(&env);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file on top of the defaults for `data_dir`.
    pub fn from_file(path: &Path, data_dir: PathBuf) -> Result<Self, ConfigError> {
        Ok(Self::merge(read_config_file(path)?, data_dir))
    }

    fn merge(file: ConfigFile, data_dir: PathBuf) -> Self {
        let defaults = Self::with_data_dir(file.data_dir.unwrap_or(data_dir));
        Self {
            dataset_dir: file.dataset_dir.unwrap_or(defaults.dataset_dir),
            registry_path: file.registry_path.unwrap_or(defaults.registry_path),
            model_path: file.model_path.unwrap_or(defaults.model_path),
            detector_model_path: file.detector_model_path.unwrap_or(defaults.detector_model_path),
            confidence_threshold: file.confidence_threshold.unwrap_or(defaults.confidence_threshold),
            max_samples_per_identity: file
                .max_samples_per_identity
                .unwrap_or(defaults.max_samples_per_identity),
            face_size: file.face_size.unwrap_or(defaults.face_size),
            train_on_startup: file.train_on_startup.unwrap_or(defaults.train_on_startup),
            data_dir: defaults.data_dir,
        }
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("VISIONMATE_DATASET_DIR") {
            self.dataset_dir = v.into();
        }
        if let Some(v) = env("VISIONMATE_REGISTRY_PATH") {
            self.registry_path = v.into();
        }
        if let Some(v) = env("VISIONMATE_MODEL_PATH") {
            self.model_path = v.into();
        }
        if let Some(v) = env("VISIONMATE_DETECTOR_MODEL") {
            self.detector_model_path = v.into();
        }
        self.confidence_threshold =
            env_parse(env, "VISIONMATE_CONFIDENCE_THRESHOLD", self.confidence_threshold);
        self.max_samples_per_identity =
            env_parse(env, "VISIONMATE_MAX_SAMPLES", self.max_samples_per_identity);
        self.face_size = env_parse(env, "VISIONMATE_FACE_SIZE", self.face_size);
        if let Some(v) = env("VISIONMATE_TRAIN_ON_STARTUP") {
            self.train_on_startup = v != "0";
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.confidence_threshold.is_finite() || self.confidence_threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be a non-negative number, got {}",
                self.confidence_threshold
            )));
        }
        if !(16..=1024).contains(&self.face_size) {
            return Err(ConfigError::Invalid(format!(
                "face_size must be between 16 and 1024, got {}",
                self.face_size
            )));
        }
        if self.max_samples_per_identity == 0 {
            return Err(ConfigError::Invalid(
                "max_samples_per_identity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(file)
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("visionmate")
}

/// Parse `key` if set and valid; otherwise keep `current`.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match env(key) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
                current
            }
        },
        None => current,
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
    fn test_defaults_under_xdg() {
        let config = Config::load_with(env_of(&[("XDG_DATA_HOME", "/data")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/data/visionmate"));
        assert_eq!(config.dataset_dir, PathBuf::from("/data/visionmate/dataset"));
        assert_eq!(config.registry_path, PathBuf::from("/data/visionmate/user_mapping.json"));
        assert_eq!(config.confidence_threshold, 80.0);
        assert_eq!(config.max_samples_per_identity, 100);
        assert_eq!(config.face_size, 200);
        assert!(config.train_on_startup);
    }

    #[test]
    fn test_home_fallback() {
        let config = Config::load_with(env_of(&[("HOME", "/home/aria")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/home/aria/.local/share/visionmate"));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::load_with(env_of(&[
            ("VISIONMATE_DATA_DIR", "/srv/vm"),
            ("VISIONMATE_CONFIDENCE_THRESHOLD", "65.5"),
            ("VISIONMATE_MAX_SAMPLES", "not-a-number"),
            ("VISIONMATE_TRAIN_ON_STARTUP", "0"),
        ]))
        .unwrap();
        assert_eq!(config.model_path, PathBuf::from("/srv/vm/face_model.lbph"));
        assert_eq!(config.confidence_threshold, 65.5);
        assert_eq!(config.max_samples_per_identity, 100);
        assert!(!config.train_on_startup);
    }

    #[test]
    fn test_toml_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.toml");
        std::fs::write(
            &path,
            "confidence_threshold = 70.0\nmax_samples_per_identity = 20\ndataset_dir = \"/faces\"\n",
        )
        .unwrap();

        let config = Config::load_with(env_of(&[
            ("VISIONMATE_DATA_DIR", "/srv/vm"),
            ("VISIONMATE_CONFIG", path.to_str().unwrap()),
            ("VISIONMATE_MAX_SAMPLES", "30"),
        ]))
        .unwrap();
        assert_eq!(config.confidence_threshold, 70.0);
        assert_eq!(config.max_samples_per_identity, 30);
        assert_eq!(config.dataset_dir, PathBuf::from("/faces"));
        assert_eq!(config.registry_path, PathBuf::from("/srv/vm/user_mapping.json"));
    }

    #[test]
    fn test_env_data_dir_outranks_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.toml");
        std::fs::write(&path, "data_dir = \"/from/file\"\n").unwrap();

        let config = Config::load_with(env_of(&[
            ("VISIONMATE_DATA_DIR", "/from/env"),
            ("VISIONMATE_CONFIG", path.to_str().unwrap()),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/from/env"));
        assert_eq!(config.model_path, PathBuf::from("/from/env/face_model.lbph"));

        let config = Config::load_with(env_of(&[
            ("HOME", "/home/aria"),
            ("VISIONMATE_CONFIG", path.to_str().unwrap()),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/from/file"));
    }

    #[test]
    fn test_config_file_in_data_dir_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "face_size = 128\n").unwrap();

        let config =
            Config::load_with(env_of(&[("VISIONMATE_DATA_DIR", dir.path().to_str().unwrap())]))
                .unwrap();
        assert_eq!(config.face_size, 128);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.toml");
        std::fs::write(&path, "treshold = 70.0\n").unwrap();
        let err = Config::from_file(&path, dir.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::with_data_dir("/x");
        assert!(config.validate().is_ok());
        config.confidence_threshold = f64::NAN;
        assert!(config.validate().is_err());
        config.confidence_threshold = 80.0;
        config.face_size = 8;
        assert!(config.validate().is_err());
        config.face_size = 200;
        config.max_samples_per_identity = 0;
        assert!(config.validate().is_err());
    }
}
