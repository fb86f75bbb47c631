use rollcall_core::clock::Zone;
use rollcall_core::GenericCues;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {key}")]
    Env { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration: TOML file, then `ROLLCALL_*` environment overrides.
///
/// Paths left unset resolve under `data_dir`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub db_path: Option<PathBuf>,
    pub capture_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub gallery_path: Option<PathBuf>,
    pub audio_cues_path: Option<PathBuf>,
    /// Zone the civil day is counted in: an IANA name such as `Asia/Jakarta`
    /// or a fixed offset such as `+07:00`.
    #[serde(alias = "utc_offset")]
    pub timezone: String,
    /// Nearest-neighbour similarity below which a face is unknown. Negative disables the check.
    pub min_similarity: f32,
    pub knn_k: usize,
    /// Extraction worker threads, each with its own model sessions.
    pub workers: usize,
    /// Refuse to record attendance when the capture cannot be stored.
    pub require_capture: bool,
    /// Embed the most confident face instead of rejecting crowded frames.
    pub allow_multiple_faces: bool,
    pub max_body_bytes: usize,
    pub cues: GenericCues,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            data_dir: PathBuf::from("data"),
            db_path: None,
            capture_dir: None,
            model_dir: None,
            gallery_path: None,
            audio_cues_path: None,
            timezone: "Asia/Jakarta".to_string(),
            min_similarity: 0.40,
            knn_k: rollcall_core::classifier::DEFAULT_K,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            require_capture: false,
            allow_multiple_faces: false,
            max_body_bytes: 10 * 1024 * 1024,
            cues: GenericCues::default(),
        }
    }
}

impl Config {
    /// Load `path` if it exists (defaults otherwise), apply the process
    /// environment and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Override fields from `ROLLCALL_*` variables, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let env = EnvSource(lookup);
        env.parse("ROLLCALL_LISTEN_ADDR", &mut self.listen_addr)?;
        env.parse("ROLLCALL_DATA_DIR", &mut self.data_dir)?;
        env.path("ROLLCALL_DB_PATH", &mut self.db_path);
        env.path("ROLLCALL_CAPTURE_DIR", &mut self.capture_dir);
        env.path("ROLLCALL_MODEL_DIR", &mut self.model_dir);
        env.path("ROLLCALL_GALLERY_PATH", &mut self.gallery_path);
        env.path("ROLLCALL_AUDIO_CUES_PATH", &mut self.audio_cues_path);
        env.parse("ROLLCALL_TIMEZONE", &mut self.timezone)?;
        env.parse("ROLLCALL_MIN_SIMILARITY", &mut self.min_similarity)?;
        env.parse("ROLLCALL_KNN_K", &mut self.knn_k)?;
        env.parse("ROLLCALL_WORKERS", &mut self.workers)?;
        env.flag("ROLLCALL_REQUIRE_CAPTURE", &mut self.require_capture);
        env.flag("ROLLCALL_ALLOW_MULTIPLE_FACES", &mut self.allow_multiple_faces);
        env.parse("ROLLCALL_MAX_BODY_BYTES", &mut self.max_body_bytes)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.zone()?;
        if self.knn_k == 0 {
            return Err(ConfigError::Invalid("knn_k must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be positive".into()));
        }
        if self.min_similarity > 1.0 || self.min_similarity.is_nan() {
            return Err(ConfigError::Invalid(format!(
                "min_similarity {} is outside [-1, 1]",
                self.min_similarity
            )));
        }
        Ok(())
    }

    pub fn zone(&self) -> Result<Zone, ConfigError> {
        self.timezone
            .parse()
            .map_err(|e: rollcall_core::clock::ZoneParseError| ConfigError::Invalid(e.to_string()))
    }

    pub fn similarity_threshold(&self) -> Option<f32> {
        (self.min_similarity >= 0.0).then_some(self.min_similarity)
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve(&self.db_path, "attendance.db")
    }

    pub fn capture_dir(&self) -> PathBuf {
        self.resolve(&self.capture_dir, "images")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.resolve(&self.model_dir, "models")
    }

    pub fn gallery_path(&self) -> PathBuf {
        self.resolve(&self.gallery_path, "gallery.json")
    }

    pub fn audio_cues_path(&self) -> PathBuf {
        self.resolve(&self.audio_cues_path, "audio_tracking.json")
    }

    fn resolve(&self, explicit: &Option<PathBuf>, default_name: &str) -> PathBuf {
        explicit
            .clone()
            .unwrap_or_else(|| self.data_dir.join(default_name))
    }
}

struct EnvSource<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn parse<T: FromStr>(&self, key: &str, slot: &mut T) -> Result<(), ConfigError> {
        if let Some(value) = (self.0)(key) {
            *slot = value.trim().parse().map_err(|_| ConfigError::Env {
                key: key.to_string(),
                value,
            })?;
        }
        Ok(())
    }

    fn path(&self, key: &str, slot: &mut Option<PathBuf>) {
        if let Some(value) = (self.0)(key) {
            *slot = Some(PathBuf::from(value));
        }
    }

    fn flag(&self, key: &str, slot: &mut bool) {
        if let Some(value) = (self.0)(key) {
            *slot = !matches!(value.trim(), "0" | "false" | "no" | "off" | "");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.listen_addr.port(), 8000);
        assert_eq!(c.knn_k, 3);
        assert_eq!(c.similarity_threshold(), Some(0.40));
        assert_eq!(c.db_path(), PathBuf::from("data/attendance.db"));
        assert_eq!(c.capture_dir(), PathBuf::from("data/images"));
        assert_eq!(c.zone().unwrap(), Zone::Named(chrono_tz::Asia::Jakarta));
        assert!(c.workers >= 1);
        c.validate().unwrap();
    }

    #[test]
    fn test_toml_file() {
        let c = Config::from_toml(
            r#"
            listen_addr = "127.0.0.1:9000"
            data_dir = "/var/lib/rollcall"
            gallery_path = "/etc/rollcall/gallery.json"
            timezone = "Europe/Berlin"
            min_similarity = -1.0
            require_capture = true

            [cues]
            no_face = "0042"
            "#,
        )
        .unwrap();
        assert_eq!(c.listen_addr.port(), 9000);
        assert_eq!(c.db_path(), PathBuf::from("/var/lib/rollcall/attendance.db"));
        assert_eq!(c.gallery_path(), PathBuf::from("/etc/rollcall/gallery.json"));
        assert_eq!(c.similarity_threshold(), None);
        assert!(c.require_capture);
        assert_eq!(c.cues.no_face.0, "0042");
        assert_eq!(c.cues.already_attended.0, "0001");
        assert_eq!(c.zone().unwrap(), Zone::Named(chrono_tz::Europe::Berlin));
    }

    #[test]
    fn test_legacy_utc_offset_key() {
        let c = Config::from_toml(r#"utc_offset = "+08:00""#).unwrap();
        assert_eq!(
            c.zone().unwrap(),
            Zone::Fixed(chrono::FixedOffset::east_opt(8 * 3600).unwrap())
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            Config::from_toml("camera = \"/dev/video0\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_env(env(&[
            ("ROLLCALL_WORKERS", "2"),
            ("ROLLCALL_MIN_SIMILARITY", "0.55"),
            ("ROLLCALL_DB_PATH", "/tmp/x.db"),
            ("ROLLCALL_REQUIRE_CAPTURE", "1"),
            ("ROLLCALL_TIMEZONE", "Asia/Makassar"),
        ]))
        .unwrap();
        assert_eq!(c.workers, 2);
        assert_eq!(c.similarity_threshold(), Some(0.55));
        assert_eq!(c.db_path(), PathBuf::from("/tmp/x.db"));
        assert!(c.require_capture);
        assert_eq!(c.zone().unwrap(), Zone::Named(chrono_tz::Asia::Makassar));
    }

    #[test]
    fn test_env_bad_value() {
        let mut c = Config::default();
        let err = c.apply_env(env(&[("ROLLCALL_KNN_K", "three")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref key, .. } if key == "ROLLCALL_KNN_K"));
    }

    #[test]
    fn test_validation() {
        let bad_offset = Config {
            timezone: "WIB".into(),
            ..Config::default()
        };
        assert!(bad_offset.validate().is_err());

        let zero_workers = Config {
            workers: 0,
            ..Config::default()
        };
        assert!(zero_workers.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = Config::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(c.knn_k, 3);
    }
}
