//! Process configuration – reads/writes `~/.tagfuse/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagfuse_middleware::topic;
use tagfuse_perception::{CameraConfig, FieldMap, Marker, field_map::BENCH_MARKER};
use tagfuse_runtime::{EstimatorConfig, SourceConfig};
use tagfuse_types::LocError;

/// Persisted configuration stored in `~/.tagfuse/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// First segment of every input topic.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Robot identity, second segment of every input topic.
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Output topic for pose estimates.
    #[serde(default = "default_pose_topic")]
    pub pose_topic: String,

    /// WebSocket bridge listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    /// Per-topic broadcast buffer depth.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Subscribe to `<domain>/<identity>/Odometry`.
    #[serde(default)]
    pub odometry: bool,

    #[serde(default = "default_noise")]
    pub odometry_noise_per_metre: f64,

    #[serde(default = "default_noise")]
    pub odometry_noise_per_radian: f64,

    /// One entry per camera; the index is the topic's camera segment.
    #[serde(default = "default_cameras")]
    pub cameras: Vec<CameraConfig>,

    #[serde(default = "default_markers")]
    pub markers: Vec<Marker>,
}

fn default_domain() -> String {
    "vision".to_string()
}
fn default_identity() -> String {
    "unknown".to_string()
}
fn default_pose_topic() -> String {
    topic::DEFAULT_POSE_TOPIC.to_string()
}
fn default_listen_addr() -> String {
    "127.0.0.1:5810".to_string()
}
fn default_tick_period_ms() -> u64 {
    20
}
fn default_bus_capacity() -> usize {
    256
}
fn default_noise() -> f64 {
    0.05
}
fn default_cameras() -> Vec<CameraConfig> {
    vec![CameraConfig::default()]
}
fn default_markers() -> Vec<Marker> {
    vec![BENCH_MARKER]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            identity: default_identity(),
            pose_topic: default_pose_topic(),
            listen_addr: default_listen_addr(),
            tick_period_ms: default_tick_period_ms(),
            bus_capacity: default_bus_capacity(),
            odometry: false,
            odometry_noise_per_metre: default_noise(),
            odometry_noise_per_radian: default_noise(),
            cameras: default_cameras(),
            markers: default_markers(),
        }
    }
}

impl Config {
    /// `<domain>/<identity>/<index>/Observation` for every camera.
    pub fn source_topics(&self) -> Vec<String> {
        (0..self.cameras.len())
            .map(|i| topic::observation_topic(&self.domain, &self.identity, i))
            .collect()
    }

    pub fn odometry_topic(&self) -> Option<String> {
        self.odometry
            .then(|| topic::odometry_topic(&self.domain, &self.identity))
    }

    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            sources: self
                .source_topics()
                .into_iter()
                .zip(&self.cameras)
                .map(|(topic, camera)| SourceConfig {
                    topic,
                    camera: *camera,
                })
                .collect(),
            odometry_noise_per_metre: self.odometry_noise_per_metre,
            odometry_noise_per_radian: self.odometry_noise_per_radian,
        }
    }

    pub fn field_map(&self) -> Result<FieldMap, LocError> {
        FieldMap::new(self.markers.iter().copied())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, LocError> {
        self.listen_addr
            .parse()
            .map_err(|e| LocError::Config(format!("listen_addr {:?}: {e}", self.listen_addr)))
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }
}

/// Path of the config file: `TAGFUSE_CONFIG` if set, else
/// `~/.tagfuse/config.toml`.
pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    resolve_config_path(std::env::var("TAGFUSE_CONFIG").ok().as_deref(), &home)
}

pub(crate) fn resolve_config_path(explicit: Option<&str>, home: &str) -> PathBuf {
    match explicit {
        Some(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(home).join(".tagfuse").join("config.toml"),
    }
}

/// Load the config from disk and apply `TAGFUSE_*` overrides. Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, LocError> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, LocError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| LocError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| LocError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply `TAGFUSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TAGFUSE_DOMAIN` | `domain` |
/// | `TAGFUSE_IDENTITY` | `identity` |
/// | `TAGFUSE_POSE_TOPIC` | `pose_topic` |
/// | `TAGFUSE_LISTEN_ADDR` | `listen_addr` |
/// | `TAGFUSE_TICK_MS` | `tick_period_ms` |
/// | `TAGFUSE_BUS_CAPACITY` | `bus_capacity` |
/// | `TAGFUSE_ODOMETRY` | `odometry` (`true`/`false`/`1`/`0`) |
///
/// Unparseable numeric or boolean values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("TAGFUSE_DOMAIN") {
        cfg.domain = v;
    }
    if let Ok(v) = std::env::var("TAGFUSE_IDENTITY") {
        cfg.identity = v;
    }
    if let Ok(v) = std::env::var("TAGFUSE_POSE_TOPIC") {
        cfg.pose_topic = v;
    }
    if let Ok(v) = std::env::var("TAGFUSE_LISTEN_ADDR") {
        cfg.listen_addr = v;
    }
    if let Ok(v) = std::env::var("TAGFUSE_TICK_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.tick_period_ms = ms;
    }
    if let Ok(v) = std::env::var("TAGFUSE_BUS_CAPACITY")
        && let Ok(n) = v.trim().parse::<usize>()
    {
        cfg.bus_capacity = n;
    }
    if let Ok(v) = std::env::var("TAGFUSE_ODOMETRY") {
        match v.trim() {
            "1" | "true" => cfg.odometry = true,
            "0" | "false" => cfg.odometry = false,
            _ => {}
        }
    }
}

/// Save the config to `path`, creating its directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), LocError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| LocError::Config(format!("failed to create {}: {e}", parent.display())))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                LocError::Config(format!("failed to restrict {}: {e}", parent.display()))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| LocError::Config(format!("failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| {
        LocError::Config(format!("failed to write {}: {e}", path.display()))
    };
    // Owner-only file (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(dir: &tempfile::TempDir) -> PathBuf {
        resolve_config_path(None, &dir.path().to_string_lossy())
    }

    #[test]
    fn config_path_defaults_under_home() {
        let p = resolve_config_path(None, "/home/robot");
        assert_eq!(p, PathBuf::from("/home/robot/.tagfuse/config.toml"));
    }

    #[test]
    fn explicit_config_path_wins() {
        let p = resolve_config_path(Some("/etc/tagfuse.toml"), "/home/robot");
        assert_eq!(p, PathBuf::from("/etc/tagfuse.toml"));
        let blank = resolve_config_path(Some("  "), "/home/robot");
        assert!(blank.ends_with(".tagfuse/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        assert!(load_from(&temp_config_path(&dir)).expect("no error").is_none());
    }

    #[test]
    fn default_config_survives_save_and_load() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = temp_config_path(&dir);

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");

        assert_eq!(loaded.pose_topic, "pose");
        assert_eq!(loaded.tick_period_ms, 20);
        assert_eq!(loaded.cameras.len(), 1);
        assert_eq!(loaded.markers, vec![BENCH_MARKER]);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = temp_config_path(&dir);
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().expect("parent"))
            .expect("dir")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn sparse_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            identity = "bot-7"
            odometry = true

            [[cameras]]
            pixel_sigma = 0.5
            [cameras.intrinsics]
            fx = 600.0
            fy = 600.0
            cx = 320.0
            cy = 240.0
            [cameras.mount]
            x = 0.2
            y = 0.0
            z = 0.6

            [[cameras]]
            [cameras.intrinsics]
            fx = 600.0
            fy = 600.0
            cx = 320.0
            cy = 240.0
            [cameras.mount]
            x = -0.2
            y = 0.0
            z = 0.6
            yaw = 3.14159
            "#,
        )
        .expect("write");

        let cfg = load_from(&path).expect("parse").expect("some");
        assert_eq!(cfg.domain, "vision");
        assert_eq!(cfg.cameras.len(), 2);
        assert_eq!(cfg.cameras[0].pixel_sigma, 0.5);
        assert_eq!(cfg.cameras[1].pixel_sigma, 1.0);
        assert_eq!(
            cfg.source_topics(),
            vec![
                "vision/bot-7/0/Observation".to_string(),
                "vision/bot-7/1/Observation".to_string()
            ]
        );
        assert_eq!(cfg.odometry_topic().as_deref(), Some("vision/bot-7/Odometry"));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "tick_period_ms = \"soon\"").expect("write");
        assert!(matches!(load_from(&path), Err(LocError::Config(_))));
    }

    #[test]
    fn estimator_config_pairs_topics_with_cameras() {
        let cfg = Config::default();
        let est = cfg.estimator_config();
        assert_eq!(est.sources.len(), 1);
        assert_eq!(est.sources[0].topic, "vision/unknown/0/Observation");
        assert_eq!(est.sources[0].camera, cfg.cameras[0]);
        assert!(cfg.odometry_topic().is_none());
    }

    #[test]
    fn duplicate_markers_fail_field_map() {
        let cfg = Config {
            markers: vec![BENCH_MARKER, BENCH_MARKER],
            ..Config::default()
        };
        assert!(cfg.field_map().is_err());
        assert_eq!(Config::default().field_map().expect("map").len(), 1);
    }

    #[test]
    fn listen_addr_and_tick_period() {
        let mut cfg = Config::default();
        assert_eq!(cfg.listen_addr().expect("addr").port(), 5810);
        cfg.listen_addr = "not an address".to_string();
        assert!(cfg.listen_addr().is_err());

        cfg.tick_period_ms = 0;
        assert_eq!(cfg.tick_period(), Duration::from_millis(1));
    }

    #[test]
    fn apply_env_overrides_changes_identity() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("TAGFUSE_IDENTITY", "bot-9") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.identity, "bot-9");
        unsafe { std::env::remove_var("TAGFUSE_IDENTITY") };
    }

    #[test]
    fn apply_env_overrides_parses_tick_period() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("TAGFUSE_TICK_MS", "50") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.tick_period_ms, 50);

        unsafe { std::env::set_var("TAGFUSE_TICK_MS", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.tick_period_ms, 20);
        unsafe { std::env::remove_var("TAGFUSE_TICK_MS") };
    }

    #[test]
    fn apply_env_overrides_toggles_odometry() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("TAGFUSE_ODOMETRY", "1") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.odometry);
        unsafe { std::env::remove_var("TAGFUSE_ODOMETRY") };
    }
}
