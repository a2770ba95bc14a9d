use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Frames discarded after each camera open (exposure settling).
    pub warmup_frames: usize,
    /// Directory containing the SCRFD and ArcFace ONNX models.
    pub model_dir: PathBuf,
    /// Reference photos of known people, one file per photo.
    pub gallery_dir: PathBuf,
    /// Session schedule, JSON or TOML.
    pub sessions_path: PathBuf,
    pub db_path: PathBuf,
    /// Where best-frame JPEGs are written.
    pub capture_dir: PathBuf,
    /// Cosine similarity at or above which a face matches a gallery entry.
    pub similarity_threshold: f32,
    pub poll_interval: Duration,
    /// Record gallery members not seen for the subject in this run as Absent.
    pub mark_absent: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: PathBuf| var(key).map(PathBuf::from).unwrap_or(default);

        Self {
            camera_device: var("ROLLCALL_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            frame_width: parsed(&var, "ROLLCALL_FRAME_WIDTH", 640),
            frame_height: parsed(&var, "ROLLCALL_FRAME_HEIGHT", 480),
            warmup_frames: parsed(&var, "ROLLCALL_WARMUP_FRAMES", 4),
            model_dir: path("ROLLCALL_MODEL_DIR", rollcall_vision::default_model_dir()),
            gallery_dir: path("ROLLCALL_GALLERY_DIR", PathBuf::from("images")),
            sessions_path: path("ROLLCALL_SESSIONS", PathBuf::from("sessions.json")),
            db_path: path("ROLLCALL_DB_PATH", rollcall_store::default_db_path()),
            capture_dir: path("ROLLCALL_CAPTURE_DIR", PathBuf::from("captured_frames")),
            similarity_threshold: parsed(&var, "ROLLCALL_SIMILARITY_THRESHOLD", 0.40),
            poll_interval: Duration::from_secs(parsed(&var, "ROLLCALL_POLL_INTERVAL_SECS", 10u64).max(1)),
            mark_absent: var("ROLLCALL_MARK_ABSENT")
                .map(|v| v != "0" && !v.is_empty())
                .unwrap_or(false),
        }
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.camera_device, "/dev/video0");
        assert_eq!((cfg.frame_width, cfg.frame_height), (640, 480));
        assert_eq!(cfg.sessions_path, PathBuf::from("sessions.json"));
        assert_eq!(cfg.capture_dir, PathBuf::from("captured_frames"));
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert!((cfg.similarity_threshold - 0.40).abs() < 1e-6);
        assert!(!cfg.mark_absent);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video2"),
            ("ROLLCALL_SIMILARITY_THRESHOLD", "0.55"),
            ("ROLLCALL_POLL_INTERVAL_SECS", "2"),
            ("ROLLCALL_SESSIONS", "/etc/rollcall/week.toml"),
            ("ROLLCALL_MARK_ABSENT", "1"),
        ]);
        assert_eq!(cfg.camera_device, "/dev/video2");
        assert!((cfg.similarity_threshold - 0.55).abs() < 1e-6);
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.sessions_path, PathBuf::from("/etc/rollcall/week.toml"));
        assert!(cfg.mark_absent);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let cfg = config(&[
            ("ROLLCALL_FRAME_WIDTH", "wide"),
            ("ROLLCALL_POLL_INTERVAL_SECS", "0"),
            ("ROLLCALL_MARK_ABSENT", "0"),
        ]);
        assert_eq!(cfg.frame_width, 640);
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert!(!cfg.mark_absent);
    }
}
