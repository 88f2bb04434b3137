//! Tracing subscriber setup.
//!
//! Environment variables:
//!   LOG_FORMAT  - "json" or "text" (default: "text")
//!   LOG_FILE    - path to log file (optional, enables daily-rolling file output)
//!   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
//!   RUST_LOG    - standard env filter (default: [`DEFAULT_FILTER`])

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Targets match by prefix, so this covers every `keel_*` crate.
pub const DEFAULT_FILTER: &str = "keel=info";

const DEFAULT_LOG_FILE_NAME: &str = "keel-worker.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogSettings {
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    pub ansi: Option<bool>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unknown formats fall back to text; logging is not up yet to report it.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let file = lookup("LOG_FILE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let ansi = lookup("LOG_ANSI").map(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1"
        });

        Self { format, file, ansi }
    }

    /// Directory and file name for the rolling appender.
    fn file_parts(path: &Path) -> (PathBuf, String) {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(DEFAULT_LOG_FILE_NAME)
            .to_string();
        (dir, name)
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process.
pub fn init(settings: &LogSettings) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = settings.file {
        let (dir, name) = LogSettings::file_parts(path);
        let file_appender = tracing_appender::rolling::daily(dir, name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        match settings.format {
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init(),
            LogFormat::Text => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(settings.ansi.unwrap_or(false)),
                )
                .init(),
        }
        Some(guard)
    } else {
        match settings.format {
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json())
                .init(),
            LogFormat::Text => {
                let mut layer = tracing_subscriber::fmt::layer();
                if let Some(ansi) = settings.ansi {
                    layer = layer.with_ansi(ansi);
                }
                registry.with(layer).init();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(settings(&[]), LogSettings::default());
    }

    #[test]
    fn test_json_and_file() {
        let s = settings(&[("LOG_FORMAT", "JSON"), ("LOG_FILE", "/var/log/keel/w.log")]);
        assert_eq!(s.format, LogFormat::Json);
        assert_eq!(s.file, Some(PathBuf::from("/var/log/keel/w.log")));
    }

    #[test]
    fn test_unknown_format_is_text() {
        assert_eq!(settings(&[("LOG_FORMAT", "xml")]).format, LogFormat::Text);
    }

    #[test]
    fn test_ansi_override() {
        assert_eq!(settings(&[("LOG_ANSI", "1")]).ansi, Some(true));
        assert_eq!(settings(&[("LOG_ANSI", "false")]).ansi, Some(false));
        assert_eq!(settings(&[]).ansi, None);
    }

    #[test]
    fn test_blank_log_file_is_stdout() {
        assert_eq!(settings(&[("LOG_FILE", "  ")]).file, None);
    }

    #[test]
    fn test_default_filter_parses() {
        let filter = EnvFilter::new(DEFAULT_FILTER);
        assert_eq!(filter.to_string(), "keel=info");
    }

    #[test]
    fn test_file_parts() {
        let (dir, name) = LogSettings::file_parts(Path::new("/tmp/keel/worker.log"));
        assert_eq!(dir, PathBuf::from("/tmp/keel"));
        assert_eq!(name, "worker.log");

        let (dir, name) = LogSettings::file_parts(Path::new("worker.log"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "worker.log");
    }
}
