use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INSTALLED: OnceCell<()> = OnceCell::new();

const LOG_FILE_FALLBACK: &str = "dracofit.logs.jsonl";

/// Where log records go.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LogSink {
    /// Compact records on stderr, keeping stdout free for streamed answers.
    Stderr,
    /// One JSON object per line in the given file.
    JsonFile(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LogSettings {
    enabled: bool,
    filter: String,
    sink: LogSink,
}

impl LogSettings {
    fn from_lookup(default_level: &str, var: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = var("DRACOFIT_OBSERVABILITY")
            .map(|v| switch_value(&v).unwrap_or(true))
            .unwrap_or(true);
        let filter = var("DRACOFIT_LOG_LEVEL")
            .filter(|v| EnvFilter::try_new(v).is_ok())
            .or_else(|| var("RUST_LOG").filter(|v| EnvFilter::try_new(v).is_ok()))
            .unwrap_or_else(|| default_level.to_string());
        let sink = match var("DRACOFIT_JSON_LOG_PATH").filter(|p| !p.trim().is_empty()) {
            Some(path) => LogSink::JsonFile(PathBuf::from(path)),
            None => LogSink::Stderr,
        };
        Self {
            enabled,
            filter,
            sink,
        }
    }
}

fn switch_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn split_log_path(path: &Path) -> (&Path, &str) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(LOG_FILE_FALLBACK);
    (dir, file)
}

/// Installs the process-wide tracing subscriber. Later calls are no-ops.
///
/// `default_level` applies unless `DRACOFIT_LOG_LEVEL` or `RUST_LOG` holds a
/// valid filter. `DRACOFIT_JSON_LOG_PATH` switches output to a JSONL file and
/// `DRACOFIT_OBSERVABILITY=off` installs nothing.
pub fn init_observability(default_level: &str) {
    INSTALLED.get_or_init(|| {
        let settings = LogSettings::from_lookup(default_level, |k| std::env::var(k).ok());
        if !settings.enabled {
            return;
        }
        let filter = EnvFilter::new(&settings.filter);
        let registry = tracing_subscriber::registry().with(filter);
        let installed = match &settings.sink {
            LogSink::Stderr => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
            LogSink::JsonFile(path) => {
                let (dir, file) = split_log_path(path);
                let _ = std::fs::create_dir_all(dir);
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_current_span(true)
                            .with_target(false)
                            .with_writer(tracing_appender::rolling::never(dir, file)),
                    )
                    .try_init()
            }
        };
        if installed.is_err() {
            tracing::debug!("a tracing subscriber was already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup("warn", |k| vars.get(k).cloned())
    }

    #[test]
    fn switch_values() {
        assert_eq!(switch_value(" ON "), Some(true));
        assert_eq!(switch_value("disabled"), Some(false));
        assert_eq!(switch_value("maybe"), None);
    }

    #[test]
    fn defaults_to_stderr_at_caller_level() {
        let s = settings(&[]);
        assert!(s.enabled);
        assert_eq!(s.filter, "warn");
        assert_eq!(s.sink, LogSink::Stderr);
    }

    #[test]
    fn log_level_wins_over_rust_log_and_invalid_values_fall_through() {
        assert_eq!(
            settings(&[("DRACOFIT_LOG_LEVEL", "debug"), ("RUST_LOG", "info")]).filter,
            "debug"
        );
        assert_eq!(
            settings(&[("DRACOFIT_LOG_LEVEL", "dracofit=loud"), ("RUST_LOG", "info")]).filter,
            "info"
        );
    }

    #[test]
    fn json_path_and_disable_switch() {
        let s = settings(&[
            ("DRACOFIT_JSON_LOG_PATH", "logs/chat.jsonl"),
            ("DRACOFIT_OBSERVABILITY", "off"),
        ]);
        assert!(!s.enabled);
        assert_eq!(s.sink, LogSink::JsonFile(PathBuf::from("logs/chat.jsonl")));
        assert_eq!(
            split_log_path(Path::new("chat.jsonl")),
            (Path::new("."), "chat.jsonl")
        );
    }
}
