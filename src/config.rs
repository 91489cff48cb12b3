use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time between two runs of the command.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// strftime rendering of the classic `Mon Jan _2 15:04:05 2006` layout.
pub const DEFAULT_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Top-level layout of an optional `rewatch.toml`.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub watch: WatchSection,
}

/// The `[watch]` table. Every key is optional; CLI flags take precedence.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct WatchSection {
    pub interval_secs: Option<f64>,
    pub no_title: Option<bool>,
    pub exec: Option<bool>,
    pub hostname: Option<String>,
    pub time_format: Option<String>,
    pub shell: Option<PathBuf>,
    pub timeout_secs: Option<f64>,
}

/// Values supplied on the command line, before defaults are applied.
#[derive(Debug, Default)]
pub struct Overrides {
    pub interval: Option<Duration>,
    pub no_title: bool,
    pub exec: bool,
    pub hostname: Option<String>,
    pub time_format: Option<String>,
    pub shell: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

/// Fully resolved, immutable settings consumed by the watch loop.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub interval: Duration,
    pub no_title: bool,
    /// Run the command directly instead of through `shell -c`.
    pub exec: bool,
    /// Shown in the header as `{hostname}: {time}`. Empty means time only.
    pub hostname: Option<String>,
    pub time_format: String,
    pub shell: PathBuf,
    /// Kill the command if a single run exceeds this. `None` waits forever.
    pub timeout: Option<Duration>,
    pub command: Vec<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidSeconds {
        key: &'static str,
        message: String,
    },
    InvalidTimeFormat {
        format: String,
    },
    EmptyCommand,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::InvalidSeconds { key, message } => {
                write!(f, "invalid value for {key}: {message}")
            }
            ConfigError::InvalidTimeFormat { format } => {
                write!(f, "invalid time format '{format}'")
            }
            ConfigError::EmptyCommand => write!(f, "no command given"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidSeconds { .. }
            | ConfigError::InvalidTimeFormat { .. }
            | ConfigError::EmptyCommand => None,
        }
    }
}

/// Parse a positive, possibly fractional number of seconds.
///
/// Used as the clap value parser for `--interval` and `--timeout`.
pub fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    seconds_to_duration(secs)
}

fn seconds_to_duration(secs: f64) -> Result<Duration, String> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("{secs} must be a positive number of seconds"));
    }
    let duration = Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err(format!("{secs} is shorter than one nanosecond"));
    }
    Ok(duration)
}

/// Load a TOML config file. A missing `path` yields the defaults.
pub fn load(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: FileConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    tracing::debug!(path = %path.display(), ?config, "loaded config file");
    Ok(config)
}

impl WatchConfig {
    /// Merge CLI overrides over file values over built-in defaults.
    ///
    /// The hostname falls back to the system hostname when neither source
    /// sets one.
    pub fn resolve(
        file: FileConfig,
        cli: Overrides,
        command: Vec<String>,
    ) -> Result<Self, ConfigError> {
        if command.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        let section = file.watch;

        let interval = match (cli.interval, section.interval_secs) {
            (Some(d), _) => d,
            (None, Some(secs)) => seconds_to_duration(secs).map_err(|message| {
                ConfigError::InvalidSeconds {
                    key: "watch.interval_secs",
                    message,
                }
            })?,
            (None, None) => DEFAULT_INTERVAL,
        };
        let timeout = match (cli.timeout, section.timeout_secs) {
            (Some(d), _) => Some(d),
            (None, Some(secs)) => Some(seconds_to_duration(secs).map_err(|message| {
                ConfigError::InvalidSeconds {
                    key: "watch.timeout_secs",
                    message,
                }
            })?),
            (None, None) => None,
        };

        let time_format = cli
            .time_format
            .or(section.time_format)
            .unwrap_or_else(|| DEFAULT_TIME_FORMAT.to_string());
        if StrftimeItems::new(&time_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::InvalidTimeFormat {
                format: time_format,
            });
        }

        let hostname = cli
            .hostname
            .or(section.hostname)
            .or_else(system_hostname);

        Ok(Self {
            interval,
            no_title: cli.no_title || section.no_title.unwrap_or(false),
            exec: cli.exec || section.exec.unwrap_or(false),
            hostname,
            time_format,
            shell: cli
                .shell
                .or(section.shell)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SHELL)),
            timeout,
            command,
        })
    }

    /// The command words joined by single spaces, as shown in the header
    /// and passed to the shell.
    pub fn joined_command(&self) -> String {
        self.command.join(" ")
    }
}

fn system_hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(name) => Some(name.to_string_lossy().into_owned()),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read system hostname");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cmd(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_parse_seconds_fractional() {
        assert_eq!(parse_seconds("0.5").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_seconds("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_seconds(" 1.25 ").unwrap(), Duration::from_millis(1250));
    }

    #[test]
    fn test_parse_seconds_rejects_non_positive() {
        assert!(parse_seconds("0").is_err());
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("inf").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("abc").is_err());
    }

    #[test]
    fn test_resolve_defaults() {
        let config = WatchConfig::resolve(
            FileConfig::default(),
            Overrides {
                hostname: Some("box".to_string()),
                ..Default::default()
            },
            cmd(&["echo", "hi"]),
        )
        .unwrap();
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert_eq!(config.time_format, DEFAULT_TIME_FORMAT);
        assert_eq!(config.shell, PathBuf::from("/bin/sh"));
        assert!(!config.no_title);
        assert!(!config.exec);
        assert!(config.timeout.is_none());
        assert_eq!(config.hostname.as_deref(), Some("box"));
        assert_eq!(config.joined_command(), "echo hi");
    }

    #[test]
    fn test_resolve_rejects_empty_command() {
        let err = WatchConfig::resolve(FileConfig::default(), Overrides::default(), vec![])
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCommand));
    }

    #[test]
    fn test_resolve_hostname_falls_back_to_system() {
        let config =
            WatchConfig::resolve(FileConfig::default(), Overrides::default(), cmd(&["true"]))
                .unwrap();
        let expected = nix::unistd::gethostname()
            .ok()
            .map(|h| h.to_string_lossy().into_owned());
        assert_eq!(config.hostname, expected);
    }

    #[test]
    fn test_empty_hostname_is_kept() {
        let config = WatchConfig::resolve(
            FileConfig::default(),
            Overrides {
                hostname: Some(String::new()),
                ..Default::default()
            },
            cmd(&["true"]),
        )
        .unwrap();
        assert_eq!(config.hostname.as_deref(), Some(""));
    }

    #[test]
    fn test_resolve_rejects_bad_time_format() {
        let err = WatchConfig::resolve(
            FileConfig::default(),
            Overrides {
                time_format: Some("%Q broken".to_string()),
                ..Default::default()
            },
            cmd(&["date"]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeFormat { .. }));
    }

    #[test]
    fn test_load_missing_path_is_default() {
        let config = load(None).unwrap();
        assert!(config.watch.interval_secs.is_none());
    }

    #[test]
    fn test_load_file_and_cli_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewatch.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[watch]\ninterval_secs = 0.5\nno_title = true\nhostname = \"filehost\"\nshell = \"/bin/bash\"\ntimeout_secs = 3"
        )
        .unwrap();
        drop(f);

        let file = load(Some(&path)).unwrap();
        let config = WatchConfig::resolve(
            file,
            Overrides {
                hostname: Some("clihost".to_string()),
                ..Default::default()
            },
            cmd(&["date"]),
        )
        .unwrap();
        assert_eq!(config.interval, Duration::from_millis(500));
        assert!(config.no_title);
        assert_eq!(config.hostname.as_deref(), Some("clihost"));
        assert_eq!(config.shell, PathBuf::from("/bin/bash"));
        assert_eq!(config.timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_load_rejects_bad_interval_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewatch.toml");
        std::fs::write(&path, "[watch]\ninterval_secs = 0\n").unwrap();
        let file = load(Some(&path)).unwrap();
        let err = WatchConfig::resolve(file, Overrides::default(), cmd(&["date"])).unwrap_err();
        assert!(err.to_string().contains("watch.interval_secs"));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[watch\n").unwrap();
        let err = load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Some(Path::new("/nonexistent-dir/rewatch.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("failed to read config"));
    }
}
