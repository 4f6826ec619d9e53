//! Configuration management for qrt.
//!
//! Settings live in an INI-style file, `~/.qrt_config` by default:
//!
//! ```text
//! [general]
//! username = <username>
//! password = <rt password>
//! # optional
//! log_level = debug
//!
//! [rtserver]
//! cacert = ~/path/to/cacert.pem
//! host = rtserver.domain.tld
//! # optional, seconds
//! timeout = 30
//!
//! [svn.<repo name>]
//! url = https://svnserver.domain.tld/path/to/repo
//! ```
//!
//! A non-empty `cacert` switches the client to HTTPS with that file as the
//! only trust anchor. `[svn.*]` sections belong to a companion tool and are
//! ignored here. Values are taken verbatim: quotes and backslashes are kept,
//! and a `#` after a value is part of it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use ini::{Ini, ParseOption};

use crate::error::QrtError;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "QRT_CONFIG";

/// Config file name, relative to the home directory.
const DEFAULT_CONFIG_FILE: &str = ".qrt_config";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Resolved settings for talking to one RT server.
///
/// The password is stored but never logged; `Debug` redacts it.
#[derive(Clone)]
pub struct Config {
    /// Server host name, optionally with a `:port` suffix.
    pub host: String,

    /// Trust anchor for HTTPS. `None` means plain HTTP.
    pub cacert: Option<PathBuf>,

    /// RT user name.
    pub username: String,

    /// RT password. Never log this value.
    password: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Log level for the `qrt` target, used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("cacert", &self.cacert)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Returns the config file location: `$QRT_CONFIG` if set, else `~/.qrt_config`.
    ///
    /// # Errors
    ///
    /// Returns `QrtError::Config` if `QRT_CONFIG` is unset and no home
    /// directory can be determined.
    pub fn default_path() -> Result<PathBuf, QrtError> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        home_dir()
            .map(|home| home.join(DEFAULT_CONFIG_FILE))
            .ok_or_else(|| {
                QrtError::config(format!(
                    "cannot locate config file: {} is unset and no home directory was found",
                    CONFIG_PATH_ENV
                ))
            })
    }

    /// Reads and validates the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `QrtError::Config` if the file cannot be read, is malformed,
    /// or lacks a required key.
    pub fn load(path: &Path) -> Result<Self, QrtError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            QrtError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
            .map_err(|e| QrtError::config(format!("{}: {}", path.display(), e)))
    }

    /// Builds a config from INI text.
    ///
    /// # Errors
    ///
    /// Returns `QrtError::Config` describing the first problem found.
    pub fn parse(contents: &str) -> Result<Self, QrtError> {
        let options = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            enabled_indented_mutiline_value: true,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(contents, options)
            .map_err(|e| QrtError::config(e.to_string()))?;

        let host = require(&ini, "rtserver", "host")?.to_string();
        let username = require(&ini, "general", "username")?.to_string();
        let password = require(&ini, "general", "password")?.to_string();

        let home = home_dir();
        let cacert = ini
            .get_from(Some("rtserver"), "cacert")
            .filter(|v| !v.is_empty())
            .map(|v| expand_tilde(v, home.as_deref()));

        let timeout = match ini.get_from(Some("rtserver"), "timeout") {
            Some(raw) => Self::parse_timeout(raw)?,
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let log_level = ini
            .get_from(Some("general"), "log_level")
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok(Config {
            host,
            cacert,
            username,
            password,
            timeout,
            log_level,
        })
    }

    /// Creates a config directly, without a file.
    pub fn new(
        host: impl Into<String>,
        cacert: Option<PathBuf>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Config {
            host: host.into(),
            cacert,
            username: username.into(),
            password: password.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            log_level: None,
        }
    }

    /// Whether requests go over HTTPS.
    pub fn use_tls(&self) -> bool {
        self.cacert.is_some()
    }

    /// The RT password. Only for building request bodies and sanitizing errors.
    pub fn password(&self) -> &str {
        &self.password
    }

    fn parse_timeout(raw: &str) -> Result<Duration, QrtError> {
        match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(QrtError::config(format!(
                "[rtserver] timeout must be a positive number of seconds, got {:?}",
                raw
            ))),
        }
    }
}

/// The current user's home directory.
fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Expands a leading `~` to the home directory, if one is known.
fn expand_tilde(value: &str, home: Option<&Path>) -> PathBuf {
    match (value.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home.to_path_buf(),
        (Some(rest), Some(home)) if rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(value),
    }
}

/// Looks up a key that must be present and non-empty.
fn require<'a>(ini: &'a Ini, section: &str, key: &str) -> Result<&'a str, QrtError> {
    let entries = ini
        .section(Some(section))
        .ok_or_else(|| QrtError::config(format!("missing section [{}]", section)))?;
    entries
        .get(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| QrtError::config(format!("missing [{}] {}", section, key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = "\
[general]
username = alice
password = s3cret

[rtserver]
cacert = /etc/ssl/rt-ca.pem
host = rt.example.org

[svn.main]
url = https://svn.example.org/repo
viewvc = https://svn.example.org/viewvc #this feature relies on viewvc
desc = Main repo
";

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.host, "rt.example.org");
        assert_eq!(config.username, "alice");
        assert_eq!(config.password(), "s3cret");
        assert_eq!(config.cacert, Some(PathBuf::from("/etc/ssl/rt-ca.pem")));
        assert!(config.use_tls());
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn test_empty_cacert_means_plain_http() {
        let text = "[general]\nusername=a\npassword=b\n[rtserver]\nhost=rt\ncacert =\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.cacert, None);
        assert!(!config.use_tls());
    }

    #[test]
    fn test_optional_settings() {
        let text = "\
; comment
[general]
Username: bob
password = pw
log_level = debug
[rtserver]
host = rt:8080
timeout = 5
";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.username, "bob");
        assert_eq!(config.host, "rt:8080");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_missing_section() {
        let err = Config::parse("[general]\nusername=a\npassword=b\n").unwrap_err();
        assert!(err.to_string().contains("[rtserver]"));
    }

    #[test]
    fn test_missing_key() {
        let err = Config::parse("[general]\nusername=a\n[rtserver]\nhost=rt\n").unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_rejects_bad_timeout() {
        let text = "[general]\nusername=a\npassword=b\n[rtserver]\nhost=rt\ntimeout=0\n";
        assert!(Config::parse(text).is_err());
        let text = "[general]\nusername=a\npassword=b\n[rtserver]\nhost=rt\ntimeout=soon\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_malformed_file() {
        let err = Config::parse("[rtserver\n").unwrap_err();
        assert!(matches!(err, QrtError::Config(_)));
    }

    #[test]
    fn test_continuation_lines_are_accepted() {
        let text = format!("{}  second line of desc\n", SAMPLE);
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.host, "rt.example.org");
    }

    #[test]
    fn test_values_are_taken_verbatim() {
        let text = "[general]\nusername=a\npassword=\"p\\w\"\n[rtserver]\nhost=rt\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.password(), "\"p\\w\"");
    }

    #[test]
    fn test_expand_tilde() {
        let home = Path::new("/home/alice");
        assert_eq!(
            expand_tilde("~/certs/ca.pem", Some(home)),
            PathBuf::from("/home/alice/certs/ca.pem")
        );
        assert_eq!(expand_tilde("~", Some(home)), PathBuf::from("/home/alice"));
        assert_eq!(expand_tilde("/abs/ca.pem", Some(home)), PathBuf::from("/abs/ca.pem"));
        assert_eq!(expand_tilde("~bob/ca.pem", Some(home)), PathBuf::from("~bob/ca.pem"));
        assert_eq!(expand_tilde("~/ca.pem", None), PathBuf::from("~/ca.pem"));
    }

    #[test]
    fn test_cacert_tilde_uses_home_directory() {
        let Some(home) = home_dir() else { return };
        let text = "[general]\nusername=a\npassword=b\n[rtserver]\nhost=rt\ncacert=~/ca.pem\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.cacert, Some(home.join("ca.pem")));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.host, "rt.example.org");
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, QrtError::Config(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = Config::new("rt", None, "alice", "topsecret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("topsecret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
