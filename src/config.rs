use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::watermark::restrict_permissions;

pub const DEFAULT_INTERVAL_SECS: i64 = 60;
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Which uid set is requested from the server each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// `UID FETCH 1:*`, filtered client-side. Works around servers with broken range handling.
    #[default]
    All,
    /// `UID FETCH <watermark+1>:*`, still filtered client-side.
    UidRange,
}

/// When the watermark moves relative to attachment extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Advance as soon as the fetch succeeds; a failed extraction is not retried.
    #[default]
    AtMostOnce,
    /// Advance only past messages whose extraction succeeded.
    AtLeastOnce,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// host:port, e.g. "imap.gmail.com:993"
    pub imap_server: String,
    pub imap_user: String,
    pub imap_password: String,
    pub mailbox: String,
    pub output_folder: String,
    pub extension: String,
    pub interval_seconds: i64,
    pub fetch_strategy: FetchStrategy,
    pub delivery: Delivery,
    pub polling_enabled: bool,
    pub notifications_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            imap_server: "imap.gmail.com:993".to_string(),
            imap_user: String::new(),
            imap_password: String::new(),
            mailbox: "INBOX".to_string(),
            output_folder: String::new(),
            extension: "igc".to_string(),
            interval_seconds: DEFAULT_INTERVAL_SECS,
            fetch_strategy: FetchStrategy::All,
            delivery: Delivery::AtMostOnce,
            polling_enabled: true,
            notifications_enabled: true,
        }
    }
}

impl Config {
    /// Poll interval; non-positive values fall back to the default.
    pub fn interval(&self) -> Duration {
        let secs = if self.interval_seconds <= 0 {
            DEFAULT_INTERVAL_SECS
        } else {
            self.interval_seconds
        };
        Duration::from_secs(secs as u64)
    }

    /// Server, user and password are all set. Without them a fetch is a no-op.
    pub fn has_credentials(&self) -> bool {
        !self.imap_server.is_empty() && !self.imap_user.is_empty() && !self.imap_password.is_empty()
    }

    pub fn server_addr(&self) -> Result<ServerAddr> {
        ServerAddr::parse(&self.imap_server)
    }
}

/// Parsed "host:port" connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl ServerAddr {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow!("IMAP server address is empty"));
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| anyhow!("invalid port in IMAP server address '{s}'"))?;
                if host.is_empty() {
                    return Err(anyhow!("missing host in IMAP server address '{s}'"));
                }
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
            None => Ok(Self {
                host: s.to_string(),
                port: DEFAULT_IMAP_PORT,
            }),
        }
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow!("no config dir available"))?
        .join("igc_mail_imap"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// The watermark lives next to the config file it belongs to.
pub fn state_path_for(config_path: &Path) -> PathBuf {
    config_path.with_file_name("state.json")
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        // create a template config for users to edit
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tom = toml::to_string_pretty(&Config::default())?;
        fs::write(path, tom)?;
        restrict_permissions(path, 0o600)?;
        return Err(anyhow!(
            "Created template config at {}; edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&s)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let addr = ServerAddr::parse("imap.example.com:1993").unwrap();
        assert_eq!(addr.host, "imap.example.com");
        assert_eq!(addr.port, 1993);
    }

    #[test]
    fn port_defaults_to_imaps() {
        assert_eq!(ServerAddr::parse("mail.local").unwrap().port, 993);
    }

    #[test]
    fn rejects_bad_port() {
        assert!(ServerAddr::parse("mail.local:imaps").is_err());
        assert!(ServerAddr::parse(":993").is_err());
        assert!(ServerAddr::parse("").is_err());
    }

    #[test]
    fn interval_is_normalised() {
        let mut cfg = Config {
            interval_seconds: 0,
            ..Config::default()
        };
        assert_eq!(cfg.interval(), Duration::from_secs(60));
        cfg.interval_seconds = -5;
        assert_eq!(cfg.interval(), Duration::from_secs(60));
        cfg.interval_seconds = 120;
        assert_eq!(cfg.interval(), Duration::from_secs(120));
    }

    #[test]
    fn partial_file_takes_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            imap_user = "pilot@example.com"
            imap_password = "secret"
            output_folder = "/tmp/igc"
            delivery = "at_least_once"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.imap_server, "imap.gmail.com:993");
        assert_eq!(cfg.mailbox, "INBOX");
        assert_eq!(cfg.extension, "igc");
        assert_eq!(cfg.fetch_strategy, FetchStrategy::All);
        assert_eq!(cfg.delivery, Delivery::AtLeastOnce);
        assert!(cfg.notifications_enabled);
        assert!(cfg.has_credentials());
    }

    #[test]
    fn missing_credentials_detected() {
        assert!(!Config::default().has_credentials());
    }

    #[test]
    fn missing_file_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("igc").join("config.toml");
        assert!(load_config_from(&path).is_err());
        assert!(path.exists());
        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.interval_seconds, DEFAULT_INTERVAL_SECS);
    }
}
