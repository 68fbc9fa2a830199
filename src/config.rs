use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};

use crate::mysql::CredentialStore;

pub const CONFIG_FILE: &str = "proxy_config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mysql_port: u16,
    pub http_port: u16,
    pub bind_host: String,
    pub server_version: String,
    pub version_comment: String,
    /// Seconds a connection may sit between commands; 0 disables the limit.
    pub idle_timeout_secs: u64,
    pub slow_query_ms: u64,
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserConfig {
    pub name: String,
    pub password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mysql_port: 9030,
            http_port: 8030,
            bind_host: "0.0.0.0".to_string(),
            server_version: "5.7.99-sqlproxy-fe".to_string(),
            version_comment: "sqlproxy-fe".to_string(),
            idle_timeout_secs: 28800,
            slow_query_ms: 1000,
            users: vec![UserConfig {
                name: "root".to_string(),
                password: String::new(),
            }],
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::from_file(CONFIG_FILE)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reads `path`, or falls back to defaults and writes them next to it as
    /// `<path>.example`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(_) => {
                let config = Config::default();
                let example = format!("{}.example", path.display());
                let _ = fs::write(example, serde_json::to_string_pretty(&config)?);
                Ok(config)
            }
        }
    }

    /// Applies `PROXY_*` overrides. `lookup` stands in for the process
    /// environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PROXY_MYSQL_PORT") {
            self.mysql_port = port.parse().context("PROXY_MYSQL_PORT")?;
        }

        if let Some(port) = lookup("PROXY_HTTP_PORT") {
            self.http_port = port.parse().context("PROXY_HTTP_PORT")?;
        }

        if let Some(host) = lookup("PROXY_BIND_HOST") {
            self.bind_host = host;
        }

        if let Some(secs) = lookup("PROXY_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = secs.parse().context("PROXY_IDLE_TIMEOUT_SECS")?;
        }

        // Format: "user:password,user2:password2"
        if let Some(users) = lookup("PROXY_USERS") {
            self.users = users
                .split(',')
                .filter(|entry| !entry.trim().is_empty())
                .map(|entry| {
                    let (name, password) = entry.split_once(':').unwrap_or((entry, ""));
                    UserConfig {
                        name: name.trim().to_string(),
                        password: password.to_string(),
                    }
                })
                .collect();
        }

        Ok(())
    }

    pub fn mysql_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.mysql_port)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.http_port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }
}

impl CredentialStore for Config {
    fn password_for(&self, user: &str) -> Option<String> {
        self.users
            .iter()
            .find(|u| u.name == user)
            .map(|u| u.password.clone())
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
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mysql_addr(), "0.0.0.0:9030");
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(28800)));
        assert_eq!(config.password_for("root"), Some(String::new()));
        assert_eq!(config.password_for("nobody"), None);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("PROXY_MYSQL_PORT", "3307"),
                ("PROXY_BIND_HOST", "127.0.0.1"),
                ("PROXY_IDLE_TIMEOUT_SECS", "0"),
                ("PROXY_USERS", "app:s3cr:et, ro:"),
            ]))
            .unwrap();

        assert_eq!(config.mysql_addr(), "127.0.0.1:3307");
        assert_eq!(config.http_port, 8030);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.password_for("app"), Some("s3cr:et".to_string()));
        assert_eq!(config.password_for("ro"), Some(String::new()));
        assert_eq!(config.password_for("root"), None);
    }

    #[test]
    fn test_bad_port_is_an_error() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("PROXY_HTTP_PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("PROXY_HTTP_PORT"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"mysql_port": 4000, "users": [{"name": "u", "password": "p"}]}"#,
        )
        .unwrap();

        assert_eq!(config.mysql_port, 4000);
        assert_eq!(config.slow_query_ms, 1000);
        assert_eq!(config.password_for("u"), Some("p".to_string()));
    }

    #[test]
    fn test_missing_file_writes_example() {
        let dir = std::env::temp_dir().join(format!("sqlproxy-fe-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("proxy_config.json");

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.mysql_port, 9030);
        assert!(dir.join("proxy_config.json.example").exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
