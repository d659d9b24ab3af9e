use figment::{
    providers::{Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{BifrostError, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";

// Client profile timeouts (minutes). Overridable per config / env.
pub const DEFAULT_SIMPLE_TIMEOUT_MIN: u64 = 2;
pub const DEFAULT_REQUEST_TIMEOUT_MIN: u64 = 15;
pub const DEFAULT_STREAM_TIMEOUT_MIN: u64 = 30;

/// Top-level config, persisted as JSON (camelCase on disk).
///
/// Load order: explicit path > `BIFROST_CONFIG` env > `./bifrost.json`,
/// then `PORT` / `*_TIMEOUT_MINUTES` env overrides on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BifrostConfig {
    pub login_password: Option<String>,
    pub service_config: ServiceConfig,
    pub auth_tokens: Vec<AuthTokenEntry>,
    pub log_config: LogConfig,
    pub timeout_config: TimeoutConfig,
}

impl Default for BifrostConfig {
    fn default() -> Self {
        Self {
            login_password: None,
            service_config: ServiceConfig::default(),
            auth_tokens: Vec::new(),
            log_config: LogConfig::default(),
            timeout_config: TimeoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub port: u16,
    pub bind: String,
    /// Bearer token clients must present on every /v1 route.
    pub client_token: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            client_token: "change-me".to_string(),
        }
    }
}

/// One upstream credential as persisted. The pool turns these into live
/// credential records at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokenEntry {
    pub id: String,
    pub auth: AuthKind,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthKind {
    Social,
    IdC,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// EnvFilter directive; RUST_LOG takes precedence when set.
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
    pub simple_request_minutes: u64,
    pub request_minutes: u64,
    pub stream_request_minutes: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            simple_request_minutes: DEFAULT_SIMPLE_TIMEOUT_MIN,
            request_minutes: DEFAULT_REQUEST_TIMEOUT_MIN,
            stream_request_minutes: DEFAULT_STREAM_TIMEOUT_MIN,
        }
    }
}

impl BifrostConfig {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var("BIFROST_CONFIG").ok())
            .unwrap_or_else(|| "bifrost.json".to_string());

        let mut config: BifrostConfig = Figment::new()
            .merge(Json::file(&path))
            .extract()
            .map_err(|e| BifrostError::Config(format!("{path}: {e}")))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Documented env vars win over the file.
    fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parse::<u16>("PORT") {
            self.service_config.port = port;
        }
        if let Some(m) = env_parse::<u64>("SIMPLE_REQUEST_TIMEOUT_MINUTES") {
            self.timeout_config.simple_request_minutes = m;
        }
        if let Some(m) = env_parse::<u64>("REQUEST_TIMEOUT_MINUTES") {
            self.timeout_config.request_minutes = m;
        }
        if let Some(m) = env_parse::<u64>("STREAM_REQUEST_TIMEOUT_MINUTES") {
            self.timeout_config.stream_request_minutes = m;
        }
    }

    fn validate(&self) -> Result<()> {
        for entry in &self.auth_tokens {
            if entry.enabled && entry.refresh_token.is_empty() {
                return Err(BifrostError::Config(format!(
                    "credential '{}' is enabled but has no refresh token",
                    entry.id
                )));
            }
            if entry.auth == AuthKind::IdC
                && (entry.client_id.is_none() || entry.client_secret.is_none())
            {
                return Err(BifrostError::Config(format!(
                    "IdC credential '{}' needs both clientId and clientSecret",
                    entry.id
                )));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_persisted_shape() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{
                "serviceConfig": {{"port": 9090, "clientToken": "tok-1"}},
                "authTokens": [
                    {{"id": "a", "auth": "Social", "refreshToken": "rt-1", "description": "primary"}},
                    {{"id": "b", "auth": "IdC", "refreshToken": "rt-2",
                      "clientId": "cid", "clientSecret": "sec", "enabled": false}}
                ],
                "timeoutConfig": {{"streamRequestMinutes": 45}}
            }}"#
        )
        .unwrap();

        let config = BifrostConfig::load(Some(f.path().to_str().unwrap())).unwrap();
        assert_eq!(config.service_config.port, 9090);
        assert_eq!(config.service_config.client_token, "tok-1");
        assert_eq!(config.auth_tokens.len(), 2);
        assert_eq!(config.auth_tokens[0].auth, AuthKind::Social);
        assert!(config.auth_tokens[0].enabled);
        assert!(!config.auth_tokens[1].enabled);
        assert_eq!(config.timeout_config.stream_request_minutes, 45);
        // untouched fields keep defaults
        assert_eq!(config.timeout_config.request_minutes, DEFAULT_REQUEST_TIMEOUT_MIN);
    }

    #[test]
    fn rejects_idc_without_client_pair() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"authTokens": [{{"id": "x", "auth": "IdC", "refreshToken": "rt"}}]}}"#
        )
        .unwrap();
        let err = BifrostConfig::load(Some(f.path().to_str().unwrap())).unwrap_err();
        assert!(matches!(err, BifrostError::Config(_)));
    }

    #[test]
    fn rejects_enabled_credential_without_secret() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"authTokens": [{{"id": "x", "auth": "Social", "refreshToken": ""}}]}}"#
        )
        .unwrap();
        assert!(BifrostConfig::load(Some(f.path().to_str().unwrap())).is_err());
    }
}
