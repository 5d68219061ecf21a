//! Layered runtime configuration.
//!
//! Values merge from three layers, later layers winning:
//! file (`boardsync.toml`) → environment → CLI flags. A `.env` file is
//! loaded into the environment by `main` before this runs.
//!
//! ```toml
//! port = 4114
//! db_path = "boardsync.db"
//! inbound_webhook_token = "shared-secret"
//! outbound_webhook_url = "https://workflows.example.org/webhook/tasks"
//! outbound_webhook_token = "outbound-secret"
//! dev_mode = false
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 4114;
pub const DEFAULT_DB_PATH: &str = "boardsync.db";
const DEFAULT_CONFIG_FILE: &str = "boardsync.toml";

/// Runtime configuration for the boardsync service.
#[derive(Debug, Clone)]
pub struct BoardsyncConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Shared secret expected in `X-Webhook-Token` on inbound deliveries.
    pub inbound_webhook_token: String,
    /// Workflow-engine endpoint for outbound task events; notifications
    /// are disabled when unset.
    pub outbound_webhook_url: Option<String>,
    pub outbound_webhook_token: Option<String>,
    pub dev_mode: bool,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    port: Option<u16>,
    db_path: Option<PathBuf>,
    inbound_webhook_token: Option<String>,
    outbound_webhook_url: Option<String>,
    outbound_webhook_token: Option<String>,
    dev_mode: Option<bool>,
}

impl BoardsyncConfig {
    /// Load configuration, reading `boardsync.toml` when present (or the
    /// explicitly given file, which must then exist).
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let file = match config_file {
            Some(path) => read_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    read_file(default)?
                } else {
                    FileConfig::default()
                }
            }
        };
        merge(file, &|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn merge(file: FileConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<BoardsyncConfig> {
    let port = match env("BOARDSYNC_PORT") {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid BOARDSYNC_PORT: {}", raw))?,
        None => file.port.unwrap_or(DEFAULT_PORT),
    };
    let db_path = env("BOARDSYNC_DB_PATH")
        .map(PathBuf::from)
        .or(file.db_path)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
    let inbound_webhook_token = env("INBOUND_WEBHOOK_TOKEN")
        .or(file.inbound_webhook_token)
        .unwrap_or_default();
    if inbound_webhook_token.is_empty() {
        bail!(
            "inbound webhook token is not configured \
             (set INBOUND_WEBHOOK_TOKEN or inbound_webhook_token in {})",
            DEFAULT_CONFIG_FILE
        );
    }
    let outbound_webhook_url = env("OUTBOUND_WEBHOOK_URL").or(file.outbound_webhook_url);
    let outbound_webhook_token = env("OUTBOUND_WEBHOOK_TOKEN").or(file.outbound_webhook_token);
    let dev_mode = match env("BOARDSYNC_DEV_MODE") {
        Some(raw) => raw != "false" && raw != "0",
        None => file.dev_mode.unwrap_or(false),
    };
    Ok(BoardsyncConfig {
        port,
        db_path,
        inbound_webhook_token,
        outbound_webhook_url,
        outbound_webhook_token,
        dev_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_applied() {
        let file = FileConfig {
            inbound_webhook_token: Some("secret".to_string()),
            ..FileConfig::default()
        };
        let cfg = merge(file, &no_env).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert!(!cfg.dev_mode);
        assert!(cfg.outbound_webhook_url.is_none());
    }

    #[test]
    fn test_missing_inbound_token_fails_fast() {
        let err = merge(FileConfig::default(), &no_env).unwrap_err();
        assert!(err.to_string().contains("inbound webhook token"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileConfig {
            port: Some(9000),
            inbound_webhook_token: Some("from-file".to_string()),
            ..FileConfig::default()
        };
        let cfg = merge(file, &|key| match key {
            "BOARDSYNC_PORT" => Some("4200".to_string()),
            "INBOUND_WEBHOOK_TOKEN" => Some("from-env".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.port, 4200);
        assert_eq!(cfg.inbound_webhook_token, "from-env");
    }

    #[test]
    fn test_invalid_port_rejected() {
        let file = FileConfig {
            inbound_webhook_token: Some("secret".to_string()),
            ..FileConfig::default()
        };
        let err = merge(file, &|key| {
            (key == "BOARDSYNC_PORT").then(|| "not-a-port".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("BOARDSYNC_PORT"));
    }

    #[test]
    fn test_empty_env_value_falls_through() {
        let file = FileConfig {
            inbound_webhook_token: Some("from-file".to_string()),
            ..FileConfig::default()
        };
        // `load` filters empty env vars before they reach merge
        let cfg = merge(file, &no_env).unwrap();
        assert_eq!(cfg.inbound_webhook_token, "from-file");
    }

    #[test]
    fn test_file_parse() {
        let raw = r#"
            port = 8080
            inbound_webhook_token = "secret"
            dev_mode = true
        "#;
        let file: FileConfig = toml::from_str(raw).unwrap();
        let cfg = merge(file, &no_env).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.dev_mode);
    }
}
