//! Daemon settings
//!
//! 読み込み順: 組み込みデフォルト → 設定ファイル（任意）→ `HANGAR_` 環境変数。
//! ネストしたキーは `__` で区切る（例: `HANGAR_SERVER__LISTEN_ADDR`）。

use std::net::SocketAddr;

use hangar_core::config::OrchestratorConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Plans, tenants, data root and reconciler tuning.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Hard cap on a multipart request body; the per-tenant ceiling still applies.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DaemonSettings {
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("HANGAR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_max_body_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let settings = DaemonSettings::load(None).unwrap();
        assert_eq!(settings.server.listen_addr, default_listen_addr());
        assert_eq!(settings.logging.level, "info");
        assert!(settings.orchestrator.plans.is_empty());
    }

    #[test]
    fn file_supplies_plans_and_tenants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hangard.toml");
        std::fs::write(
            &path,
            r#"
[server]
listen_addr = "0.0.0.0:9000"

[orchestrator]
data_root = "/var/lib/hangar"

[orchestrator.reconciler]
missing_threshold = 5

[orchestrator.plans.starter]
memory_mb = 512
per_app_mb = 128
max_projects = 3
features = ["shield"]

[[orchestrator.tenants]]
username = "alice"
plan = "starter"
"#,
        )
        .unwrap();

        let settings = DaemonSettings::load(path.to_str()).unwrap();
        assert_eq!(settings.server.listen_addr.port(), 9000);
        let orchestrator = settings.orchestrator;
        assert_eq!(orchestrator.reconciler.missing_threshold, 5);
        assert_eq!(orchestrator.plans["starter"].max_projects, 3);
        assert_eq!(orchestrator.tenants[0].username, "alice");
        assert!(orchestrator.plan_table().is_ok());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(DaemonSettings::load(Some("/nonexistent/hangard.toml")).is_err());
    }
}
