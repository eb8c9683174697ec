use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File};
use serde::Deserialize;

use checker_api::ServerConfig;
use checker_core::logging::LoggingConfig;
use checker_core::CheckersConfig;

/// The full application configuration: the check families plus the HTTP
/// server and logging sections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub checks: CheckersConfig,
    pub http: ServerConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration with priority: environment variables over the
    /// config file over defaults. Without an explicit path, `checks.yaml`
    /// is searched in the working directory, the home directory and
    /// `/etc/config`.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        } else {
            builder = builder.add_source(File::with_name("checks").required(false));
            if let Some(home) = std::env::var_os("HOME") {
                let home = Path::new(&home).join("checks");
                builder =
                    builder.add_source(File::with_name(&home.to_string_lossy()).required(false));
            }
            builder = builder.add_source(File::with_name("/etc/config/checks").required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("SYNTHETIC_CHECKER")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join("synthetic-checker-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("checks.yaml");
        std::fs::write(
            &path,
            r#"
http:
  port: 9090
logging:
  level: debug
httpChecks:
  example:
    url: https://example.com
"#,
        )
        .unwrap();

        let cfg = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.http.port, 9090);
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.checks.http_checks["example"].url, "https://example.com");
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.http.port, 8080);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.checks.is_empty());
    }
}
