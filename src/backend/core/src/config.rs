//! Configuration management.

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Access resolver configuration
    #[serde(default)]
    pub access: AccessConfig,

    /// Principal extraction configuration
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Install the Prometheus recorder
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Global role names treated as instance superusers
    #[serde(default = "default_superuser_roles")]
    pub superuser_roles: Vec<String>,

    /// Synthesize memberships for superusers
    #[serde(default = "default_global_admin_bypass")]
    pub global_admin_bypass: bool,

    /// Buffer size of the denial audit channel
    #[serde(default = "default_audit_channel_buffer")]
    pub audit_channel_buffer: usize,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            superuser_roles: default_superuser_roles(),
            global_admin_bypass: default_global_admin_bypass(),
            audit_channel_buffer: default_audit_channel_buffer(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret used to decode bearer tokens issued upstream
    pub jwt_secret: Option<String>,

    /// Expected `iss` claim
    pub jwt_issuer: Option<String>,

    /// Expected `aud` claim; unchecked when unset
    pub jwt_audience: Option<String>,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 5 }
fn default_acquire_timeout_secs() -> u64 { 5 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_enabled() -> bool { true }
fn default_superuser_roles() -> Vec<String> { vec!["superadmin".to_string()] }
fn default_global_admin_bypass() -> bool { true }
fn default_audit_channel_buffer() -> usize { 1024 }

impl Config {
    /// Load configuration from environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("ACCESS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("access.superuser_roles")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("ACCESS").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_defaults() {
        let access = AccessConfig::default();
        assert_eq!(access.superuser_roles, vec!["superadmin".to_string()]);
        assert!(access.global_admin_bypass);
        assert_eq!(access.audit_channel_buffer, 1024);
    }

    #[test]
    fn test_deserialize_minimal() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://localhost/access" }
        }))
        .unwrap();

        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.database.max_connections, 20);
        assert!(cfg.auth.jwt_secret.is_none());
        assert!(cfg.observability.otlp_endpoint.is_none());
    }
}
