//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.invoke/config.json`) and environment.
//! Datastore credentials and admin credentials may come from either; environment wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Hosted datastore connection.
    #[serde(default)]
    pub datastore: DatastoreConfig,

    /// Admin metrics options.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Gateway bind, port, and admin auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 3000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Basic auth for `/admin` and `/api/admin/*`. Overridden by ADMIN_USER / ADMIN_PASS.
    #[serde(default)]
    pub admin: AdminAuthConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAuthConfig {
    pub user: Option<String>,
    pub pass: Option<String>,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            admin: AdminAuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreBackend {
    /// Hosted PostgREST endpoint (`{url}/rest/v1`).
    #[default]
    Postgrest,
    /// Process-local store; contents are lost on exit.
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreConfig {
    #[serde(default)]
    pub backend: DatastoreBackend,
    /// Project URL. Overridden by SUPABASE_URL (or NEXT_PUBLIC_SUPABASE_URL).
    pub url: Option<String>,
    /// Service role key. Overridden by SUPABASE_SERVICE_ROLE_KEY (or SUPABASE_ANON_KEY).
    pub service_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Include the 30 day window, returning users and cohort retention (default true).
    #[serde(default = "default_true")]
    pub extended: bool,
    /// Shared cache lifetime advertised on the metrics response (default 60).
    #[serde(default = "default_cache_seconds")]
    pub cache_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_cache_seconds() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            extended: true,
            cache_seconds: default_cache_seconds(),
        }
    }
}

/// Admin credentials after env/config resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub user: String,
    pub pass: String,
}

fn non_empty(s: Option<&String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First non-empty variable in `names`, else the config value.
fn resolve_with(
    env: &dyn Fn(&str) -> Option<String>,
    names: &[&str],
    config_value: Option<&String>,
) -> Option<String> {
    names
        .iter()
        .find_map(|&n| env(n))
        .or_else(|| non_empty(config_value))
}

/// Resolve the datastore URL: SUPABASE_URL, then NEXT_PUBLIC_SUPABASE_URL, then config.
pub fn resolve_datastore_url(config: &Config) -> Option<String> {
    resolve_with(
        &env_var,
        &["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"],
        config.datastore.url.as_ref(),
    )
}

/// Resolve the datastore key: SUPABASE_SERVICE_ROLE_KEY, then SUPABASE_ANON_KEY, then config.
pub fn resolve_service_key(config: &Config) -> Option<String> {
    resolve_with(
        &env_var,
        &["SUPABASE_SERVICE_ROLE_KEY", "SUPABASE_ANON_KEY"],
        config.datastore.service_key.as_ref(),
    )
}

fn admin_credentials_with(config: &Config, env: &dyn Fn(&str) -> Option<String>) -> Option<AdminCredentials> {
    let admin = &config.gateway.admin;
    let user = resolve_with(env, &["ADMIN_USER"], admin.user.as_ref())?;
    let pass = resolve_with(env, &["ADMIN_PASS"], admin.pass.as_ref())?;
    Some(AdminCredentials { user, pass })
}

/// Resolve admin credentials: ADMIN_USER / ADMIN_PASS override config. Both must be set.
pub fn resolve_admin_credentials(config: &Config) -> Option<AdminCredentials> {
    admin_credentials_with(config, &env_var)
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("INVOKE_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".invoke").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or INVOKE_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 3000);
        assert_eq!(g.bind, "127.0.0.1");
    }

    #[test]
    fn parses_camel_case_with_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "datastore": { "backend": "memory", "serviceKey": "k" }, "metrics": { "cacheSeconds": 30 } }"#,
        )
        .unwrap();
        assert_eq!(config.datastore.backend, DatastoreBackend::Memory);
        assert_eq!(config.datastore.service_key.as_deref(), Some("k"));
        assert_eq!(config.metrics.cache_seconds, 30);
        assert!(config.metrics.extended);
        assert_eq!(config.gateway.port, 3000);
    }

    #[test]
    fn env_overrides_config_in_order() {
        let mut config = Config::default();
        config.datastore.url = Some("https://from-config".to_string());
        let env = env_from(&[("NEXT_PUBLIC_SUPABASE_URL", "https://public")]);
        assert_eq!(
            resolve_with(&env, &["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"], config.datastore.url.as_ref()).as_deref(),
            Some("https://public")
        );
        let none = env_from(&[]);
        assert_eq!(
            resolve_with(&none, &["SUPABASE_URL"], config.datastore.url.as_ref()).as_deref(),
            Some("https://from-config")
        );
    }

    #[test]
    fn admin_credentials_need_both_halves() {
        let mut config = Config::default();
        config.gateway.admin.user = Some("ops".to_string());
        assert_eq!(admin_credentials_with(&config, &env_from(&[])), None);
        let creds = admin_credentials_with(&config, &env_from(&[("ADMIN_PASS", "s3cret")])).unwrap();
        assert_eq!(creds.user, "ops");
        assert_eq!(creds.pass, "s3cret");
        config.gateway.admin.pass = Some("  ".to_string());
        assert_eq!(admin_credentials_with(&config, &env_from(&[])), None);
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_bind("127.0.0.1"));
        assert!(is_loopback_bind(" localhost "));
        assert!(!is_loopback_bind("0.0.0.0"));
    }
}
