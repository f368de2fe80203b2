//! Configuration loader
//!
//! Loads client configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! Whatever the source, the result is checked with
//! [`ClientConfig::validate`] before it is returned.
//!
//! ## Environment Variables
//! Required:
//! - `CLOUDLINK_BASE_URL`: Cloud service base URL
//! - `CLOUDLINK_ENDPOINT_ID`: Endpoint (device or application) id
//! - `CLOUDLINK_TOKEN_URL`: OAuth2 token endpoint
//! - `CLOUDLINK_CLIENT_ID`: OAuth2 client id
//! - `CLOUDLINK_CLIENT_SECRET`: OAuth2 client secret
//!
//! Optional:
//! - `CLOUDLINK_ROLE`: `device` (default) or `enterprise`
//! - `CLOUDLINK_SCOPE`: OAuth2 scope
//! - `CLOUDLINK_POLLING_INTERVAL_MS`: Scheduler cadence
//! - `CLOUDLINK_ASYNC_TIMEOUT_MS`: Async request timeout
//! - `CLOUDLINK_MAX_DELIVERY_ATTEMPTS`: Guaranteed delivery attempt bound
//! - `CLOUDLINK_LOG_JSON`: Emit JSON logs (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./cloudlink.toml` or `./cloudlink.json` (current working directory)
//! 2. `./config.toml` or `./config.json` (current working directory)
//! 3. The same names in the parent directory
//! 4. The same names next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;

use cloudlink_domain::{ClientConfig, CloudLinkError, EndpointRole, Result};

const CONFIG_FILE_NAMES: [&str; 4] =
    ["cloudlink.toml", "cloudlink.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns `CloudLinkError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - The loaded configuration fails validation
pub fn load() -> Result<ClientConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// Unset sections keep their defaults.
///
/// # Errors
/// Returns `CloudLinkError::Config` if required variables are missing
/// or have invalid values.
pub fn load_from_env() -> Result<ClientConfig> {
    let mut config = ClientConfig::default();

    config.server.base_url = env_var("CLOUDLINK_BASE_URL")?;
    config.server.endpoint_id = env_var("CLOUDLINK_ENDPOINT_ID")?;
    config.credentials.token_url = env_var("CLOUDLINK_TOKEN_URL")?;
    config.credentials.client_id = env_var("CLOUDLINK_CLIENT_ID")?;
    config.credentials.client_secret = env_var("CLOUDLINK_CLIENT_SECRET")?;
    config.credentials.scope = std::env::var("CLOUDLINK_SCOPE").ok().filter(|s| !s.is_empty());

    if let Ok(role) = std::env::var("CLOUDLINK_ROLE") {
        config.role = parse_role(&role)?;
    }
    if let Some(ms) = env_parse("CLOUDLINK_POLLING_INTERVAL_MS")? {
        config.dispatch.polling_interval_ms = ms;
    }
    if let Some(ms) = env_parse("CLOUDLINK_ASYNC_TIMEOUT_MS")? {
        config.async_request.timeout_ms = ms;
    }
    if let Some(attempts) = env_parse("CLOUDLINK_MAX_DELIVERY_ATTEMPTS")? {
        config.dispatch.max_delivery_attempts = attempts;
    }
    config.logging.json = env_bool("CLOUDLINK_LOG_JSON", config.logging.json);

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `CloudLinkError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - The loaded configuration fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<ClientConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CloudLinkError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CloudLinkError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CloudLinkError::Config(format!("Failed to read config file: {}", e)))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<ClientConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CloudLinkError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CloudLinkError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(CloudLinkError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.clone());
        dirs.push(cwd.join(".."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

fn parse_role(value: &str) -> Result<EndpointRole> {
    match value.trim().to_ascii_lowercase().as_str() {
        "device" => Ok(EndpointRole::Device),
        "enterprise" => Ok(EndpointRole::Enterprise),
        other => Err(CloudLinkError::Config(format!("Invalid role: {other}"))),
    }
}

/// Get required environment variable
///
/// # Errors
/// Returns `CloudLinkError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        CloudLinkError::Config(format!("Missing required environment variable: {}", key))
    })
}

/// Parse an optional numeric environment variable
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CloudLinkError::Config(format!("Invalid {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use once_cell::sync::Lazy;
    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const REQUIRED: [(&str, &str); 5] = [
        ("CLOUDLINK_BASE_URL", "https://iot.example.com"),
        ("CLOUDLINK_ENDPOINT_ID", "device-7"),
        ("CLOUDLINK_TOKEN_URL", "https://auth.example.com/token"),
        ("CLOUDLINK_CLIENT_ID", "client"),
        ("CLOUDLINK_CLIENT_SECRET", "secret"),
    ];

    const OPTIONAL: [&str; 6] = [
        "CLOUDLINK_ROLE",
        "CLOUDLINK_SCOPE",
        "CLOUDLINK_POLLING_INTERVAL_MS",
        "CLOUDLINK_ASYNC_TIMEOUT_MS",
        "CLOUDLINK_MAX_DELIVERY_ATTEMPTS",
        "CLOUDLINK_LOG_JSON",
    ];

    fn clear_env() {
        for (key, _) in REQUIRED {
            std::env::remove_var(key);
        }
        for key in OPTIONAL {
            std::env::remove_var(key);
        }
    }

    fn set_required() {
        for (key, value) in REQUIRED {
            std::env::set_var(key, value);
        }
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for value in ["1", "true", "yes", "on", "TRUE"] {
            std::env::set_var("CLOUDLINK_TEST_BOOL", value);
            assert!(env_bool("CLOUDLINK_TEST_BOOL", false), "{value} should be true");
        }
        for value in ["0", "false", "no", "off"] {
            std::env::set_var("CLOUDLINK_TEST_BOOL", value);
            assert!(!env_bool("CLOUDLINK_TEST_BOOL", true), "{value} should be false");
        }

        std::env::remove_var("CLOUDLINK_TEST_BOOL");
        assert!(env_bool("CLOUDLINK_TEST_BOOL", true));
        assert!(!env_bool("CLOUDLINK_TEST_BOOL", false));
    }

    #[test]
    fn test_load_from_env_all_vars_set() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();
        set_required();
        std::env::set_var("CLOUDLINK_ROLE", "Enterprise");
        std::env::set_var("CLOUDLINK_POLLING_INTERVAL_MS", "250");
        std::env::set_var("CLOUDLINK_ASYNC_TIMEOUT_MS", "5000");
        std::env::set_var("CLOUDLINK_MAX_DELIVERY_ATTEMPTS", "5");
        std::env::set_var("CLOUDLINK_LOG_JSON", "on");

        let result = load_from_env();
        clear_env();

        let config = result.expect("config from env");
        assert_eq!(config.role, EndpointRole::Enterprise);
        assert_eq!(config.server.base_url, "https://iot.example.com");
        assert_eq!(config.server.endpoint_id, "device-7");
        assert_eq!(config.credentials.client_secret, "secret");
        assert_eq!(config.credentials.scope, None);
        assert_eq!(config.dispatch.polling_interval_ms, 250);
        assert_eq!(config.async_request.timeout_ms, 5000);
        assert_eq!(config.dispatch.max_delivery_attempts, 5);
        assert!(config.logging.json);
        assert_eq!(config.server.messages_path, "/iot/api/v2/messages");
    }

    #[test]
    fn test_load_from_env_missing_var() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();
        set_required();
        std::env::remove_var("CLOUDLINK_ENDPOINT_ID");

        let result = load_from_env();
        clear_env();

        match result {
            Err(CloudLinkError::Config(msg)) => assert!(msg.contains("CLOUDLINK_ENDPOINT_ID")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_env_invalid_values() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for (key, value) in [
            ("CLOUDLINK_POLLING_INTERVAL_MS", "soon"),
            ("CLOUDLINK_POLLING_INTERVAL_MS", "0"),
            ("CLOUDLINK_MAX_DELIVERY_ATTEMPTS", "0"),
            ("CLOUDLINK_ROLE", "gateway"),
        ] {
            clear_env();
            set_required();
            std::env::set_var(key, value);
            let result = load_from_env();
            assert!(
                matches!(result, Err(CloudLinkError::Config(_))),
                "{key}={value} should be rejected"
            );
        }
        clear_env();
    }

    #[test]
    fn test_load_from_file_json() {
        let json_content = r#"{
            "role": "device",
            "server": {
                "base_url": "https://iot.example.com",
                "endpoint_id": "device-7"
            },
            "dispatch": { "batch_size": 25 }
        }"#;

        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        temp_file.write_all(json_content.as_bytes()).expect("Failed to write to temp file");
        let path = temp_file.path().with_extension("json");
        std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");

        let result = load_from_file(Some(path.clone()));
        std::fs::remove_file(path).ok();

        let config = result.expect("config from json");
        assert_eq!(config.server.endpoint_id, "device-7");
        assert_eq!(config.dispatch.batch_size, 25);
        assert_eq!(config.dispatch.max_delivery_attempts, 3);
        assert_eq!(config.storage.chunk_size, 64 * 1024);
    }

    #[test]
    fn test_load_from_file_toml() {
        let toml_content = r#"
role = "enterprise"

[server]
base_url = "https://iot.example.com"
endpoint_id = "app-1"

[async_request]
timeout_ms = 1500

[logging]
filter = "debug"
json = true
"#;

        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        temp_file.write_all(toml_content.as_bytes()).expect("Failed to write to temp file");
        let path = temp_file.path().with_extension("toml");
        std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");

        let result = load_from_file(Some(path.clone()));
        std::fs::remove_file(path).ok();

        let config = result.expect("config from toml");
        assert_eq!(config.role, EndpointRole::Enterprise);
        assert_eq!(config.async_request.timeout_ms, 1500);
        assert_eq!(config.logging.filter, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_from_file_rejects_invalid_config() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        temp_file.write_all(br#"{"server": {"base_url": ""}}"#).expect("write");
        let path = temp_file.path().with_extension("json");
        std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");

        let result = load_from_file(Some(path.clone()));
        std::fs::remove_file(path).ok();

        assert!(matches!(result, Err(CloudLinkError::Config(_))));
    }

    #[test]
    fn test_load_from_file_not_found() {
        let result = load_from_file(Some(PathBuf::from("/nonexistent/cloudlink.toml")));
        match result {
            Err(CloudLinkError::Config(msg)) => assert!(msg.contains("not found")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_unsupported_format() {
        let result = parse_config("role: device", Path::new("cloudlink.yaml"));
        match result {
            Err(CloudLinkError::Config(msg)) => assert!(msg.contains("Unsupported")),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
