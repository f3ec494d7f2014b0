//! Configuration for mediadex.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MEDIADEX_LOG_HOST, MEDIADEX_ADMIN_HOST,
//!    MEDIADEX_PREVIEW_HOST)
//! 2. Config file (.mediadex/config.yaml)
//! 3. Defaults
//!
//! Config file discovery searches the current directory and its parents
//! for .mediadex/config.yaml, then ~/.mediadex/config.yaml.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub hosts: HostsConfig,
    #[serde(default)]
    pub index: Option<IndexConfig>,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostsConfig {
    /// Log API host (audit + media logs)
    pub log: Option<String>,
    /// Sheet storage host
    pub admin: Option<String>,
    /// Preview host suffix for page markup
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    pub index_path: Option<String>,
    pub meta_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub page_size: Option<usize>,
    pub page_delay_ms: Option<u64>,
    pub markup_concurrency: Option<usize>,
    pub memory_soft_limit_mb: Option<u64>,
}

/// Resolved configuration with every value filled in
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub log_host: String,
    pub admin_host: String,
    pub preview_host: String,
    /// Sheet path of the persisted index
    pub index_path: String,
    /// Sheet path of the build metadata
    pub meta_path: String,
    /// Log API page size
    pub page_size: usize,
    /// Inter-page delay for log pagination (rate limiting)
    pub page_delay_ms: u64,
    /// Concurrent markup fetches during usage extraction
    pub markup_concurrency: usize,
    /// Soft heap budget for the advisory memory probe
    pub memory_soft_limit_bytes: u64,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            log_host: "https://admin.hlx.page".to_string(),
            admin_host: "https://admin.hlx.page".to_string(),
            preview_host: "hlx.page".to_string(),
            index_path: "/.index/media-usage.json".to_string(),
            meta_path: "/.index/media-usage-meta.json".to_string(),
            page_size: 1000,
            page_delay_ms: 150,
            markup_concurrency: 10,
            memory_soft_limit_bytes: 1024 * 1024 * 1024,
            config_file: None,
        }
    }
}

/// Everything a single build needs to know about its target site,
/// threaded explicitly through every call.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub org: String,
    pub repo: String,
    pub ref_name: String,
    pub token: Option<String>,
}

/// Find config file by searching current directory and parents, falling
/// back to ~/.mediadex/config.yaml
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".mediadex").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let home_config = dirs::home_dir()?.join(".mediadex").join("config.yaml");
    if home_config.exists() {
        return Some(home_config);
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn env_or(var: &str, fallback: String) -> String {
    std::env::var(var).unwrap_or(fallback)
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let mut resolved = ResolvedConfig::default();

    let config_file = find_config_file();
    if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        if let Some(host) = config.hosts.log {
            resolved.log_host = host;
        }
        if let Some(host) = config.hosts.admin {
            resolved.admin_host = host;
        }
        if let Some(host) = config.hosts.preview {
            resolved.preview_host = host;
        }
        if let Some(index) = config.index {
            if let Some(path) = index.index_path {
                resolved.index_path = path;
            }
            if let Some(path) = index.meta_path {
                resolved.meta_path = path;
            }
        }
        if let Some(limits) = config.limits {
            if let Some(size) = limits.page_size {
                resolved.page_size = size;
            }
            if let Some(delay) = limits.page_delay_ms {
                resolved.page_delay_ms = delay;
            }
            if let Some(n) = limits.markup_concurrency {
                resolved.markup_concurrency = n;
            }
            if let Some(mb) = limits.memory_soft_limit_mb {
                resolved.memory_soft_limit_bytes = mb * 1024 * 1024;
            }
        }
    }

    // Env vars outrank the config file
    resolved.log_host = env_or("MEDIADEX_LOG_HOST", resolved.log_host);
    resolved.admin_host = env_or("MEDIADEX_ADMIN_HOST", resolved.admin_host);
    resolved.preview_host = env_or("MEDIADEX_PREVIEW_HOST", resolved.preview_host);
    resolved.config_file = config_file;

    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ResolvedConfig::default();
        assert_eq!(config.markup_concurrency, 10);
        assert_eq!(config.page_delay_ms, 150);
        assert_eq!(config.index_path, "/.index/media-usage.json");
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".mediadex");
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
hosts:
  log: https://logs.internal
  preview: stage.page
limits:
  page_size: 250
  markup_concurrency: 4
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.hosts.log, Some("https://logs.internal".to_string()));
        assert_eq!(config.hosts.admin, None);

        let limits = config.limits.unwrap();
        assert_eq!(limits.page_size, Some(250));
        assert_eq!(limits.markup_concurrency, Some(4));
    }
}
