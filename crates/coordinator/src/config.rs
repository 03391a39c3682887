//! Configuration for the routing coordinator.
//!
//! Loaded from TOML. On Unix, config files carrying API keys are checked
//! for permissive modes before use: world-writable files are rejected, and
//! world-readable files holding keys are rejected.

use crate::router::RoutingWeights;
use crate::tracker::PerformanceConfig;
use flowline_common::BackendConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Main coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Registered backends, keyed by kind name ("n8n", "langflow", ...).
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,

    /// How long a backend's discovered flow list stays fresh.
    #[serde(default = "default_flow_cache_ttl")]
    pub flow_cache_ttl_secs: u64,

    /// Performance-tracker sizing.
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Composite-score weights.
    #[serde(default)]
    pub routing: RoutingWeights,

    /// Whether execution retries the next-best candidate on failure.
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,

    /// Budget for each individual backend call (connect, probe, discover,
    /// execute). There is no outer per-request budget: worst case is
    /// attempts x this timeout.
    #[serde(default = "default_per_call_timeout")]
    pub per_call_timeout_ms: u64,
}

fn default_flow_cache_ttl() -> u64 {
    60
}

fn default_fallback_enabled() -> bool {
    true
}

fn default_per_call_timeout() -> u64 {
    30_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            backends: HashMap::new(),
            flow_cache_ttl_secs: default_flow_cache_ttl(),
            performance: PerformanceConfig::default(),
            routing: RoutingWeights::default(),
            fallback_enabled: default_fallback_enabled(),
            per_call_timeout_ms: default_per_call_timeout(),
        }
    }
}

impl CoordinatorConfig {
    pub fn flow_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.flow_cache_ttl_secs)
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    /// Load configuration from a TOML file.
    ///
    /// On Unix this validates file type and permissions first, and warns
    /// when API keys are stored in the file instead of the environment.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;

        if config.backends.values().any(|b| b.api_key.is_some()) {
            warn!(
                "API key found in config file '{}'. For better security, \
                 use FLOWLINE_<KIND>_API_KEY environment variables instead.",
                path.display()
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration without permission checks. For tests or paths
    /// already validated by the caller.
    pub fn from_file_unchecked(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation: weight balance and sane windows.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.routing.validate()?;
        if self.performance.max_history == 0 {
            anyhow::bail!("performance.max_history must be at least 1");
        }
        if self.performance.score_window == 0 {
            anyhow::bail!("performance.score_window must be at least 1");
        }
        if self.per_call_timeout_ms == 0 {
            anyhow::bail!("per_call_timeout_ms must be at least 1");
        }
        Ok(())
    }
}

/// Validate config file permissions on Unix systems.
///
/// Requirements:
/// - The path must be a regular file (not a symlink or directory)
/// - The file must not be world-writable
/// - If the file contains API key patterns, it must not be world-readable
#[cfg(unix)]
fn validate_config_file_permissions(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file. Symlinks and directories are not allowed.",
            path.display()
        );
    }

    let mode = metadata.permissions().mode();
    let permission_bits = mode & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). \
             This is a security risk. Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path).unwrap_or_default();
    let has_api_key = content.contains("api_key") && content.contains("=");

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
             This is a security risk. Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider restricting access with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}
