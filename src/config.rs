//! Engine configuration.
//!
//! Loaded from YAML, then overridden by `OB_LIFECYCLE_*` environment
//! variables. Every section has defaults, so an empty document is valid.
//!
//! ```yaml
//! registry:
//!   health_interval_ms: 30000
//! router:
//!   default_domain: onboarding
//!   aliases:
//!     know-your-customer: kyc
//! orchestrator:
//!   max_sessions: 256
//!   session_idle_timeout_secs: 1800
//!   eviction_interval_secs: 60
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};
use crate::orchestrator::OrchestratorConfig;
use crate::registry::RegistryConfig;
use crate::router::RouterConfig;

pub const ENV_HEALTH_INTERVAL_MS: &str = "OB_LIFECYCLE_HEALTH_INTERVAL_MS";
pub const ENV_MAX_SESSIONS: &str = "OB_LIFECYCLE_MAX_SESSIONS";
pub const ENV_SESSION_IDLE_SECS: &str = "OB_LIFECYCLE_SESSION_IDLE_SECS";
pub const ENV_EVICTION_INTERVAL_SECS: &str = "OB_LIFECYCLE_EVICTION_INTERVAL_SECS";
pub const ENV_DEFAULT_DOMAIN: &str = "OB_LIFECYCLE_DEFAULT_DOMAIN";

/// Configuration for the whole engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub registry: RegistryConfig,
    pub router: RouterConfig,
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Parse and validate a YAML document. Environment is not consulted.
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: EngineConfig = if yaml.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, then apply environment overrides.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup` (variable name → value).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parsed(&lookup, ENV_HEALTH_INTERVAL_MS)? {
            self.registry.health_interval_ms = value;
        }
        if let Some(value) = parsed(&lookup, ENV_MAX_SESSIONS)? {
            self.orchestrator.max_sessions = value;
        }
        if let Some(value) = parsed(&lookup, ENV_SESSION_IDLE_SECS)? {
            self.orchestrator.session_idle_timeout_secs = value;
        }
        if let Some(value) = parsed(&lookup, ENV_EVICTION_INTERVAL_SECS)? {
            self.orchestrator.eviction_interval_secs = value;
        }
        if let Some(value) = lookup(ENV_DEFAULT_DOMAIN) {
            let value = value.trim();
            self.router.default_domain = (!value.is_empty()).then(|| value.to_string());
        }
        self.validate()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.registry.health_interval_ms == 0 {
            return Err(invalid("registry.health_interval_ms", "must be greater than 0"));
        }
        if self.orchestrator.max_sessions == 0 {
            return Err(invalid("orchestrator.max_sessions", "must be greater than 0"));
        }
        if self.orchestrator.eviction_interval_secs == 0 {
            return Err(invalid("orchestrator.eviction_interval_secs", "must be greater than 0"));
        }
        if let Some((alias, _)) = self
            .router
            .aliases
            .iter()
            .find(|(alias, domain)| alias.trim().is_empty() || domain.trim().is_empty())
        {
            return Err(invalid("router.aliases", &format!("empty entry for alias '{}'", alias)));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn parsed<T, F>(lookup: &F, var: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
            message: e.to_string(),
        })
}
