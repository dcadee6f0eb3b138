//! stencil.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker: BrokerSection,
    pub controller: ControllerSection,
    pub authz: AuthzConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub port: u16,
    pub data_dir: PathBuf,
    /// Namespaces searched for catalog templates.
    pub template_namespaces: Vec<String>,
    /// Attempt budget for compare-and-swap updates of the instance record.
    pub retry_attempts: u32,
    /// Lowest accepted `X-Broker-API-Version`.
    pub min_api_version: String,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("/var/lib/stencil"),
            template_namespaces: vec!["stencil".to_string()],
            retry_attempts: 5,
            min_api_version: "2.7".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub interval_secs: u64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    pub default: DefaultPolicy,
    pub rules: Vec<AuthzRule>,
}

/// Decision used when no rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    Allow,
    #[default]
    Deny,
}

/// A single allow rule. `"*"` matches anything in every list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthzRule {
    pub users: Vec<String>,
    pub groups: Vec<String>,
    pub verbs: Vec<String>,
    pub kinds: Vec<String>,
    pub namespaces: Vec<String>,
}

impl BrokerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: BrokerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.broker.retry_attempts == 0 {
            anyhow::bail!("broker.retry_attempts must be at least 1");
        }
        if self.broker.template_namespaces.is_empty() {
            anyhow::bail!("broker.template_namespaces must name at least one namespace");
        }
        if self.controller.interval_secs == 0 {
            anyhow::bail!("controller.interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Location of the redb database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.broker.data_dir.join("stencil.redb")
    }
}
