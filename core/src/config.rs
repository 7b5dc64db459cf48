//! Configuration, modeled on the reference codebase's
//! `DescaratesConfig` nested-struct-with-serde-defaults convention.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Compiled-in constant, not user-configurable:
/// the bound on how long an agent may take to reach readiness.
pub const AGENT_TIMEOUT_LONG: Duration = Duration::from_secs(120);

/// Compiled-in constant: the UI-facing "queued, awaiting scheduler" wait.
pub const JOB_SUBMISSION_WAIT: Duration = Duration::from_millis(600);

fn default_max_concurrent_agents() -> usize {
    3
}
fn default_max_iterations() -> u32 {
    10
}
fn default_iteration_delay_seconds() -> u64 {
    2
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_base_branch() -> String {
    "main".to_string()
}
fn default_model_claude() -> Option<String> {
    None
}
fn default_model_opencode() -> Option<String> {
    None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub max_concurrent_agents: usize,
    pub max_iterations: u32,
    pub iteration_delay_seconds: u64,
    pub auto_approve: bool,
    pub auto_review: bool,
    pub auto_merge: bool,
    pub auto_retry_on_merge_conflict: bool,
    pub auto_start: bool,
    pub default_base_branch: String,
    pub default_model_claude: Option<String>,
    pub default_model_opencode: Option<String>,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            max_iterations: default_max_iterations(),
            iteration_delay_seconds: default_iteration_delay_seconds(),
            auto_approve: default_false(),
            auto_review: default_true(),
            auto_merge: default_false(),
            auto_retry_on_merge_conflict: default_true(),
            auto_start: default_true(),
            default_base_branch: default_base_branch(),
            default_model_claude: default_model_claude(),
            default_model_opencode: default_model_opencode(),
        }
    }
}

impl AutomationConfig {
    pub fn iteration_delay(&self) -> Duration {
        Duration::from_secs(self.iteration_delay_seconds)
    }
}

/// Top-level configuration, mirroring the reference's top-level
/// `DescaratesConfig` wrapping nested sub-configs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KaganConfig {
    #[serde(default)]
    pub automation: AutomationConfig,
}

impl KaganConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub async fn load_from_path(path: &std::path::Path) -> std::io::Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let c = AutomationConfig::default();
        assert_eq!(c.max_concurrent_agents, 3);
        assert!(c.auto_review);
        assert!(!c.auto_merge);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_str = r#"
            [automation]
            max_concurrent_agents = 5
            auto_merge = true
        "#;
        let cfg = KaganConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(cfg.automation.max_concurrent_agents, 5);
        assert!(cfg.automation.auto_merge);
        // untouched fields keep defaults
        assert_eq!(cfg.automation.max_iterations, 10);
    }
}
