//! canopy.toml configuration.

use std::path::Path;

use canopy_discovery::DiscoveryConfig;
use canopy_placement::{Normalization, ScorerConfig, StrategyConfig, default_scorers};
use canopy_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Top-level engine configuration.
///
/// ```toml
/// max_concurrent_workspaces = 8
///
/// [discovery]
/// root = "root:org"
/// permission_ttl_secs = 60
///
/// [scheduler]
/// normalization = "Linear"
///
/// [[scheduler.scorers]]
/// name = "resource-utilization"
/// weight = 2.0
/// params = { target_utilization = 0.6 }
///
/// [strategy]
/// packing_efficiency = 0.9
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrent cluster listings during fan-out.
    pub max_concurrent_workspaces: usize,
    pub discovery: DiscoveryConfig,
    pub scheduler: ScoringSection,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    pub normalization: Normalization,
    pub scorers: Vec<ScorerConfig>,
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            normalization: Normalization::None,
            scorers: default_scorers(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workspaces: 16,
            discovery: DiscoveryConfig::default(),
            scheduler: ScoringSection::default(),
            strategy: StrategyConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The scheduler's slice of this configuration.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            scorers: self.scheduler.scorers.clone(),
            normalization: self.scheduler.normalization,
            strategy: self.strategy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_placement::MultiMode;

    #[test]
    fn empty_file_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.discovery.max_depth, 10);
        assert_eq!(config.scheduler.scorers.len(), 3);
    }

    #[test]
    fn parses_all_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            max_concurrent_workspaces = 4

            [discovery]
            root = "root:org"
            user = "alice"
            permission_ttl_secs = 60

            [scheduler]
            normalization = "Percentile"

            [[scheduler.scorers]]
            name = "locality"
            weight = 3.0
            params = { zones = { "eu-1a" = 100.0 } }

            [strategy]
            name = "multi"

            [strategy.multi]
            mode = "BestScore"
            strategies = [{ name = "spread" }, { name = "binpack" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_workspaces, 4);
        assert_eq!(config.discovery.root, "root:org");
        assert_eq!(config.discovery.cluster_ttl_secs, 120);
        assert_eq!(config.scheduler.normalization, Normalization::Percentile);
        assert_eq!(config.scheduler.scorers[0].name, "locality");
        assert_eq!(config.strategy.multi.mode, MultiMode::BestScore);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.strategy.name.as_deref(), Some("multi"));
    }

    #[test]
    fn unknown_field_types_are_rejected() {
        assert!(EngineConfig::from_toml_str("max_concurrent_workspaces = \"many\"").is_err());
    }

    #[test]
    fn toml_roundtrip_preserves_config() {
        let mut config = EngineConfig::default();
        config.discovery.user = "bob".into();
        config.strategy.packing_efficiency = 0.5;
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canopy.toml");
        std::fs::write(&path, "[discovery]\nmax_depth = 4\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.discovery.max_depth, 4);

        assert!(EngineConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
