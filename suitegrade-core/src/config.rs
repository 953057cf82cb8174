//! Configuration file support for Suitegrade
//!
//! Loads project-specific configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.suitegraderc.json` in project root
//! 3. `suitegrade.config.json` in project root
//!
//! All fields are optional. CLI flags take precedence over config file values.

use crate::classify::ClassifierSettings;
use crate::detectors::DetectorConfig;
use crate::filter::FilterConfig;
use crate::mapper::{CoverageWeights, MapperConfig};
use crate::patterns::{Domain, SecurityPattern};
use crate::risk::{RiskThresholds, RiskWeights};
use crate::toolchain::CommandRunner;
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default exclude patterns applied when no config is specified
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/lib/**",
    "**/node_modules/**",
    "**/out/**",
    "**/cache/**",
    "**/broadcast/**",
];

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Suitegrade configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuitegradeConfig {
    /// Glob patterns for files to include (default: every `.sol` file)
    #[serde(default)]
    pub include: Vec<String>,

    /// Glob patterns for files to exclude (default: dependencies and build output)
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub classification: Option<ClassificationConfig>,

    /// Custom risk band thresholds
    #[serde(default)]
    pub thresholds: Option<ThresholdConfig>,

    /// Custom risk weights
    #[serde(default)]
    pub risk: Option<RiskConfig>,

    #[serde(default)]
    pub coverage_weights: Option<CoverageWeightConfig>,

    #[serde(default)]
    pub filter: Option<FilterSection>,

    /// Line coverage percentage below which a file is reported (default: 80.0)
    #[serde(default)]
    pub min_line_coverage: Option<f64>,

    #[serde(default)]
    pub toolchain: Option<ToolchainConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationConfig {
    /// Distinct signature hits a domain needs to be eligible (default: 2)
    pub min_distinct_hits: Option<usize>,
    /// Tie-break order, highest priority first
    pub priority: Option<Vec<Domain>>,
}

/// Custom risk band thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    /// Score threshold for moderate risk (default: 0.3)
    pub moderate: Option<f64>,
    /// Score threshold for high risk (default: 0.5)
    pub high: Option<f64>,
    /// Score threshold for critical risk (default: 0.7)
    pub critical: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    /// Structural risk per implemented function (default: 0.02)
    pub function_weight: Option<f64>,
    /// Cap on structural risk (default: 0.3)
    pub structural_cap: Option<f64>,
    /// Cap on security risk (default: 0.4)
    pub security_cap: Option<f64>,
    /// Per-domain base risk overrides
    #[serde(default)]
    pub domain_base_risk: BTreeMap<Domain, f64>,
    /// Per-pattern security weight overrides
    #[serde(default)]
    pub security_weights: BTreeMap<SecurityPattern, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoverageWeightConfig {
    pub positive: Option<f64>,
    pub negative: Option<f64>,
    pub edge_case: Option<f64>,
    pub invariant_or_fuzz: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSection {
    /// Indicator above which heuristic findings are suppressed (default: 0.6)
    pub sophistication_threshold: Option<f64>,
    /// Distinct tests that make a file extensive (default: 10)
    pub security_suite_min_tests: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Command line run in the project root (default: forge coverage --report summary)
    pub command: Option<Vec<String>>,
    /// Seconds before the run is killed (default: 300)
    pub timeout_secs: Option<u64>,
}

/// Resolved configuration with compiled glob patterns
#[derive(Debug)]
pub struct ResolvedConfig {
    /// Compiled include patterns (empty means include all)
    pub include: Option<GlobSet>,
    /// Compiled exclude patterns
    pub exclude: GlobSet,
    pub classifier: ClassifierSettings,
    pub risk_weights: RiskWeights,
    pub risk_thresholds: RiskThresholds,
    pub mapper: MapperConfig,
    pub filter: FilterConfig,
    pub detectors: DetectorConfig,
    pub toolchain_command: Vec<String>,
    pub toolchain_timeout: Duration,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

fn check_unit(name: &str, value: Option<f64>) -> Result<()> {
    if let Some(v) = value {
        if !(0.0..=1.0).contains(&v) {
            anyhow::bail!("{} must be between 0.0 and 1.0 (got {})", name, v);
        }
    }
    Ok(())
}

impl SuitegradeConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        if let Some(ref c) = self.classification {
            if c.min_distinct_hits == Some(0) {
                anyhow::bail!("classification.min_distinct_hits must be at least 1");
            }
            if let Some(ref priority) = c.priority {
                if priority.is_empty() {
                    anyhow::bail!("classification.priority must not be empty");
                }
                if priority.contains(&Domain::Unknown) {
                    anyhow::bail!("classification.priority must not contain unknown");
                }
                let distinct: BTreeSet<_> = priority.iter().collect();
                if distinct.len() != priority.len() {
                    anyhow::bail!("classification.priority lists a domain twice");
                }
            }
        }

        // Thresholds must lie in (0, 1] and be ordered
        if let Some(ref t) = self.thresholds {
            let d = RiskThresholds::default();
            let moderate = t.moderate.unwrap_or(d.moderate);
            let high = t.high.unwrap_or(d.high);
            let critical = t.critical.unwrap_or(d.critical);

            for (name, v) in [("moderate", moderate), ("high", high), ("critical", critical)] {
                if v <= 0.0 || v > 1.0 {
                    anyhow::bail!("thresholds.{} must be in (0, 1] (got {})", name, v);
                }
            }
            if moderate >= high {
                anyhow::bail!(
                    "thresholds.moderate ({}) must be less than thresholds.high ({})",
                    moderate,
                    high
                );
            }
            if high >= critical {
                anyhow::bail!(
                    "thresholds.high ({}) must be less than thresholds.critical ({})",
                    high,
                    critical
                );
            }
        }

        if let Some(ref r) = self.risk {
            check_unit("risk.function_weight", r.function_weight)?;
            check_unit("risk.structural_cap", r.structural_cap)?;
            check_unit("risk.security_cap", r.security_cap)?;
            for (domain, v) in &r.domain_base_risk {
                check_unit(&format!("risk.domain_base_risk.{}", domain.as_str()), Some(*v))?;
            }
            for (pattern, v) in &r.security_weights {
                check_unit(&format!("risk.security_weights.{}", pattern.as_str()), Some(*v))?;
            }
        }

        if let Some(ref w) = self.coverage_weights {
            for (name, val) in [
                ("positive", w.positive),
                ("negative", w.negative),
                ("edge_case", w.edge_case),
                ("invariant_or_fuzz", w.invariant_or_fuzz),
            ] {
                check_unit(&format!("coverage_weights.{}", name), val)?;
            }
            let sum = self.coverage_weights().total();
            if sum > 1.0 + 1e-9 {
                anyhow::bail!("coverage_weights must sum to at most 1.0 (got {})", sum);
            }
        }

        if let Some(ref f) = self.filter {
            check_unit("filter.sophistication_threshold", f.sophistication_threshold)?;
        }

        if let Some(min) = self.min_line_coverage {
            if !(0.0..=100.0).contains(&min) {
                anyhow::bail!("min_line_coverage must be between 0 and 100 (got {})", min);
            }
        }

        if let Some(ref t) = self.toolchain {
            if t.command.as_ref().is_some_and(|c| c.is_empty()) {
                anyhow::bail!("toolchain.command must not be empty");
            }
            if t.timeout_secs == Some(0) {
                anyhow::bail!("toolchain.timeout_secs must be positive");
            }
        }

        // Validate glob patterns compile
        for pattern in &self.include {
            Glob::new(pattern).with_context(|| format!("invalid include pattern: {}", pattern))?;
        }
        for pattern in &self.exclude {
            Glob::new(pattern).with_context(|| format!("invalid exclude pattern: {}", pattern))?;
        }

        Ok(())
    }

    fn coverage_weights(&self) -> CoverageWeights {
        let d = CoverageWeights::default();
        match &self.coverage_weights {
            Some(w) => CoverageWeights {
                positive: w.positive.unwrap_or(d.positive),
                negative: w.negative.unwrap_or(d.negative),
                edge_case: w.edge_case.unwrap_or(d.edge_case),
                invariant_or_fuzz: w.invariant_or_fuzz.unwrap_or(d.invariant_or_fuzz),
            },
            None => d,
        }
    }

    /// Resolve config into compiled form ready for use
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        // Compile include patterns
        let include = if self.include.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &self.include {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };

        // Compile exclude patterns (defaults apply when the user gave none)
        let exclude = {
            let mut builder = GlobSetBuilder::new();
            if self.exclude.is_empty() {
                for pattern in DEFAULT_EXCLUDES {
                    builder.add(Glob::new(pattern)?);
                }
            } else {
                for pattern in &self.exclude {
                    builder.add(Glob::new(pattern)?);
                }
            }
            builder.build()?
        };

        let mut classifier = ClassifierSettings::default();
        if let Some(ref c) = self.classification {
            if let Some(n) = c.min_distinct_hits {
                classifier.min_distinct_hits = n;
            }
            if let Some(ref p) = c.priority {
                classifier.priority = p.clone();
            }
        }

        let mut risk_thresholds = RiskThresholds::default();
        if let Some(ref t) = self.thresholds {
            risk_thresholds.moderate = t.moderate.unwrap_or(risk_thresholds.moderate);
            risk_thresholds.high = t.high.unwrap_or(risk_thresholds.high);
            risk_thresholds.critical = t.critical.unwrap_or(risk_thresholds.critical);
        }

        let mut risk_weights = RiskWeights::default();
        if let Some(ref r) = self.risk {
            risk_weights.function_weight = r.function_weight.unwrap_or(risk_weights.function_weight);
            risk_weights.structural_cap = r.structural_cap.unwrap_or(risk_weights.structural_cap);
            risk_weights.security_cap = r.security_cap.unwrap_or(risk_weights.security_cap);
            risk_weights.domain_base_risk.extend(r.domain_base_risk.iter().map(|(k, v)| (*k, *v)));
            risk_weights.security_weights.extend(r.security_weights.iter().map(|(k, v)| (*k, *v)));
        }

        let mut filter = FilterConfig::default();
        if let Some(ref f) = self.filter {
            filter.sophistication_threshold = f.sophistication_threshold.unwrap_or(filter.sophistication_threshold);
            filter.security_suite_min_tests = f.security_suite_min_tests.unwrap_or(filter.security_suite_min_tests);
        }

        let mut detectors = DetectorConfig::default();
        if let Some(min) = self.min_line_coverage {
            detectors.min_line_coverage = min;
        }

        let default_runner = CommandRunner::forge_coverage();
        let (toolchain_command, toolchain_timeout) = match &self.toolchain {
            Some(t) => (
                t.command.clone().unwrap_or(default_runner.command),
                Duration::from_secs(t.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            ),
            None => (default_runner.command, Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        };

        Ok(ResolvedConfig {
            include,
            exclude,
            classifier,
            risk_weights,
            risk_thresholds,
            mapper: MapperConfig {
                coverage_weights: self.coverage_weights(),
            },
            filter,
            detectors,
            toolchain_command,
            toolchain_timeout,
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Check if a file path should be included based on include/exclude patterns
    pub fn should_include(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();

        // Check exclude first
        if self.exclude.is_match(path_str.as_ref()) {
            return false;
        }

        // If include patterns exist, file must match at least one
        if let Some(ref include) = self.include {
            return include.is_match(path_str.as_ref());
        }

        true
    }

    /// Runner for the configured toolchain command
    pub fn runner(&self) -> CommandRunner {
        CommandRunner::new(self.toolchain_command.clone(), self.toolchain_timeout)
    }

    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        SuitegradeConfig::default().resolve()
    }
}

/// Discover and load a config file from the project root
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(project_root: &Path) -> Result<Option<(SuitegradeConfig, PathBuf)>> {
    for name in [".suitegraderc.json", "suitegrade.config.json"] {
        let path = project_root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<SuitegradeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: SuitegradeConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config for a project
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config from the project root.
/// Returns default config if nothing is found.
pub fn load_and_resolve(project_root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(project_root)? {
            Some((config, path)) => (config, Some(path)),
            None => (SuitegradeConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}
