//! Contract risk score calculation
//!
//! Global invariants enforced:
//! - Deterministic risk calculations
//! - Every component is capped, the total is clamped to [0, 1]
//! - A unit with no functions and no security patterns scores its domain base risk

use crate::classify::{round4, ClassificationResult};
use crate::patterns::{Domain, SecurityPattern};
use crate::source::{DeclKind, Mutability, SourceUnit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Risk band classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,      // < 0.3
    Moderate, // 0.3-0.5
    High,     // 0.5-0.7
    Critical, // >= 0.7
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Moderate => "moderate",
            RiskBand::High => "high",
            RiskBand::Critical => "critical",
        }
    }
}

/// Configurable risk band thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskThresholds {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        RiskThresholds {
            moderate: 0.3,
            high: 0.5,
            critical: 0.7,
        }
    }
}

/// Configurable weights for the risk score
#[derive(Debug, Clone, PartialEq)]
pub struct RiskWeights {
    /// Structural risk added per implemented function
    pub function_weight: f64,
    pub structural_cap: f64,
    pub security_cap: f64,
    pub domain_base_risk: BTreeMap<Domain, f64>,
    pub security_weights: BTreeMap<SecurityPattern, f64>,
}

impl Default for RiskWeights {
    fn default() -> Self {
        RiskWeights {
            function_weight: 0.02,
            structural_cap: 0.3,
            security_cap: 0.4,
            domain_base_risk: default_domain_base_risk(),
            security_weights: SecurityPattern::ALL
                .into_iter()
                .map(|p| (p, p.default_weight()))
                .collect(),
        }
    }
}

impl RiskWeights {
    pub fn base_risk(&self, domain: Domain) -> f64 {
        self.domain_base_risk
            .get(&domain)
            .copied()
            .unwrap_or_else(|| default_base_risk(domain))
    }

    pub fn security_weight(&self, pattern: SecurityPattern) -> f64 {
        self.security_weights
            .get(&pattern)
            .copied()
            .unwrap_or_else(|| pattern.default_weight())
    }
}

fn default_base_risk(domain: Domain) -> f64 {
    match domain {
        Domain::Defi => 0.4,
        Domain::Governance | Domain::Bridge => 0.3,
        Domain::Token => 0.2,
        Domain::Nft | Domain::Gaming => 0.15,
        Domain::Utility | Domain::Unknown => 0.1,
    }
}

fn default_domain_base_risk() -> BTreeMap<Domain, f64> {
    [
        Domain::Defi,
        Domain::Nft,
        Domain::Governance,
        Domain::Gaming,
        Domain::Bridge,
        Domain::Token,
        Domain::Utility,
        Domain::Unknown,
    ]
    .into_iter()
    .map(|d| (d, default_base_risk(d)))
    .collect()
}

/// Additive breakdown of a risk score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub structural: f64,
    pub domain: f64,
    pub security: f64,
    pub function_count: usize,
    pub external_functions: usize,
    pub payable_functions: usize,
}

/// Risk of one contract unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub value: f64,
    pub band: RiskBand,
    pub breakdown: RiskBreakdown,
}

/// Score a unit with default weights and thresholds
pub fn score(unit: &SourceUnit, classification: &ClassificationResult) -> RiskScore {
    score_with_config(
        unit,
        classification,
        &RiskWeights::default(),
        &RiskThresholds::default(),
    )
}

/// Score a unit with custom weights and thresholds
pub fn score_with_config(
    unit: &SourceUnit,
    classification: &ClassificationResult,
    weights: &RiskWeights,
    thresholds: &RiskThresholds,
) -> RiskScore {
    let functions: Vec<_> = unit
        .functions
        .iter()
        .filter(|f| {
            f.contract
                .as_deref()
                .and_then(|c| unit.contract(c))
                .map_or(true, |c| c.kind != DeclKind::Interface)
        })
        .collect();
    let function_count = functions.len();
    let external_functions = functions.iter().filter(|f| f.is_externally_callable()).count();
    let payable_functions = functions
        .iter()
        .filter(|f| f.mutability == Mutability::Payable)
        .count();

    let structural = (function_count as f64 * weights.function_weight).min(weights.structural_cap);
    let domain = weights.base_risk(classification.domain);
    let security = classification
        .security_patterns
        .iter()
        .map(|p| weights.security_weight(*p))
        .sum::<f64>()
        .min(weights.security_cap);

    let value = round4((structural + domain + security).clamp(0.0, 1.0));
    RiskScore {
        value,
        band: assign_risk_band_with_thresholds(value, thresholds),
        breakdown: RiskBreakdown {
            structural: round4(structural),
            domain: round4(domain),
            security: round4(security),
            function_count,
            external_functions,
            payable_functions,
        },
    }
}

/// Assign risk band with default thresholds
pub fn assign_risk_band(value: f64) -> RiskBand {
    assign_risk_band_with_thresholds(value, &RiskThresholds::default())
}

/// Assign risk band with custom thresholds
pub fn assign_risk_band_with_thresholds(value: f64, thresholds: &RiskThresholds) -> RiskBand {
    if value < thresholds.moderate {
        RiskBand::Low
    } else if value < thresholds.high {
        RiskBand::Moderate
    } else if value < thresholds.critical {
        RiskBand::High
    } else {
        RiskBand::Critical
    }
}
