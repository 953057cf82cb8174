//! False-positive filtering
//!
//! Reconciles single-signal candidate findings against cross-file evidence and
//! a per-file sophistication indicator.
//!
//! Global invariants enforced:
//! - Findings are flagged, never removed; every suppression records its reason
//! - Candidates are merged per (kind, target) before any rule runs
//! - Idempotent and monotone: filtering the output again changes nothing
//! - Heuristic findings are gated by the sophistication threshold, absence findings are not

use crate::classify::ProjectClassification;
use crate::findings::{merge_findings, Finding, FindingClass, FindingKind};
use crate::mapper::{Intent, TestMap};
use crate::mocks::{MockProfile, Sophistication};
use crate::patterns::{Domain, PatternLibrary};
use crate::source::SourceUnit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named tunables for the precision/recall trade-off
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    /// Indicator above which heuristic findings are trusted away
    pub sophistication_threshold: f64,
    /// Distinct test functions that make a file count as extensive
    pub security_suite_min_tests: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            sophistication_threshold: 0.6,
            security_suite_min_tests: 10,
        }
    }
}

/// Per-file suite sophistication: the fraction of independent signals present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SophisticationIndicator {
    pub file: String,
    pub invariant_marker: bool,
    pub extensive: bool,
    pub security_suite: bool,
    pub stateful_mock: bool,
    pub value: f64,
}

impl SophisticationIndicator {
    fn signals(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.invariant_marker {
            out.push("invariant runner");
        }
        if self.extensive {
            out.push("extensive test count");
        }
        if self.security_suite {
            out.push("security-focused suite");
        }
        if self.stateful_mock {
            out.push("stateful mock");
        }
        out
    }
}

/// Compute the indicator for every test file in the map
pub fn compute_indicators(
    test_map: &TestMap,
    mocks: &[MockProfile],
    config: &FilterConfig,
) -> BTreeMap<String, SophisticationIndicator> {
    test_map
        .files
        .values()
        .map(|summary| {
            let invariant_marker = summary.invariant_marker;
            let extensive = summary.distinct_tests >= config.security_suite_min_tests;
            let security_suite = summary.security_suite;
            let stateful_mock = mocks
                .iter()
                .any(|m| m.has_mapping_state && m.touches(&summary.file));
            let present = [invariant_marker, extensive, security_suite, stateful_mock]
                .iter()
                .filter(|b| **b)
                .count();
            (
                summary.file.clone(),
                SophisticationIndicator {
                    file: summary.file.clone(),
                    invariant_marker,
                    extensive,
                    security_suite,
                    stateful_mock,
                    value: present as f64 / 4.0,
                },
            )
        })
        .collect()
}

/// Supporting signals the filter reconciles candidates against
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub test_map: &'a TestMap,
    pub mocks: &'a [MockProfile],
    pub classification: &'a ProjectClassification,
    pub test_units: &'a [&'a SourceUnit],
    pub library: &'a PatternLibrary,
}

/// Merge, reconcile and gate candidate findings
pub fn filter(candidates: Vec<Finding>, ctx: &FilterContext, config: &FilterConfig) -> Vec<Finding> {
    let indicators = compute_indicators(ctx.test_map, ctx.mocks, config);

    let mut findings = merge_findings(candidates);
    for finding in &mut findings {
        if let Some((reason, evidence)) = contradiction(finding, ctx) {
            finding.suppress(reason, Some(evidence));
        }
        if finding.class == FindingClass::Heuristic && !finding.suppressed {
            let indicator = gating_indicator(finding, &indicators, ctx.mocks);
            if let Some(ind) = indicator {
                if ind.value > config.sophistication_threshold {
                    finding.suppress(
                        format!(
                            "suite sophistication {:.2} exceeds {:.2}",
                            ind.value, config.sophistication_threshold
                        ),
                        Some(format!("{}: {}", ind.file, ind.signals().join(", "))),
                    );
                }
            }
        }
    }

    let suppressed = findings.iter().filter(|f| f.suppressed).count();
    tracing::debug!(total = findings.len(), suppressed, "findings filtered");
    findings
}

/// Indicator that gates a heuristic finding
///
/// A finding in a test file uses that file's indicator. A finding on a mock uses
/// the least sophisticated test file referencing it. Anything else is not gated.
fn gating_indicator<'a>(
    finding: &Finding,
    indicators: &'a BTreeMap<String, SophisticationIndicator>,
    mocks: &[MockProfile],
) -> Option<&'a SophisticationIndicator> {
    let file = finding.file.as_deref()?;
    if let Some(ind) = indicators.get(file) {
        return Some(ind);
    }
    let mock = mocks
        .iter()
        .find(|m| m.file == file && m.contract == finding.target)?;
    mock.referenced_by
        .iter()
        .filter_map(|f| indicators.get(f))
        .min_by(|a, b| a.value.total_cmp(&b.value).then_with(|| a.file.cmp(&b.file)))
}

/// A stronger signal contradicting the finding's claim, as (reason, evidence)
fn contradiction(finding: &Finding, ctx: &FilterContext) -> Option<(String, String)> {
    let map = ctx.test_map;
    match finding.kind {
        FindingKind::MissingNegativeTest => {
            let group = map.group(&finding.target)?;
            let first = group.negative.first()?;
            Some((
                "negative test exists".to_string(),
                format!(
                    "{} negative test(s) for {}, e.g. {} in {}",
                    group.negative.len(),
                    finding.target,
                    first.name,
                    first.file
                ),
            ))
        }
        FindingKind::MissingEdgeCaseTest => {
            let group = map.group(&finding.target)?;
            let first = group.edge_case.first()?;
            Some((
                "edge-case test exists".to_string(),
                format!(
                    "{} edge-case test(s) for {}, e.g. {} in {}",
                    group.edge_case.len(),
                    finding.target,
                    first.name,
                    first.file
                ),
            ))
        }
        FindingKind::MissingFuzzTests => {
            let group = map.group(&finding.target)?;
            let first = group.fuzz.first()?;
            Some((
                "fuzz test exists".to_string(),
                format!(
                    "{} fuzz test(s) for {}, e.g. {} in {}",
                    group.fuzz.len(),
                    finding.target,
                    first.name,
                    first.file
                ),
            ))
        }
        FindingKind::UntestedFunction => {
            let group = map.group(&finding.target)?;
            Some((
                "test group exists".to_string(),
                format!(
                    "{} test(s) target {} across {}",
                    group.len(),
                    finding.target,
                    group.files().join(", ")
                ),
            ))
        }
        FindingKind::MissingInvariantTests => match finding.file.as_deref() {
            Some(file) => {
                let summary = map.files.get(file)?;
                let count = summary.count(Intent::Invariant);
                (count > 0 || summary.invariant_marker).then(|| {
                    (
                        "invariant tests present".to_string(),
                        format!(
                            "{count} invariant test(s) in {file}{}",
                            marker_note(summary.invariant_marker)
                        ),
                    )
                })
            }
            None => {
                let count = map.count_intent(Intent::Invariant);
                let marker = map.has_invariant_marker();
                (count > 0 || marker).then(|| {
                    (
                        "invariant tests present".to_string(),
                        format!("{count} invariant test(s) in project{}", marker_note(marker)),
                    )
                })
            }
        },
        FindingKind::CheatingMock => {
            let mock = ctx.mocks.iter().find(|m| {
                m.contract == finding.target
                    && finding.file.as_deref().map_or(true, |f| f == m.file)
            })?;
            if mock.sophistication != Sophistication::Trivial || !mock.unconditional_success {
                let features: Vec<&str> = mock.features.iter().map(|f| f.as_str()).collect();
                Some((
                    "mock models behaviour".to_string(),
                    format!(
                        "{} is {} with features [{}]",
                        mock.contract,
                        mock.sophistication.as_str(),
                        features.join(", ")
                    ),
                ))
            } else {
                None
            }
        }
        FindingKind::MissingDomainPattern => {
            let (domain, id) = finding.target.split_once(':')?;
            let domain = Domain::parse(domain)?;
            if !ctx.classification.covers(domain) {
                return Some((
                    "domain not present".to_string(),
                    format!("no {} contract in project", domain.as_str()),
                ));
            }
            let expectation = ctx
                .library
                .expectations_for(domain)
                .find(|e| e.id == id)?;
            let unit = ctx
                .test_units
                .iter()
                .find(|u| expectation.category.is_match(&u.lowered))?;
            Some((
                "pattern exercised".to_string(),
                format!("{} covered in {}", expectation.description, unit.path),
            ))
        }
        FindingKind::LowRealismMock
        | FindingKind::UnconventionalTestNames
        | FindingKind::LowLineCoverage => None,
    }
}

fn marker_note(marker: bool) -> &'static str {
    if marker {
        " (invariant runner marker present)"
    } else {
        ""
    }
}
