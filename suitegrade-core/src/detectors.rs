//! Candidate finding detectors
//!
//! Each detector looks at one narrow signal (a single test file, a single mock,
//! test names only) and may over-report. Reconciliation against cross-file
//! evidence is the finding filter's job.
//!
//! Global invariants enforced:
//! - Detectors never suppress
//! - Coverage-derived findings only come from runs that executed the tests

use crate::classify::ClassificationResult;
use crate::findings::{Finding, FindingKind, Severity};
use crate::mapper::{Intent, TestMap};
use crate::mocks::{MockProfile, Sophistication};
use crate::patterns::{Domain, PatternLibrary};
use crate::risk::{RiskBand, RiskScore};
use crate::source::{DeclKind, FunctionDecl, SourceUnit};
use crate::toolchain::ExecutionStatus;
use std::collections::{BTreeMap, BTreeSet};

/// Tunable detector thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Line coverage percentage below which a file is reported
    pub min_line_coverage: f64,
    /// Share of unassigned tests above which a file's naming is reported
    pub unconventional_name_ratio: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            min_line_coverage: 80.0,
            unconventional_name_ratio: 0.5,
        }
    }
}

/// A contract unit with its classification and risk
#[derive(Debug, Clone, Copy)]
pub struct AnalyzedContract<'a> {
    pub unit: &'a SourceUnit,
    pub classification: &'a ClassificationResult,
    pub risk: &'a RiskScore,
}

/// Everything the detectors read
#[derive(Debug, Clone, Copy)]
pub struct DetectorInput<'a> {
    pub contracts: &'a [AnalyzedContract<'a>],
    pub test_map: &'a TestMap,
    pub mocks: &'a [MockProfile],
    pub project_domain: Domain,
    pub library: &'a PatternLibrary,
    pub execution_status: ExecutionStatus,
    pub line_coverage: Option<&'a BTreeMap<String, f64>>,
    pub config: &'a DetectorConfig,
}

/// Domains whose contracts carry state worth invariant testing
const STATEFUL_DOMAINS: &[Domain] = &[Domain::Defi, Domain::Bridge, Domain::Governance, Domain::Token];

/// Run every detector and return raw candidates in detector order
pub fn detect(input: &DetectorInput) -> Vec<Finding> {
    let production = production_functions(input.contracts);
    let mut out = Vec::new();
    out.extend(untested_functions(input, &production));
    out.extend(per_file_intent_gaps(input, &production));
    out.extend(missing_invariant_tests(input));
    out.extend(mock_findings(input.mocks));
    out.extend(missing_domain_patterns(input));
    out.extend(unconventional_test_names(input));
    out.extend(low_line_coverage(input));
    tracing::debug!(candidates = out.len(), "detectors finished");
    out
}

/// A callable production function and the contract that declares it
struct ProductionFn<'a> {
    contract: &'a str,
    decl: &'a FunctionDecl,
    unit: &'a SourceUnit,
    band: RiskBand,
}

fn production_functions<'a>(contracts: &'a [AnalyzedContract<'a>]) -> BTreeMap<&'a str, Vec<ProductionFn<'a>>> {
    let mut map: BTreeMap<&str, Vec<ProductionFn>> = BTreeMap::new();
    for c in contracts {
        for f in c.unit.implemented_functions() {
            let Some(contract) = f.contract.as_deref() else {
                continue;
            };
            let is_library = c
                .unit
                .contract(contract)
                .is_some_and(|d| d.kind == DeclKind::Library);
            if is_library || !f.is_externally_callable() || !f.is_state_changing() {
                continue;
            }
            map.entry(f.name.as_str()).or_default().push(ProductionFn {
                contract,
                decl: f,
                unit: c.unit,
                band: c.risk.band,
            });
        }
    }
    map
}

fn severity_for(band: RiskBand) -> Severity {
    match band {
        RiskBand::Low => Severity::Low,
        RiskBand::Moderate => Severity::Medium,
        RiskBand::High => Severity::High,
        RiskBand::Critical => Severity::Critical,
    }
}

fn untested_functions(input: &DetectorInput, production: &BTreeMap<&str, Vec<ProductionFn>>) -> Vec<Finding> {
    let tested: BTreeSet<&str> = input
        .test_map
        .tests
        .iter()
        .map(|t| t.target.as_str())
        .collect();
    let mut out = Vec::new();
    for (name, decls) in production {
        if tested.contains(name) {
            continue;
        }
        for p in decls {
            out.push(
                Finding::new(
                    FindingKind::UntestedFunction,
                    severity_for(p.band),
                    *name,
                    format!("{}.{} has no test targeting it", p.contract, name),
                )
                .in_file(p.unit.path.clone())
                .with_evidence(format!("declared at {}:{}", p.unit.path, p.decl.line)),
            );
        }
    }
    out
}

/// Per test file: for each target it exercises, which intents that file lacks
fn per_file_intent_gaps(input: &DetectorInput, production: &BTreeMap<&str, Vec<ProductionFn>>) -> Vec<Finding> {
    let mut by_file: BTreeMap<(&str, &str), BTreeSet<Intent>> = BTreeMap::new();
    for t in &input.test_map.tests {
        if !production.contains_key(t.target.as_str()) {
            continue;
        }
        by_file
            .entry((t.file.as_str(), t.target.as_str()))
            .or_default()
            .insert(t.intent);
    }

    let mut out = Vec::new();
    for ((file, target), intents) in by_file {
        let decls = &production[target];
        let band = decls.iter().map(|p| p.band).max().unwrap_or(RiskBand::Low);
        if !intents.contains(&Intent::Negative) {
            out.push(
                Finding::new(
                    FindingKind::MissingNegativeTest,
                    severity_for(band),
                    target,
                    format!("no test checks that {target} rejects invalid input"),
                )
                .in_file(file)
                .with_evidence(format!("{file} has no negative test for {target}")),
            );
        }
        if !intents.contains(&Intent::EdgeCase) {
            out.push(
                Finding::new(
                    FindingKind::MissingEdgeCaseTest,
                    Severity::Low,
                    target,
                    format!("no boundary-value test for {target}"),
                )
                .in_file(file)
                .with_evidence(format!("{file} has no edge-case test for {target}")),
            );
        }
        let takes_input = decls.iter().any(|p| !p.decl.params.is_empty());
        if takes_input && !intents.contains(&Intent::Fuzz) && !intents.contains(&Intent::Invariant) {
            out.push(
                Finding::new(
                    FindingKind::MissingFuzzTests,
                    Severity::Low,
                    target,
                    format!("{target} takes input but is never fuzzed"),
                )
                .in_file(file)
                .with_evidence(format!("{file} has no fuzz test for {target}")),
            );
        }
    }
    out
}

fn missing_invariant_tests(input: &DetectorInput) -> Vec<Finding> {
    if !STATEFUL_DOMAINS.contains(&input.project_domain) {
        return Vec::new();
    }
    let named = input
        .test_map
        .tests
        .iter()
        .filter(|t| t.name.starts_with("invariant") || t.name.starts_with("statefulFuzz"))
        .count();
    if named > 0 {
        return Vec::new();
    }
    vec![Finding::new(
        FindingKind::MissingInvariantTests,
        Severity::Medium,
        "project",
        format!(
            "0 invariant tests for a {} project",
            input.project_domain.as_str()
        ),
    )
    .with_evidence("no test function named invariant* or statefulFuzz*")]
}

fn mock_findings(mocks: &[MockProfile]) -> Vec<Finding> {
    let mut out = Vec::new();
    for m in mocks {
        if m.unconditional_success {
            out.push(
                Finding::new(
                    FindingKind::CheatingMock,
                    Severity::High,
                    m.contract.as_str(),
                    format!("{} succeeds unconditionally on every path", m.contract),
                )
                .in_file(m.file.clone())
                .with_evidence(format!(
                    "{} function(s) with no checks, sophistication {}",
                    m.function_count,
                    m.sophistication.as_str()
                ))
                .with_evidence(format!("used by {} test(s)", m.usage_count)),
            );
        }
        if m.sophistication == Sophistication::Basic {
            out.push(
                Finding::new(
                    FindingKind::LowRealismMock,
                    Severity::Low,
                    m.contract.as_str(),
                    format!("{} models only one behaviour", m.contract),
                )
                .in_file(m.file.clone())
                .with_evidence(format!("realism {:.2}", m.realism)),
            );
        }
    }
    out
}

/// Expected domain patterns judged from test function names alone
fn missing_domain_patterns(input: &DetectorInput) -> Vec<Finding> {
    let mut domains: BTreeSet<Domain> = input
        .contracts
        .iter()
        .map(|c| c.classification.domain)
        .collect();
    domains.insert(input.project_domain);

    let names: String = input
        .test_map
        .tests
        .iter()
        .map(|t| t.name.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    let mut out = Vec::new();
    for domain in domains {
        for expectation in input.library.expectations_for(domain) {
            if expectation.category.is_match(&names) {
                continue;
            }
            out.push(
                Finding::new(
                    FindingKind::MissingDomainPattern,
                    Severity::Low,
                    format!("{}:{}", domain.as_str(), expectation.id),
                    format!(
                        "{} contracts usually test {}",
                        domain.as_str(),
                        expectation.description
                    ),
                )
                .with_evidence("no test name mentions it"),
            );
        }
    }
    out
}

fn unconventional_test_names(input: &DetectorInput) -> Vec<Finding> {
    input
        .test_map
        .files
        .values()
        .filter(|s| s.test_count > 0 && s.unassigned_ratio() > input.config.unconventional_name_ratio)
        .map(|s| {
            Finding::new(
                FindingKind::UnconventionalTestNames,
                Severity::Info,
                s.file.as_str(),
                "most test names do not identify the function under test",
            )
            .in_file(s.file.clone())
            .with_evidence(format!("{} of {} tests unassigned", s.unassigned, s.test_count))
        })
        .collect()
}

fn low_line_coverage(input: &DetectorInput) -> Vec<Finding> {
    if !input.execution_status.allows_coverage_findings() {
        return Vec::new();
    }
    let Some(coverage) = input.line_coverage else {
        return Vec::new();
    };
    let contract_files: BTreeSet<&str> = input.contracts.iter().map(|c| c.unit.path.as_str()).collect();
    coverage
        .iter()
        .filter(|(file, _)| contract_files.is_empty() || contract_files.iter().any(|c| paths_match(c, file)))
        .filter(|(_, pct)| **pct < input.config.min_line_coverage)
        .map(|(file, pct)| {
            Finding::new(
                FindingKind::LowLineCoverage,
                Severity::Medium,
                file.as_str(),
                format!("line coverage {pct:.2}% is below {:.2}%", input.config.min_line_coverage),
            )
            .in_file(file.clone())
            .with_evidence(format!("{file}: {pct:.2}% lines covered"))
        })
        .collect()
}

/// Coverage tools report paths relative to their own root; compare by suffix
fn paths_match(a: &str, b: &str) -> bool {
    let a = a.trim_start_matches("./");
    let b = b.trim_start_matches("./");
    a == b || a.ends_with(&format!("/{b}")) || b.ends_with(&format!("/{a}"))
}
