//! Report assembly and output generation
//!
//! Global invariants enforced:
//! - Deterministic output ordering
//! - Byte-for-byte identical output across runs
//! - Execution status is carried verbatim; a compile failure is never shown as a test-quality defect

use crate::classify::ClassificationResult;
use crate::error::Diagnostic;
use crate::filter::SophisticationIndicator;
use crate::findings::{Finding, FindingKind, Severity};
use crate::mapper::{FileTestSummary, TestFunction, TestFunctionGroup};
use crate::mocks::MockProfile;
use crate::patterns::Domain;
use crate::risk::{RiskBand, RiskScore};
use crate::toolchain::ExecutionStatus;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Bumped whenever the JSON shape changes
pub const SCHEMA_VERSION: u32 = 1;

/// Classification and risk of one contract file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractReport {
    pub file: String,
    pub contracts: Vec<String>,
    pub classification: ClassificationResult,
    pub risk: RiskScore,
}

/// Test facts and sophistication of one test file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFileReport {
    #[serde(flatten)]
    pub summary: FileTestSummary,
    pub sophistication: f64,
}

/// Structured input for an external guidance writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceSignal {
    pub topic: String,
    pub target: String,
    pub domain: Domain,
    pub risk_band: RiskBand,
    pub severity: Severity,
}

/// Headline counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub contract_files: usize,
    pub test_files: usize,
    pub tests: usize,
    pub coverage_groups: usize,
    pub findings: usize,
    pub suppressed: usize,
}

/// Complete analysis report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema_version: u32,
    pub pattern_library_version: String,
    pub execution_status: ExecutionStatus,
    pub project_domain: Domain,
    pub summary: ReportSummary,
    pub contracts: Vec<ContractReport>,
    pub coverage_groups: Vec<TestFunctionGroup>,
    pub unassigned_tests: Vec<TestFunction>,
    pub test_files: Vec<TestFileReport>,
    pub mock_profiles: Vec<MockProfile>,
    pub findings: Vec<Finding>,
    pub guidance: Vec<GuidanceSignal>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Parts the assembler combines
#[derive(Debug, Clone)]
pub struct ReportParts {
    pub pattern_library_version: String,
    pub execution_status: ExecutionStatus,
    pub project_domain: Domain,
    pub contracts: Vec<ContractReport>,
    pub coverage_groups: Vec<TestFunctionGroup>,
    pub unassigned_tests: Vec<TestFunction>,
    pub test_count: usize,
    pub file_summaries: Vec<FileTestSummary>,
    pub indicators: Vec<SophisticationIndicator>,
    pub mock_profiles: Vec<MockProfile>,
    pub findings: Vec<Finding>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    /// Assemble a report, sorting every section deterministically
    pub fn assemble(parts: ReportParts) -> Self {
        let contracts = sort_contracts(parts.contracts);
        let test_files: Vec<TestFileReport> = parts
            .file_summaries
            .into_iter()
            .map(|summary| {
                let sophistication = parts
                    .indicators
                    .iter()
                    .find(|i| i.file == summary.file)
                    .map_or(0.0, |i| i.value);
                TestFileReport {
                    summary,
                    sophistication,
                }
            })
            .collect();

        let mut mock_profiles = parts.mock_profiles;
        mock_profiles.sort_by(|a, b| a.file.cmp(&b.file).then_with(|| a.contract.cmp(&b.contract)));

        let mut diagnostics = parts.diagnostics;
        diagnostics.sort();
        diagnostics.dedup();

        let guidance = build_guidance(&parts.findings, &contracts, parts.project_domain);
        let summary = ReportSummary {
            contract_files: contracts.len(),
            test_files: test_files.len(),
            tests: parts.test_count,
            coverage_groups: parts.coverage_groups.len(),
            findings: parts.findings.len(),
            suppressed: parts.findings.iter().filter(|f| f.suppressed).count(),
        };

        Report {
            schema_version: SCHEMA_VERSION,
            pattern_library_version: parts.pattern_library_version,
            execution_status: parts.execution_status,
            project_domain: parts.project_domain,
            summary,
            contracts,
            coverage_groups: parts.coverage_groups,
            unassigned_tests: parts.unassigned_tests,
            test_files,
            mock_profiles,
            findings: parts.findings,
            guidance,
            diagnostics,
        }
    }

    /// Findings that survived filtering
    pub fn active_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.suppressed)
    }

    pub fn group(&self, target: &str) -> Option<&TestFunctionGroup> {
        self.coverage_groups.iter().find(|g| g.target == target)
    }
}

/// Sort contracts deterministically
pub fn sort_contracts(mut contracts: Vec<ContractReport>) -> Vec<ContractReport> {
    contracts.sort_by(|a, b| {
        // 1. Risk descending
        b.risk
            .value
            .partial_cmp(&a.risk.value)
            .unwrap_or(Ordering::Equal)
            // 2. File path ascending
            .then_with(|| a.file.cmp(&b.file))
    });
    contracts
}

/// One signal per active finding, plus one per high-risk contract
fn build_guidance(findings: &[Finding], contracts: &[ContractReport], domain: Domain) -> Vec<GuidanceSignal> {
    let project_band = contracts
        .iter()
        .map(|c| c.risk.band)
        .max()
        .unwrap_or(RiskBand::Low);

    let mut signals: Vec<GuidanceSignal> = findings
        .iter()
        .filter(|f| !f.suppressed)
        .map(|f| {
            let contract = f
                .file
                .as_deref()
                .and_then(|file| contracts.iter().find(|c| c.file == file));
            GuidanceSignal {
                topic: f.kind.as_str().to_string(),
                target: f.target.clone(),
                domain: contract.map_or(domain, |c| c.classification.domain),
                risk_band: contract.map_or(project_band, |c| c.risk.band),
                severity: f.severity,
            }
        })
        .collect();

    for c in contracts {
        if c.risk.band >= RiskBand::High {
            signals.push(GuidanceSignal {
                topic: "high-risk-contract".to_string(),
                target: c.file.clone(),
                domain: c.classification.domain,
                risk_band: c.risk.band,
                severity: if c.risk.band == RiskBand::Critical {
                    Severity::High
                } else {
                    Severity::Medium
                },
            });
        }
    }

    signals.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.topic.cmp(&b.topic))
            .then_with(|| a.target.cmp(&b.target))
    });
    signals
}

/// Render a report as text output
pub fn render_text(report: &Report) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "suitegrade report (schema {}, patterns {})\n",
        report.schema_version, report.pattern_library_version
    ));
    output.push_str(&format!(
        "domain: {}  execution: {}  tests: {}  findings: {} ({} suppressed)\n",
        report.project_domain.as_str(),
        report.execution_status.as_str(),
        report.summary.tests,
        report.summary.findings,
        report.summary.suppressed
    ));
    if report.execution_status == ExecutionStatus::CompileFailed {
        output.push_str("note: project failed to compile; results are static analysis only\n");
    }

    output.push_str("\nCONTRACTS\n");
    output.push_str(&format!(
        "{:<8} {:<10} {:<12} {:<6} {}\n",
        "RISK", "BAND", "DOMAIN", "CONF", "FILE"
    ));
    for c in &report.contracts {
        output.push_str(&format!(
            "{:<8} {:<10} {:<12} {:<6} {}\n",
            format!("{:.2}", c.risk.value),
            c.risk.band.as_str(),
            c.classification.domain.as_str(),
            format!("{:.2}", c.classification.confidence),
            c.file
        ));
    }

    output.push_str("\nCOVERAGE\n");
    output.push_str(&format!(
        "{:<8} {:<4} {:<4} {:<5} {:<4} {:<5} {}\n",
        "SCORE", "POS", "NEG", "EDGE", "INV", "FUZZ", "TARGET"
    ));
    for g in &report.coverage_groups {
        output.push_str(&format!(
            "{:<8} {:<4} {:<4} {:<5} {:<4} {:<5} {}\n",
            format!("{:.2}", g.coverage_score),
            g.positive.len(),
            g.negative.len(),
            g.edge_case.len(),
            g.invariant.len(),
            g.fuzz.len(),
            g.target
        ));
    }
    if !report.unassigned_tests.is_empty() {
        output.push_str(&format!("({} unassigned tests)\n", report.unassigned_tests.len()));
    }

    if !report.mock_profiles.is_empty() {
        output.push_str("\nMOCKS\n");
        output.push_str(&format!(
            "{:<13} {:<8} {:<6} {:<24} {}\n",
            "LEVEL", "REALISM", "USAGE", "CONTRACT", "FILE"
        ));
        for m in &report.mock_profiles {
            output.push_str(&format!(
                "{:<13} {:<8} {:<6} {:<24} {}\n",
                m.sophistication.as_str(),
                format!("{:.2}", m.realism),
                m.usage_count,
                truncate_or_pad(&m.contract, 24),
                m.file
            ));
        }
    }

    output.push_str("\nFINDINGS\n");
    output.push_str(&format!(
        "{:<9} {:<26} {:<30} {}\n",
        "SEVERITY", "KIND", "TARGET", "STATUS"
    ));
    for f in &report.findings {
        let status = match &f.suppression_reason {
            Some(reason) if f.suppressed => format!("suppressed: {reason}"),
            _ if f.suppressed => "suppressed".to_string(),
            _ => "active".to_string(),
        };
        output.push_str(&format!(
            "{:<9} {:<26} {:<30} {}\n",
            f.severity.as_str(),
            f.kind.as_str(),
            truncate_or_pad(&f.target, 30),
            status
        ));
    }

    if !report.diagnostics.is_empty() {
        output.push_str("\nDIAGNOSTICS\n");
        for d in &report.diagnostics {
            match &d.file {
                Some(file) => output.push_str(&format!("{file}: {}\n", d.message)),
                None => output.push_str(&format!("{}\n", d.message)),
            }
        }
    }

    output
}

/// Render a report as JSON output
pub fn render_json(report: &Report) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}

/// Truncate or pad string to fixed width
fn truncate_or_pad(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        format!("{:<width$}", s, width = width)
    }
}

/// True if any active finding has `kind`
pub fn has_active(report: &Report, kind: FindingKind) -> bool {
    report.active_findings().any(|f| f.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::patterns::{PatternLibrary, LIBRARY_VERSION};
    use crate::risk::score;
    use crate::source::SourceUnit;

    fn contract(path: &str, src: &str) -> ContractReport {
        let unit = SourceUnit::parse(path, src);
        let classification = classify(&unit.text, &PatternLibrary::builtin());
        let risk = score(&unit, &classification);
        ContractReport {
            file: path.to_string(),
            contracts: unit.contracts.iter().map(|c| c.name.clone()).collect(),
            classification,
            risk,
        }
    }

    fn parts() -> ReportParts {
        ReportParts {
            pattern_library_version: LIBRARY_VERSION.to_string(),
            execution_status: ExecutionStatus::NotExecuted,
            project_domain: Domain::Defi,
            contracts: vec![
                contract("src/Util.sol", "library Util {}"),
                contract(
                    "src/Pool.sol",
                    "contract Pool { uint collateral; function swap() external payable { (bool ok,) = msg.sender.call{value: 1}(\"\"); } }",
                ),
            ],
            coverage_groups: Vec::new(),
            unassigned_tests: Vec::new(),
            test_count: 0,
            file_summaries: Vec::new(),
            indicators: Vec::new(),
            mock_profiles: Vec::new(),
            findings: vec![
                Finding::new(FindingKind::UntestedFunction, Severity::High, "swap", "swap untested")
                    .in_file("src/Pool.sol"),
                {
                    let mut f = Finding::new(FindingKind::MissingFuzzTests, Severity::Low, "swap", "");
                    f.suppress("fuzz test exists", None);
                    f
                },
            ],
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn contracts_sorted_by_risk_descending() {
        let report = Report::assemble(parts());
        assert_eq!(report.contracts[0].file, "src/Pool.sol");
        assert_eq!(report.contracts[1].file, "src/Util.sol");
    }

    #[test]
    fn summary_and_guidance() {
        let report = Report::assemble(parts());
        assert_eq!(report.summary.findings, 2);
        assert_eq!(report.summary.suppressed, 1);
        assert!(has_active(&report, FindingKind::UntestedFunction));
        assert!(!has_active(&report, FindingKind::MissingFuzzTests));

        let topics: Vec<&str> = report.guidance.iter().map(|g| g.topic.as_str()).collect();
        assert!(topics.contains(&"untested-function"));
        assert!(!topics.contains(&"missing-fuzz-tests"));
        let g = report.guidance.iter().find(|g| g.topic == "untested-function").unwrap();
        assert_eq!(g.domain, report.contracts[0].classification.domain);
        assert_eq!(g.risk_band, report.contracts[0].risk.band);
    }

    #[test]
    fn json_is_deterministic() {
        let a = render_json(&Report::assemble(parts()));
        let b = render_json(&Report::assemble(parts()));
        assert_eq!(a, b);
        assert!(a.contains("\"execution_status\": \"not_executed\""));
        assert!(a.contains("\"schema_version\": 1"));
    }

    #[test]
    fn text_shows_sections_and_suppression() {
        let text = render_text(&Report::assemble(parts()));
        assert!(text.contains("CONTRACTS"));
        assert!(text.contains("FINDINGS"));
        assert!(text.contains("suppressed: fuzz test exists"));
        assert!(!text.contains("DIAGNOSTICS"));
    }

    #[test]
    fn compile_failure_is_called_out() {
        let mut p = parts();
        p.execution_status = ExecutionStatus::CompileFailed;
        let text = render_text(&Report::assemble(p));
        assert!(text.contains("execution: compile_failed"));
        assert!(text.contains("failed to compile"));
    }

    #[test]
    fn truncate_or_pad_widths() {
        assert_eq!(truncate_or_pad("abc", 5), "abc  ");
        assert_eq!(truncate_or_pad("abcdefgh", 6), "abc...");
    }
}
