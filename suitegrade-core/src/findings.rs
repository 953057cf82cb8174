//! Finding model
//!
//! Global invariants enforced:
//! - At most one finding per (kind, target); duplicates merge their evidence
//! - Findings are flagged, never deleted
//! - Ordering is deterministic

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Finding identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    CheatingMock,
    UntestedFunction,
    MissingNegativeTest,
    MissingInvariantTests,
    LowLineCoverage,
    MissingEdgeCaseTest,
    MissingFuzzTests,
    MissingDomainPattern,
    LowRealismMock,
    UnconventionalTestNames,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::CheatingMock => "cheating-mock",
            FindingKind::UntestedFunction => "untested-function",
            FindingKind::MissingNegativeTest => "missing-negative-test",
            FindingKind::MissingInvariantTests => "missing-invariant-tests",
            FindingKind::LowLineCoverage => "low-line-coverage",
            FindingKind::MissingEdgeCaseTest => "missing-edge-case-test",
            FindingKind::MissingFuzzTests => "missing-fuzz-tests",
            FindingKind::MissingDomainPattern => "missing-domain-pattern",
            FindingKind::LowRealismMock => "low-realism-mock",
            FindingKind::UnconventionalTestNames => "unconventional-test-names",
        }
    }

    /// Outright absence claims vs. lower-confidence style heuristics
    pub fn class(&self) -> FindingClass {
        match self {
            FindingKind::CheatingMock
            | FindingKind::UntestedFunction
            | FindingKind::MissingNegativeTest
            | FindingKind::MissingInvariantTests
            | FindingKind::LowLineCoverage => FindingClass::Absence,
            FindingKind::MissingEdgeCaseTest
            | FindingKind::MissingFuzzTests
            | FindingKind::MissingDomainPattern
            | FindingKind::LowRealismMock
            | FindingKind::UnconventionalTestNames => FindingClass::Heuristic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingClass {
    Absence,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A candidate or reported defect in the test suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub class: FindingClass,
    pub severity: Severity,
    /// Function, contract or `scope:name` the finding is about
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub message: String,
    pub evidence: Vec<String>,
    pub suppressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppression_reason: Option<String>,
}

impl Finding {
    pub fn new(kind: FindingKind, severity: Severity, target: impl Into<String>, message: impl Into<String>) -> Self {
        Finding {
            kind,
            class: kind.class(),
            severity,
            target: target.into(),
            file: None,
            message: message.into(),
            evidence: Vec::new(),
            suppressed: false,
            suppression_reason: None,
        }
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }

    /// Flag as suppressed. The first reason wins; later calls only add evidence.
    pub fn suppress(&mut self, reason: impl Into<String>, evidence: Option<String>) {
        if !self.suppressed {
            self.suppressed = true;
            self.suppression_reason = Some(reason.into());
        }
        if let Some(e) = evidence {
            if !self.evidence.contains(&e) {
                self.evidence.push(e);
            }
        }
    }
}

/// Merge findings sharing (kind, target): evidence is unioned in order,
/// the highest severity and the first file win.
pub fn merge_findings(findings: Vec<Finding>) -> Vec<Finding> {
    let mut merged: BTreeMap<(FindingKind, String), Finding> = BTreeMap::new();
    for finding in findings {
        match merged.get_mut(&(finding.kind, finding.target.clone())) {
            Some(existing) => {
                existing.severity = existing.severity.max(finding.severity);
                if existing.file.is_none() {
                    existing.file = finding.file;
                }
                for e in finding.evidence {
                    if !existing.evidence.contains(&e) {
                        existing.evidence.push(e);
                    }
                }
                if finding.suppressed && !existing.suppressed {
                    existing.suppressed = true;
                    existing.suppression_reason = finding.suppression_reason;
                }
            }
            None => {
                merged.insert((finding.kind, finding.target.clone()), finding);
            }
        }
    }
    let mut out: Vec<Finding> = merged.into_values().collect();
    sort_findings(&mut out);
    out
}

/// Sort findings deterministically
///
/// Primary: severity descending
/// Secondary: kind (declaration order)
/// Tertiary: target, then file (None last)
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(compare_findings);
}

fn compare_findings(a: &Finding, b: &Finding) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.kind.cmp(&b.kind))
        .then_with(|| a.target.cmp(&b.target))
        .then_with(|| match (&a.file, &b.file) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_evidence_per_kind_and_target() {
        let a = Finding::new(FindingKind::MissingNegativeTest, Severity::Low, "withdraw", "m")
            .in_file("test/A.t.sol")
            .with_evidence("no revert test in A");
        let b = Finding::new(FindingKind::MissingNegativeTest, Severity::Medium, "withdraw", "m")
            .in_file("test/B.t.sol")
            .with_evidence("no revert test in B")
            .with_evidence("no revert test in A");
        let c = Finding::new(FindingKind::MissingNegativeTest, Severity::Low, "deposit", "m");

        let merged = merge_findings(vec![a, b, c]);
        assert_eq!(merged.len(), 2);
        let withdraw = merged.iter().find(|f| f.target == "withdraw").unwrap();
        assert_eq!(withdraw.severity, Severity::Medium);
        assert_eq!(withdraw.file.as_deref(), Some("test/A.t.sol"));
        assert_eq!(withdraw.evidence, vec!["no revert test in A", "no revert test in B"]);
    }

    #[test]
    fn sort_is_severity_then_kind_then_target() {
        let mut findings = vec![
            Finding::new(FindingKind::MissingFuzzTests, Severity::Low, "b", ""),
            Finding::new(FindingKind::CheatingMock, Severity::High, "MockA", ""),
            Finding::new(FindingKind::MissingFuzzTests, Severity::Low, "a", ""),
            Finding::new(FindingKind::UntestedFunction, Severity::Low, "a", ""),
        ];
        sort_findings(&mut findings);
        let order: Vec<(&str, &str)> = findings
            .iter()
            .map(|f| (f.kind.as_str(), f.target.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("cheating-mock", "MockA"),
                ("untested-function", "a"),
                ("missing-fuzz-tests", "a"),
                ("missing-fuzz-tests", "b"),
            ]
        );
    }

    #[test]
    fn suppress_keeps_first_reason() {
        let mut f = Finding::new(FindingKind::MissingFuzzTests, Severity::Low, "x", "");
        f.suppress("first", Some("e1".into()));
        f.suppress("second", Some("e2".into()));
        assert!(f.suppressed);
        assert_eq!(f.suppression_reason.as_deref(), Some("first"));
        assert_eq!(f.evidence, vec!["e1", "e2"]);
    }

    #[test]
    fn kind_class_split() {
        assert_eq!(FindingKind::CheatingMock.class(), FindingClass::Absence);
        assert_eq!(FindingKind::UnconventionalTestNames.class(), FindingClass::Heuristic);
        assert_eq!(
            serde_json::to_string(&FindingKind::MissingEdgeCaseTest).unwrap(),
            "\"missing-edge-case-test\""
        );
    }
}
