//! Mock contract sophistication scoring

use crate::classify::round4;
use crate::mapper::is_test_function;
use crate::patterns::{MockFeature, PatternLibrary};
use crate::source::{is_mock_name, ContractDecl, DeclKind, FunctionDecl, SourceUnit, UnitRole};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Sophistication ladder, ordered from least to most capable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sophistication {
    Trivial,
    Basic,
    Intermediate,
    Advanced,
}

impl Sophistication {
    pub fn from_feature_count(n: usize) -> Self {
        match n {
            0 => Sophistication::Trivial,
            1 => Sophistication::Basic,
            2 | 3 => Sophistication::Intermediate,
            _ => Sophistication::Advanced,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sophistication::Trivial => "trivial",
            Sophistication::Basic => "basic",
            Sophistication::Intermediate => "intermediate",
            Sophistication::Advanced => "advanced",
        }
    }
}

/// Assessment of one mock contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockProfile {
    pub contract: String,
    pub file: String,
    pub features: BTreeSet<MockFeature>,
    pub state_tracking: bool,
    pub configurable_failure: bool,
    pub call_echoing: bool,
    pub sophistication: Sophistication,
    pub realism: f64,
    /// Test functions in files that reference this mock
    pub usage_count: usize,
    pub referenced_by: Vec<String>,
    /// Every function returns success without any check
    pub unconditional_success: bool,
    pub has_mapping_state: bool,
    pub function_count: usize,
}

impl MockProfile {
    /// True if the mock is declared in or referenced from `file`
    pub fn touches(&self, file: &str) -> bool {
        self.file == file || self.referenced_by.iter().any(|f| f == file)
    }
}

/// Profile every mock candidate across `units`; usage is counted over `test_units`
pub fn score_mocks(
    units: &[&SourceUnit],
    test_units: &[&SourceUnit],
    library: &PatternLibrary,
) -> Vec<MockProfile> {
    let mut profiles = Vec::new();
    for unit in units {
        for decl in &unit.contracts {
            if !is_candidate(unit, decl) {
                continue;
            }
            profiles.push(profile(unit, decl, test_units, library));
        }
    }
    tracing::debug!(mocks = profiles.len(), "mock profiles scored");
    profiles
}

fn is_candidate(unit: &SourceUnit, decl: &ContractDecl) -> bool {
    if matches!(decl.kind, DeclKind::Interface | DeclKind::Library) {
        return false;
    }
    if is_mock_name(&decl.name) || unit.role == UnitRole::Mock {
        return true;
    }
    let implements_interface = decl.bases.iter().any(|b| {
        let mut chars = b.chars();
        chars.next() == Some('I') && chars.next().is_some_and(|c| c.is_ascii_uppercase())
    });
    if !implements_interface {
        return false;
    }
    let functions: Vec<&FunctionDecl> = implemented(unit, &decl.name).collect();
    !functions.is_empty() && functions.iter().all(|f| is_trivial_body(f))
}

fn implemented<'a>(unit: &'a SourceUnit, contract: &'a str) -> impl Iterator<Item = &'a FunctionDecl> {
    unit.functions_of(contract).filter(|f| f.body.is_some())
}

fn profile(
    unit: &SourceUnit,
    decl: &ContractDecl,
    test_units: &[&SourceUnit],
    library: &PatternLibrary,
) -> MockProfile {
    let body = unit.contract_body(decl).to_lowercase();
    let features: BTreeSet<MockFeature> = library
        .mock_features
        .iter()
        .filter(|c| c.is_match(&body))
        .map(|c| c.key)
        .collect();

    let functions: Vec<&FunctionDecl> = implemented(unit, &decl.name).collect();
    let unconditional_success =
        !functions.is_empty() && functions.iter().all(|f| is_trivial_body(f));

    let (usage_count, referenced_by) = usage(&decl.name, test_units);
    let sophistication = Sophistication::from_feature_count(features.len());
    let reuse_bonus = if usage_count > 1 { 0.1 } else { 0.0 };
    let realism = round4((features.len() as f64 / MockFeature::COUNT as f64 + reuse_bonus).min(1.0));

    MockProfile {
        contract: decl.name.clone(),
        file: unit.path.clone(),
        state_tracking: features.contains(&MockFeature::StateTracking),
        configurable_failure: features.contains(&MockFeature::ConfigurableFailure),
        call_echoing: features.contains(&MockFeature::CallEchoing),
        features,
        sophistication,
        realism,
        usage_count,
        referenced_by,
        unconditional_success,
        has_mapping_state: mapping_re().is_match(&body),
        function_count: functions.len(),
    }
}

fn mapping_re() -> &'static Regex {
    static MAPPING_RE: OnceLock<Regex> = OnceLock::new();
    MAPPING_RE.get_or_init(|| Regex::new(r"\bmapping\s*\(").unwrap())
}

/// Test functions in test files that mention `name`, and those files
fn usage(name: &str, test_units: &[&SourceUnit]) -> (usize, Vec<String>) {
    let Ok(word) = Regex::new(&format!(r"\b{}\b", regex::escape(name))) else {
        return (0, Vec::new());
    };
    let mut count = 0;
    let mut files = Vec::new();
    for unit in test_units {
        if unit.role != UnitRole::Test || !word.is_match(&unit.code) {
            continue;
        }
        count += unit.functions.iter().filter(|f| is_test_function(f)).count();
        files.push(unit.path.clone());
    }
    (count, files)
}

/// Empty, or a single `return` of a literal / identifier tuple with no checks
pub fn is_trivial_body(f: &FunctionDecl) -> bool {
    static RETURN_RE: OnceLock<Regex> = OnceLock::new();
    let re = RETURN_RE.get_or_init(|| {
        Regex::new(r#"^return\s*\(?\s*(?:[\w$.]+|"[^"]*")(?:\s*\(\s*0\s*\))?(?:\s*,\s*(?:[\w$.]+|"[^"]*"))*\s*\)?\s*;$"#)
            .unwrap()
    });
    let Some(body) = f.body.as_deref() else {
        return false;
    };
    let body = body.trim();
    body.is_empty() || re.is_match(body)
}
