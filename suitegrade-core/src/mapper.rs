//! Test relationship mapping
//!
//! Infers, for every test function, which production function it exercises and
//! with what intent, then joins the results of all test files into one group per
//! target function.
//!
//! Global invariants enforced:
//! - Groups are keyed by target function name; map order is sorted, list order is insertion order
//! - A group's coverage score is recomputed on every insertion, never cached stale
//! - Coverage depends only on which intent lists are non-empty, so file order cannot change it
//! - Per-file extraction is independent; the merge is the only join point

use crate::classify::round4;
use crate::patterns::PatternLibrary;
use crate::source::{FunctionDecl, SourceUnit, UnitRole};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Target recorded for tests whose target could not be inferred
pub const UNASSIGNED: &str = "unassigned";

/// What a test function is trying to demonstrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    Positive,
    Negative,
    EdgeCase,
    Invariant,
    Fuzz,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Positive => "positive",
            Intent::Negative => "negative",
            Intent::EdgeCase => "edge-case",
            Intent::Invariant => "invariant",
            Intent::Fuzz => "fuzz",
            Intent::Unknown => "unknown",
        }
    }
}

/// How a test's target was inferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    Name,
    Body,
    Unassigned,
}

/// A test name split into its conventional parts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameParts {
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// One test function with its inferred target and intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFunction {
    pub name: String,
    pub file: String,
    pub line: u32,
    pub target: String,
    pub target_source: TargetSource,
    pub intent: Intent,
    pub parts: NameParts,
}

/// Reference to a test stored in a group list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRef {
    pub name: String,
    pub file: String,
}

impl TestRef {
    fn of(test: &TestFunction) -> Self {
        TestRef {
            name: test.name.clone(),
            file: test.file.clone(),
        }
    }
}

/// Configurable coverage weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageWeights {
    pub positive: f64,
    pub negative: f64,
    pub edge_case: f64,
    pub invariant_or_fuzz: f64,
}

impl Default for CoverageWeights {
    fn default() -> Self {
        CoverageWeights {
            positive: 0.4,
            negative: 0.3,
            edge_case: 0.2,
            invariant_or_fuzz: 0.1,
        }
    }
}

impl CoverageWeights {
    pub fn total(&self) -> f64 {
        self.positive + self.negative + self.edge_case + self.invariant_or_fuzz
    }
}

/// Mapper settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapperConfig {
    pub coverage_weights: CoverageWeights,
}

/// All tests exercising one target function, bucketed by intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFunctionGroup {
    pub target: String,
    pub positive: Vec<TestRef>,
    pub negative: Vec<TestRef>,
    pub edge_case: Vec<TestRef>,
    pub invariant: Vec<TestRef>,
    pub fuzz: Vec<TestRef>,
    pub coverage_score: f64,
}

impl TestFunctionGroup {
    pub fn new(target: &str) -> Self {
        TestFunctionGroup {
            target: target.to_string(),
            positive: Vec::new(),
            negative: Vec::new(),
            edge_case: Vec::new(),
            invariant: Vec::new(),
            fuzz: Vec::new(),
            coverage_score: 0.0,
        }
    }

    /// Append a test to the list for its intent and refresh the coverage score
    pub fn insert(&mut self, test: &TestFunction, weights: &CoverageWeights) {
        let entry = TestRef::of(test);
        match test.intent {
            Intent::Positive => self.positive.push(entry),
            Intent::Negative => self.negative.push(entry),
            Intent::EdgeCase => self.edge_case.push(entry),
            Intent::Invariant => self.invariant.push(entry),
            Intent::Fuzz => self.fuzz.push(entry),
            Intent::Unknown => {}
        }
        self.coverage_score = self.compute_coverage(weights);
    }

    pub fn compute_coverage(&self, weights: &CoverageWeights) -> f64 {
        let mut score = 0.0;
        if !self.positive.is_empty() {
            score += weights.positive;
        }
        if !self.negative.is_empty() {
            score += weights.negative;
        }
        if !self.edge_case.is_empty() {
            score += weights.edge_case;
        }
        if !self.invariant.is_empty() || !self.fuzz.is_empty() {
            score += weights.invariant_or_fuzz;
        }
        round4(score.clamp(0.0, 1.0))
    }

    pub fn len(&self) -> usize {
        self.positive.len()
            + self.negative.len()
            + self.edge_case.len()
            + self.invariant.len()
            + self.fuzz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Files contributing at least one test to this group, sorted
    pub fn files(&self) -> Vec<&str> {
        let files: BTreeSet<&str> = self
            .positive
            .iter()
            .chain(&self.negative)
            .chain(&self.edge_case)
            .chain(&self.invariant)
            .chain(&self.fuzz)
            .map(|r| r.file.as_str())
            .collect();
        files.into_iter().collect()
    }
}

/// Per-file test facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTestSummary {
    pub file: String,
    pub test_count: usize,
    pub distinct_tests: usize,
    pub intent_counts: BTreeMap<Intent, usize>,
    /// File carries an invariant-runner marker (base contract or target selection)
    pub invariant_marker: bool,
    pub security_suite: bool,
    pub unassigned: usize,
}

impl FileTestSummary {
    pub fn count(&self, intent: Intent) -> usize {
        self.intent_counts.get(&intent).copied().unwrap_or(0)
    }

    /// Share of this file's tests with no inferred target
    pub fn unassigned_ratio(&self) -> f64 {
        if self.test_count == 0 {
            0.0
        } else {
            self.unassigned as f64 / self.test_count as f64
        }
    }
}

/// Output of the join stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestMap {
    pub groups: BTreeMap<String, TestFunctionGroup>,
    pub unassigned: Vec<TestFunction>,
    pub tests: Vec<TestFunction>,
    pub files: BTreeMap<String, FileTestSummary>,
}

impl TestMap {
    pub fn group(&self, target: &str) -> Option<&TestFunctionGroup> {
        self.groups.get(target)
    }

    /// Merge one file's tests into the map
    pub fn absorb(&mut self, tests: Vec<TestFunction>, summary: FileTestSummary, weights: &CoverageWeights) {
        for test in tests {
            if test.target_source == TargetSource::Unassigned {
                self.unassigned.push(test.clone());
            } else {
                self.groups
                    .entry(test.target.clone())
                    .or_insert_with(|| TestFunctionGroup::new(&test.target))
                    .insert(&test, weights);
            }
            self.tests.push(test);
        }
        self.files.insert(summary.file.clone(), summary);
    }

    pub fn count_intent(&self, intent: Intent) -> usize {
        self.tests.iter().filter(|t| t.intent == intent).count()
    }

    pub fn has_invariant_marker(&self) -> bool {
        self.files.values().any(|f| f.invariant_marker)
    }
}

/// Case-insensitive lookup of production function names
#[derive(Debug, Clone, Default)]
pub struct ProductionIndex {
    by_lower: BTreeMap<String, String>,
}

impl ProductionIndex {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut by_lower = BTreeMap::new();
        for name in names {
            by_lower
                .entry(name.to_lowercase())
                .or_insert_with(|| name.to_string());
        }
        ProductionIndex { by_lower }
    }

    pub fn is_empty(&self) -> bool {
        self.by_lower.is_empty()
    }

    /// Production spelling of `candidate`, if known
    pub fn resolve(&self, candidate: &str) -> Option<&str> {
        self.by_lower.get(&candidate.to_lowercase()).map(String::as_str)
    }
}

/// Map every test function across the given units and join them by target
pub fn build_groups(
    test_units: &[&SourceUnit],
    production: &ProductionIndex,
    library: &PatternLibrary,
    config: &MapperConfig,
) -> TestMap {
    let per_file: Vec<(Vec<TestFunction>, FileTestSummary)> = test_units
        .par_iter()
        .filter(|u| u.role == UnitRole::Test)
        .map(|u| map_unit(u, production, library))
        .collect();

    let mut map = TestMap::default();
    for (tests, summary) in per_file {
        map.absorb(tests, summary, &config.coverage_weights);
    }
    tracing::debug!(
        groups = map.groups.len(),
        unassigned = map.unassigned.len(),
        "test map built"
    );
    map
}

/// Extract and classify the tests of one unit
pub fn map_unit(
    unit: &SourceUnit,
    production: &ProductionIndex,
    library: &PatternLibrary,
) -> (Vec<TestFunction>, FileTestSummary) {
    let tests: Vec<TestFunction> = unit
        .functions
        .iter()
        .filter(|f| is_test_function(f))
        .map(|f| map_test(unit, f, production))
        .collect();

    let mut intent_counts = BTreeMap::new();
    for t in &tests {
        *intent_counts.entry(t.intent).or_insert(0) += 1;
    }
    let mut names: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();

    let lowered_path = unit.path.to_lowercase();
    let security_suite = library.is_security_suite(&lowered_path)
        || unit
            .contracts
            .iter()
            .any(|c| library.is_security_suite(&c.name.to_lowercase()));

    let summary = FileTestSummary {
        file: unit.path.clone(),
        test_count: tests.len(),
        distinct_tests: names.len(),
        intent_counts,
        invariant_marker: library.has_invariant_marker(&unit.lowered),
        security_suite,
        unassigned: tests
            .iter()
            .filter(|t| t.target_source == TargetSource::Unassigned)
            .count(),
    };
    (tests, summary)
}

/// Runner-visible test entry points; `setUp` and helpers are excluded
pub fn is_test_function(f: &FunctionDecl) -> bool {
    f.body.is_some()
        && f.is_externally_callable()
        && ["test", "invariant", "statefulFuzz", "prove"]
            .iter()
            .any(|p| f.name.starts_with(p))
}

fn map_test(unit: &SourceUnit, f: &FunctionDecl, production: &ProductionIndex) -> TestFunction {
    let name = decompose_name(&f.name);
    let body = f.body.as_deref().unwrap_or("");

    let from_name = name_target(&name, production);
    let (target, target_source) = match from_name {
        Some(t) => (t, TargetSource::Name),
        None => match body_target(body, production) {
            Some(t) => (t, TargetSource::Body),
            None => (UNASSIGNED.to_string(), TargetSource::Unassigned),
        },
    };

    let mut intent = infer_intent(name.kind, f, &name.words, body);
    if target_source == TargetSource::Unassigned && intent == Intent::Positive {
        intent = Intent::Unknown;
    }

    TestFunction {
        name: f.name.clone(),
        file: unit.path.clone(),
        line: f.line,
        target,
        target_source,
        intent,
        parts: name.parts,
    }
}

/// Intent implied by a name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrefixKind {
    Plain,
    Invariant,
    Fuzz,
    Negative,
}

const CONDITION_WORDS: &[&str] = &[
    "when", "if", "given", "with", "without", "on", "after", "before", "while", "unless", "during",
];

const OUTCOME_WORDS: &[&str] = &[
    "should", "reverts", "revert", "fails", "fail", "succeeds", "succeed", "returns", "return",
    "emits", "works",
];

const FAILURE_WORDS: &[&str] = &[
    "revert", "reverts", "reverted", "fail", "fails", "failure", "cannot", "unauthorized",
    "invalid", "insufficient", "forbidden", "reject", "rejects", "denied", "panic", "panics",
];

const BOUNDARY_WORDS: &[&str] = &[
    "zero", "max", "min", "maximum", "minimum", "overflow", "underflow", "boundary",
    "boundaries", "limit", "limits", "empty", "exceed", "exceeds", "exceeding", "edge",
];

/// A test name broken into prefix kind, parts and remainder words
#[derive(Debug, Clone)]
struct Decomposed {
    kind: PrefixKind,
    parts: NameParts,
    words: Vec<Word>,
    /// Leading words forming the target candidate
    target_words: usize,
}

fn decompose_name(name: &str) -> Decomposed {
    let (prefix, kind, rest, rest_is_condition) = split_prefix(name);
    let words = words_of(rest);

    let mut parts = NameParts {
        prefix: prefix.to_string(),
        ..NameParts::default()
    };

    let keyword_at = |w: &Word| {
        let lw = w.text.to_ascii_lowercase();
        if OUTCOME_WORDS.contains(&lw.as_str()) {
            Some(true)
        } else if CONDITION_WORDS.contains(&lw.as_str()) {
            Some(false)
        } else {
            None
        }
    };

    let mut target_end = 0;
    if !rest_is_condition {
        let first_segment = words.first().map_or(0, |w| w.segment);
        while target_end < words.len()
            && words[target_end].segment == first_segment
            && keyword_at(&words[target_end]).is_none()
        {
            target_end += 1;
        }
    }
    if target_end > 0 {
        parts.target = Some(join_camel(&words[..target_end]));
    }

    let outcome_start = words[target_end..]
        .iter()
        .position(|w| keyword_at(w) == Some(true))
        .map(|p| p + target_end)
        .unwrap_or(words.len());
    if outcome_start > target_end {
        parts.condition = Some(join_camel(&words[target_end..outcome_start]));
    }
    if outcome_start < words.len() {
        parts.outcome = Some(join_camel(&words[outcome_start..]));
    }

    Decomposed {
        kind,
        parts,
        words,
        target_words: target_end,
    }
}

/// Recognise the conventional prefix. Returns (prefix, kind, remainder, remainder is a condition).
fn split_prefix(name: &str) -> (&str, PrefixKind, &str, bool) {
    for (p, kind) in [
        ("statefulFuzz", PrefixKind::Invariant),
        ("invariant", PrefixKind::Invariant),
        ("prove", PrefixKind::Fuzz),
    ] {
        if let Some(rest) = name.strip_prefix(p) {
            return (p, kind, rest, false);
        }
    }
    let Some(after_test) = name.strip_prefix("test") else {
        return ("", PrefixKind::Plain, name, false);
    };
    let marker_start = after_test.len() - after_test.trim_start_matches('_').len();
    let body = &after_test[marker_start..];
    for (marker, kind) in [
        ("Fuzz", PrefixKind::Fuzz),
        ("Fail", PrefixKind::Negative),
        ("Cannot", PrefixKind::Negative),
        ("Revert", PrefixKind::Negative),
    ] {
        let Some(tail) = strip_word(body, marker) else {
            continue;
        };
        if marker == "Revert" {
            for cond in ["If", "When", "On"] {
                if let Some(cond_tail) = strip_word(tail.trim_start_matches('_'), cond) {
                    let consumed = name.len() - cond_tail.len();
                    return (&name[..consumed], kind, cond_tail, true);
                }
            }
        }
        let consumed = name.len() - tail.len();
        return (&name[..consumed], kind, tail, false);
    }
    ("test", PrefixKind::Plain, after_test, false)
}

/// Strip `word` (case-insensitive) when it ends at a word boundary
fn strip_word<'a>(s: &'a str, word: &str) -> Option<&'a str> {
    if !s.get(..word.len())?.eq_ignore_ascii_case(word) {
        return None;
    }
    let tail = &s[word.len()..];
    match tail.chars().next() {
        None => Some(tail),
        Some(c) if c == '_' || c.is_ascii_uppercase() || c.is_ascii_digit() => Some(tail),
        _ => None,
    }
}

/// A camel-case word and the `_`-separated segment it came from
#[derive(Debug, Clone, PartialEq, Eq)]
struct Word {
    text: String,
    segment: usize,
}

fn words_of(rest: &str) -> Vec<Word> {
    let mut words = Vec::new();
    for (segment, seg) in rest.split('_').filter(|s| !s.is_empty()).enumerate() {
        let chars: Vec<char> = seg.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            let boundary = i > 0
                && c.is_ascii_uppercase()
                && (chars[i - 1].is_ascii_lowercase()
                    || chars[i - 1].is_ascii_digit()
                    || (chars[i - 1].is_ascii_uppercase()
                        && chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase())));
            if boundary && !current.is_empty() {
                words.push(Word {
                    text: std::mem::take(&mut current),
                    segment,
                });
            }
            current.push(c);
        }
        if !current.is_empty() {
            words.push(Word {
                text: current,
                segment,
            });
        }
    }
    words
}

/// Re-join words as lowerCamelCase
fn join_camel(words: &[Word]) -> String {
    let mut out = String::new();
    for (i, w) in words.iter().enumerate() {
        let mut chars = w.text.chars();
        if let Some(first) = chars.next() {
            if i == 0 {
                out.push(first.to_ascii_lowercase());
            } else {
                out.push(first.to_ascii_uppercase());
            }
            out.extend(chars);
        }
    }
    out
}

/// Target from the name: the whole candidate, then shorter word prefixes, against
/// the production index. With no index the full candidate is taken as-is.
fn name_target(name: &Decomposed, production: &ProductionIndex) -> Option<String> {
    let candidate = name.parts.target.as_deref()?;
    if production.is_empty() {
        return Some(candidate.to_string());
    }
    if let Some(hit) = production.resolve(candidate) {
        return Some(hit.to_string());
    }
    (1..name.target_words)
        .rev()
        .find_map(|k| production.resolve(&join_camel(&name.words[..k])))
        .map(str::to_string)
}

const HELPER_RECEIVERS: &[&str] = &[
    "vm", "hevm", "console", "console2", "abi", "stderror", "stdstore", "this", "super",
    "assert", "string", "bytes", "math", "strings", "type", "msg", "block", "tx",
];

/// First `recv.fn(` call in a body that names a production function
fn body_target(body: &str, production: &ProductionIndex) -> Option<String> {
    static CALL_RE: OnceLock<Regex> = OnceLock::new();
    let re = CALL_RE.get_or_init(|| {
        Regex::new(r"(?:([A-Za-z_$][\w$]*)|\))\s*\.\s*([A-Za-z_$][\w$]*)\s*(?:\{[^{}]*\})?\s*\(")
            .unwrap()
    });
    for caps in re.captures_iter(body) {
        let func = &caps[2];
        if production.is_empty() {
            let helper = caps
                .get(1)
                .is_some_and(|r| HELPER_RECEIVERS.contains(&r.as_str().to_ascii_lowercase().as_str()));
            if !helper {
                return Some(func.to_string());
            }
        } else if let Some(hit) = production.resolve(func) {
            return Some(hit.to_string());
        }
    }
    None
}

/// First matching rule wins: invariant, fuzz, negative, edge-case, positive
fn infer_intent(kind: PrefixKind, f: &FunctionDecl, words: &[Word], body: &str) -> Intent {
    static INVARIANT_BODY_RE: OnceLock<Regex> = OnceLock::new();
    static FUZZ_BODY_RE: OnceLock<Regex> = OnceLock::new();
    static BOUNDARY_BODY_RE: OnceLock<Regex> = OnceLock::new();
    let invariant_body = INVARIANT_BODY_RE.get_or_init(|| {
        Regex::new(r"\b(targetContract|targetSelector|excludeContract)\s*\(").unwrap()
    });
    let fuzz_body =
        FUZZ_BODY_RE.get_or_init(|| Regex::new(r"\bbound\s*\(|\bvm\s*\.\s*assume\s*\(").unwrap());
    let boundary_body = BOUNDARY_BODY_RE
        .get_or_init(|| Regex::new(r"\btype\s*\(\s*u?int\d*\s*\)\s*\.\s*(max|min)\b").unwrap());

    let lowered_words: Vec<String> = words.iter().map(|w| w.text.to_ascii_lowercase()).collect();
    let has_word = |set: &[&str]| lowered_words.iter().any(|w| set.contains(&w.as_str()));

    if kind == PrefixKind::Invariant || invariant_body.is_match(body) {
        Intent::Invariant
    } else if kind == PrefixKind::Fuzz
        || f.name.to_ascii_lowercase().contains("fuzz")
        || !f.params.is_empty()
        || fuzz_body.is_match(body)
    {
        Intent::Fuzz
    } else if kind == PrefixKind::Negative || has_word(FAILURE_WORDS) || body.contains("expectRevert") {
        Intent::Negative
    } else if has_word(BOUNDARY_WORDS) || boundary_body.is_match(body) {
        Intent::EdgeCase
    } else {
        Intent::Positive
    }
}
