//! Contract domain classification
//!
//! Global invariants enforced:
//! - Pure function of (text, pattern library, settings)
//! - A domain is only assigned with at least `min_distinct_hits` distinct signature hits
//! - Ties are broken by an explicit priority order, never by map iteration order
//! - No eligible category yields `utility`, never `unknown`

use crate::patterns::{Domain, PatternLibrary, SecurityPattern, DEFAULT_DOMAIN_PRIORITY};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Tunable classification settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    /// Distinct signature hits a category needs before it can win
    pub min_distinct_hits: usize,
    /// Tie-break order; domains missing from the list rank last
    pub priority: Vec<Domain>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        ClassifierSettings {
            min_distinct_hits: 2,
            priority: DEFAULT_DOMAIN_PRIORITY.to_vec(),
        }
    }
}

/// Per-category scoring detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub score: f64,
    pub distinct_hits: usize,
    pub eligible: bool,
}

/// Outcome of classifying one source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub domain: Domain,
    pub scores: BTreeMap<Domain, CategoryScore>,
    pub confidence: f64,
    /// True when no category met the hit threshold and `utility` was assumed
    pub ambiguous: bool,
    pub security_patterns: BTreeSet<SecurityPattern>,
}

impl ClassificationResult {
    /// Distinct signature hits recorded for a domain (0 if absent)
    pub fn hit_count(&self, domain: Domain) -> usize {
        self.scores.get(&domain).map_or(0, |s| s.distinct_hits)
    }
}

/// Classify with default settings
pub fn classify(source_text: &str, library: &PatternLibrary) -> ClassificationResult {
    classify_with_settings(source_text, library, &ClassifierSettings::default())
}

/// Classify a source text against the library's domain and security tables
pub fn classify_with_settings(
    source_text: &str,
    library: &PatternLibrary,
    settings: &ClassifierSettings,
) -> ClassificationResult {
    let lowered = source_text.to_lowercase();
    classify_lowered(&lowered, library, settings)
}

/// Classify text that is already lower-cased (avoids a second pass for `SourceUnit::lowered`)
pub fn classify_lowered(
    lowered: &str,
    library: &PatternLibrary,
    settings: &ClassifierSettings,
) -> ClassificationResult {
    let mut scores = BTreeMap::new();
    for category in &library.domains {
        let hits = category.hits(lowered);
        scores.insert(
            category.key,
            CategoryScore {
                score: hits.score,
                distinct_hits: hits.distinct,
                eligible: hits.distinct >= settings.min_distinct_hits,
            },
        );
    }

    let security_patterns = library
        .security
        .iter()
        .filter(|c| c.is_match(lowered))
        .map(|c| c.key)
        .collect();

    let mut ranked: Vec<(Domain, f64)> = scores
        .iter()
        .filter(|(_, s)| s.eligible)
        .map(|(d, s)| (*d, s.score))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| priority_rank(&settings.priority, a.0).cmp(&priority_rank(&settings.priority, b.0)))
    });

    let (domain, confidence, ambiguous) = match ranked.as_slice() {
        [] => (Domain::Utility, 0.0, true),
        [(d, _)] => (*d, 1.0, false),
        [(d, top), (_, second), ..] => {
            let total = top + second;
            let confidence = if total > 0.0 { top / total } else { 0.5 };
            (*d, round4(confidence), false)
        }
    };

    ClassificationResult {
        domain,
        scores,
        confidence,
        ambiguous,
        security_patterns,
    }
}

/// Domain of the project as a whole, plus the per-file domains it was derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectClassification {
    pub domain: Domain,
    pub contract_domains: BTreeMap<String, Domain>,
}

impl ProjectClassification {
    /// True if the project itself or any contract file carries `domain`
    pub fn covers(&self, domain: Domain) -> bool {
        self.domain == domain || self.contract_domains.values().any(|d| *d == domain)
    }
}

/// Roll per-file results up to one project domain.
///
/// The most common non-ambiguous domain wins, ties by priority order. Ambiguous
/// files only count when nothing else was classified; no files gives `unknown`.
pub fn classify_project<'a>(
    results: impl IntoIterator<Item = (&'a str, &'a ClassificationResult)>,
    settings: &ClassifierSettings,
) -> ProjectClassification {
    let mut contract_domains = BTreeMap::new();
    let mut counts: BTreeMap<Domain, usize> = BTreeMap::new();
    let mut ambiguous = 0usize;
    for (file, result) in results {
        contract_domains.insert(file.to_string(), result.domain);
        if result.ambiguous {
            ambiguous += 1;
        } else {
            *counts.entry(result.domain).or_insert(0) += 1;
        }
    }

    let domain = counts
        .iter()
        .max_by(|a, b| {
            a.1.cmp(b.1).then_with(|| {
                priority_rank(&settings.priority, *b.0).cmp(&priority_rank(&settings.priority, *a.0))
            })
        })
        .map(|(d, _)| *d)
        .unwrap_or(if ambiguous > 0 {
            Domain::Utility
        } else {
            Domain::Unknown
        });

    ProjectClassification {
        domain,
        contract_domains,
    }
}

fn priority_rank(priority: &[Domain], domain: Domain) -> usize {
    priority
        .iter()
        .position(|d| *d == domain)
        .unwrap_or(priority.len())
}

pub(crate) fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
