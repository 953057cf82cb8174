//! Pattern library
//!
//! Static, versioned signature tables for domain categories, security
//! categories, mock features and domain-expected test patterns.
//!
//! Global invariants enforced:
//! - Tables are data, not code: one generic routine scores every category
//! - Signatures are matched against lower-cased text
//! - Hits are counted per distinct signature, never per occurrence
//! - A library is immutable once built; components receive it by reference

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Version of the built-in tables. Bumped whenever a signature or weight changes,
/// since classification is a pure function of (text, library version).
pub const LIBRARY_VERSION: &str = "1.3.1";

/// Coarse business category of a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Defi,
    Nft,
    Governance,
    Gaming,
    Bridge,
    Token,
    Utility,
    Unknown,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Defi => "defi",
            Domain::Nft => "nft",
            Domain::Governance => "governance",
            Domain::Gaming => "gaming",
            Domain::Bridge => "bridge",
            Domain::Token => "token",
            Domain::Utility => "utility",
            Domain::Unknown => "unknown",
        }
    }

    pub fn parse(name: &str) -> Option<Domain> {
        match name.trim().to_ascii_lowercase().as_str() {
            "defi" => Some(Domain::Defi),
            "nft" => Some(Domain::Nft),
            "governance" => Some(Domain::Governance),
            "gaming" => Some(Domain::Gaming),
            "bridge" => Some(Domain::Bridge),
            "token" => Some(Domain::Token),
            "utility" => Some(Domain::Utility),
            "unknown" => Some(Domain::Unknown),
            _ => None,
        }
    }
}

/// Tie-break order among equally scoring domain categories
pub const DEFAULT_DOMAIN_PRIORITY: [Domain; 7] = [
    Domain::Defi,
    Domain::Governance,
    Domain::Bridge,
    Domain::Token,
    Domain::Nft,
    Domain::Gaming,
    Domain::Utility,
];

/// Security-relevant constructs detected in contract source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityPattern {
    LowLevelCall,
    Delegatecall,
    Selfdestruct,
    TxOrigin,
    OracleDependency,
    SignatureVerification,
    InlineAssembly,
    UncheckedArithmetic,
    PayableSurface,
    TimestampDependence,
    AccessControl,
}

impl SecurityPattern {
    pub const ALL: [SecurityPattern; 11] = [
        SecurityPattern::LowLevelCall,
        SecurityPattern::Delegatecall,
        SecurityPattern::Selfdestruct,
        SecurityPattern::TxOrigin,
        SecurityPattern::OracleDependency,
        SecurityPattern::SignatureVerification,
        SecurityPattern::InlineAssembly,
        SecurityPattern::UncheckedArithmetic,
        SecurityPattern::PayableSurface,
        SecurityPattern::TimestampDependence,
        SecurityPattern::AccessControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityPattern::LowLevelCall => "low-level-call",
            SecurityPattern::Delegatecall => "delegatecall",
            SecurityPattern::Selfdestruct => "selfdestruct",
            SecurityPattern::TxOrigin => "tx-origin",
            SecurityPattern::OracleDependency => "oracle-dependency",
            SecurityPattern::SignatureVerification => "signature-verification",
            SecurityPattern::InlineAssembly => "inline-assembly",
            SecurityPattern::UncheckedArithmetic => "unchecked-arithmetic",
            SecurityPattern::PayableSurface => "payable-surface",
            SecurityPattern::TimestampDependence => "timestamp-dependence",
            SecurityPattern::AccessControl => "access-control",
        }
    }

    pub fn parse(name: &str) -> Option<SecurityPattern> {
        Self::ALL.into_iter().find(|p| p.as_str() == name.trim())
    }

    /// Default severity weight. An unrestricted external call outweighs an
    /// access-control check, which only marks a privileged surface.
    pub fn default_weight(&self) -> f64 {
        match self {
            SecurityPattern::LowLevelCall => 0.15,
            SecurityPattern::Delegatecall => 0.15,
            SecurityPattern::Selfdestruct => 0.1,
            SecurityPattern::TxOrigin => 0.1,
            SecurityPattern::OracleDependency => 0.1,
            SecurityPattern::SignatureVerification => 0.08,
            SecurityPattern::InlineAssembly => 0.05,
            SecurityPattern::UncheckedArithmetic => 0.05,
            SecurityPattern::PayableSurface => 0.05,
            SecurityPattern::TimestampDependence => 0.03,
            SecurityPattern::AccessControl => 0.02,
        }
    }
}

/// Behaviour a mock contract can model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MockFeature {
    ConfigurableFailure,
    StateTracking,
    ParameterizableReturns,
    LatencySimulation,
    CallEchoing,
}

impl MockFeature {
    pub const COUNT: usize = 5;

    pub fn as_str(&self) -> &'static str {
        match self {
            MockFeature::ConfigurableFailure => "configurable-failure",
            MockFeature::StateTracking => "state-tracking",
            MockFeature::ParameterizableReturns => "parameterizable-returns",
            MockFeature::LatencySimulation => "latency-simulation",
            MockFeature::CallEchoing => "call-echoing",
        }
    }
}

// ---------- Declarative tables: (category, signature, weight) ----------

const DOMAIN_TABLE: &[(Domain, &str, f64)] = &[
    (Domain::Defi, r"\bswap", 1.0),
    (Domain::Defi, r"liquidity", 1.0),
    (Domain::Defi, r"collateral", 1.5),
    (Domain::Defi, r"\bborrow", 1.0),
    (Domain::Defi, r"flash_?loan", 1.5),
    (Domain::Defi, r"reserve[01]\b|getamountout|getamountin", 1.5),
    (Domain::Defi, r"slippage|amountoutmin|minamountout", 1.0),
    (Domain::Defi, r"liquidat", 1.5),
    (Domain::Defi, r"\bstak(e|ing|ed)\b|rewardpertoken", 1.0),
    (Domain::Defi, r"erc4626|converttoshares|converttoassets|totalassets", 1.5),
    (Domain::Defi, r"interest_?rate|\bapy\b|\bapr\b", 1.0),
    (Domain::Defi, r"\bfee(s|bps)?\b", 0.5),
    (Domain::Nft, r"erc721|ierc721", 2.0),
    (Domain::Nft, r"erc1155|ierc1155", 2.0),
    (Domain::Nft, r"tokenuri|baseuri", 1.5),
    (Domain::Nft, r"onerc721received|onerc1155received", 1.5),
    (Domain::Nft, r"royalt(y|ies)|erc2981", 1.0),
    (Domain::Nft, r"\bownerof\b", 1.0),
    (Domain::Nft, r"setapprovalforall", 1.0),
    (Domain::Nft, r"\bmaxsupply\b|max_supply", 0.5),
    (Domain::Governance, r"\bpropos(e|al|als)\b", 1.5),
    (Domain::Governance, r"\bvot(e|es|ing)\b|castvote", 1.5),
    (Domain::Governance, r"quorum", 2.0),
    (Domain::Governance, r"timelock", 1.5),
    (Domain::Governance, r"\bgovern(or|ance)\b", 1.5),
    (Domain::Governance, r"\bdelegates?\b|getvotes|getpastvotes", 1.0),
    (Domain::Governance, r"votingdelay|votingperiod|proposalthreshold", 1.5),
    (Domain::Bridge, r"\bbridg(e|ed|ing)\b", 2.0),
    (Domain::Bridge, r"cross_?-?chain", 1.5),
    (Domain::Bridge, r"\brelay(er|ed)?\b", 1.0),
    (Domain::Bridge, r"messenger|sendmessage|receivemessage", 1.0),
    (Domain::Bridge, r"merkle_?(proof|root)", 1.0),
    (Domain::Bridge, r"lzreceive|layerzero|wormhole|ccip", 2.0),
    (Domain::Bridge, r"finalizewithdrawal|destinationchain|sourcechain|chainselector", 1.5),
    (Domain::Token, r"\berc20\b|ierc20", 1.0),
    (Domain::Token, r"totalsupply", 1.0),
    (Domain::Token, r"\bbalanceof\b", 0.5),
    (Domain::Token, r"\ballowance\b", 1.0),
    (Domain::Token, r"\bapprove\s*\(", 0.5),
    (Domain::Token, r"\btransferfrom\s*\(", 0.5),
    (Domain::Token, r"\b_mint\s*\(|\b_burn\s*\(", 1.0),
    (Domain::Token, r"\bdecimals\s*\(", 0.5),
    (Domain::Gaming, r"\bgames?\b|gameplay", 2.0),
    (Domain::Gaming, r"\bplayers?\b", 1.5),
    (Domain::Gaming, r"\brandom(ness)?\b|\bvrf\b|requestrandomwords", 1.0),
    (Domain::Gaming, r"\b(battle|quest|loot|tournament|leaderboard)\b", 1.5),
    (Domain::Gaming, r"\b(level|experience|xp)\b", 0.5),
    (Domain::Gaming, r"\bbet(s|ting)?\b|\bwager", 1.0),
    (Domain::Utility, r"\blibrary\s+\w+", 1.0),
    (Domain::Utility, r"\bmath\b|mulDiv|sqrt", 0.5),
    (Domain::Utility, r"\butils?\b|helpers?\b", 0.5),
    (Domain::Utility, r"abi\.encode(packed)?\s*\(", 0.5),
    (Domain::Utility, r"\bpure\b", 0.5),
];

const SECURITY_TABLE: &[(SecurityPattern, &str, f64)] = &[
    (SecurityPattern::LowLevelCall, r"\.call\s*\{\s*value", 1.0),
    (SecurityPattern::LowLevelCall, r"\.call\s*\(", 1.0),
    (SecurityPattern::Delegatecall, r"\.delegatecall\s*\(", 1.0),
    (SecurityPattern::Selfdestruct, r"\bselfdestruct\s*\(|\bsuicide\s*\(", 1.0),
    (SecurityPattern::TxOrigin, r"\btx\.origin\b", 1.0),
    (SecurityPattern::OracleDependency, r"latestrounddata|getprice|\btwap\b|pricefeed|consult\s*\(", 1.0),
    (SecurityPattern::SignatureVerification, r"\becrecover\s*\(|ecdsa\.|signaturechecker", 1.0),
    (SecurityPattern::InlineAssembly, r"\bassembly\s*(\(|\{)", 1.0),
    (SecurityPattern::UncheckedArithmetic, r"\bunchecked\s*\{", 1.0),
    (SecurityPattern::PayableSurface, r"\bpayable\b", 1.0),
    (SecurityPattern::TimestampDependence, r"\bblock\.timestamp\b|\bnow\s*[-+*/<>=!;),\]]", 1.0),
    (SecurityPattern::AccessControl, r"\bonly(owner|role|admin|governance|minter)\b", 1.0),
    (SecurityPattern::AccessControl, r"\bownable\b|accesscontrol|hasrole\s*\(", 1.0),
];

const MOCK_FEATURE_TABLE: &[(MockFeature, &str, f64)] = &[
    (MockFeature::ConfigurableFailure, r"\b_?should_?(fail|revert)\w*", 1.0),
    (MockFeature::ConfigurableFailure, r"\bset_?(should)?_?(fail|revert)\w*\s*\(", 1.0),
    (MockFeature::ConfigurableFailure, r"\b(fail|revert)_?(on|when|mode|next)\w*", 1.0),
    (MockFeature::ConfigurableFailure, r"\bforce_?(fail|revert)\w*", 1.0),
    (MockFeature::StateTracking, r"\bmapping\s*\(", 1.0),
    (MockFeature::StateTracking, r"\+\+|\+=|-=", 1.0),
    (MockFeature::StateTracking, r"\.push\s*\(", 1.0),
    (MockFeature::ParameterizableReturns, r"\bfunction\s+set_?[a-z0-9_]*\s*\(", 1.0),
    (MockFeature::ParameterizableReturns, r"\b(mock|next|_)?return_?(value|data)\w*", 1.0),
    (MockFeature::LatencySimulation, r"\bblock\.(timestamp|number)\b", 1.0),
    (MockFeature::LatencySimulation, r"\bdelay\w*|\bpending\w*|\bqueue\w*", 1.0),
    (MockFeature::LatencySimulation, r"updatedat|lastupdate\w*|\bstale\w*", 1.0),
    (MockFeature::CallEchoing, r"\bemit\s+\w+\s*\(", 1.0),
    (MockFeature::CallEchoing, r"\blast_?(caller|call|sender|amount)\w*|callcount|calls\.push", 1.0),
    (MockFeature::CallEchoing, r"\bmsg\.data\b", 1.0),
];

/// (domain, id, description, signatures) for test patterns a domain is expected to have
const TEST_EXPECTATION_TABLE: &[(Domain, &str, &str, &[&str])] = &[
    (Domain::Defi, "reentrancy", "reentrancy attack scenario", &[r"reentr"]),
    (Domain::Defi, "slippage", "slippage / minimum-output protection", &[r"slippage", r"amountoutmin|minamountout|minout"]),
    (Domain::Defi, "flash-loan", "flash-loan interaction", &[r"flash"]),
    (Domain::Defi, "oracle-manipulation", "oracle price manipulation", &[r"oracle", r"manipulat", r"stale_?price"]),
    (Domain::Defi, "rounding", "rounding / precision loss", &[r"rounding", r"precision", r"dust"]),
    (Domain::Nft, "approval", "operator approvals", &[r"approv"]),
    (Domain::Nft, "safe-transfer", "safe transfer to receiver contracts", &[r"onerc721received|onerc1155received", r"safetransferfrom"]),
    (Domain::Nft, "token-uri", "metadata URI", &[r"tokenuri|baseuri"]),
    (Domain::Nft, "supply-cap", "maximum supply", &[r"maxsupply|max_supply|supplycap"]),
    (Domain::Governance, "quorum", "quorum thresholds", &[r"quorum"]),
    (Domain::Governance, "timelock", "timelock / queued execution", &[r"timelock", r"\bqueue"]),
    (Domain::Governance, "double-vote", "double voting prevention", &[r"double_?vot", r"alreadyvoted|hasvoted"]),
    (Domain::Governance, "proposal-lifecycle", "proposal execution and cancellation", &[r"\bexecute", r"\bcancel"]),
    (Domain::Bridge, "replay", "message replay protection", &[r"replay", r"\bnonce", r"processed|consumed"]),
    (Domain::Bridge, "signature", "signature validation", &[r"signature|ecrecover|\bsign\b"]),
    (Domain::Bridge, "message-validation", "invalid message / proof rejection", &[r"invalid_?(proof|message|root)", r"merkle"]),
    (Domain::Token, "allowance", "allowance handling", &[r"allowance", r"approve"]),
    (Domain::Token, "zero-address", "transfers involving the zero address", &[r"address\s*\(\s*0\s*\)", r"zero_?address"]),
    (Domain::Token, "supply-accounting", "total supply accounting", &[r"totalsupply"]),
    (Domain::Gaming, "randomness", "randomness source", &[r"random|\bvrf\b"]),
    (Domain::Gaming, "rewards", "reward distribution", &[r"reward|claim|payout"]),
];

const INVARIANT_MARKERS: &[&str] = &[
    r"\bstdinvariant\b",
    r"\binvarianttest\b",
    r"\btargetcontract\s*\(",
    r"\btargetselector\s*\(",
    r"\bexcludecontract\s*\(",
    r"\bfunction\s+invariant_?\w*\s*\(",
    r"\bfunction\s+statefulfuzz_?\w*\s*\(",
];

const SECURITY_SUITE_MARKERS: &[&str] = &[
    r"security",
    r"attack",
    r"exploit",
    r"adversar",
    r"audit",
    r"\bpoc\b|_poc|poc_",
    r"reentranc",
    r"hack",
];

// ---------- Compiled form ----------

/// One compiled signature
#[derive(Debug, Clone)]
pub struct Signature {
    pub pattern: Regex,
    pub weight: f64,
}

/// A named set of weighted signatures
#[derive(Debug, Clone)]
pub struct PatternCategory<K> {
    pub key: K,
    pub signatures: Vec<Signature>,
}

/// Result of matching one category against a text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryHits {
    /// Number of distinct signatures that matched at least once
    pub distinct: usize,
    /// Sum of weights of the distinct signatures that matched
    pub score: f64,
    /// Source text of the matched signatures, in table order
    pub matched: Vec<String>,
}

impl<K> PatternCategory<K> {
    /// Count distinct signature hits. `text` must already be lower-cased.
    pub fn hits(&self, text: &str) -> CategoryHits {
        let mut hits = CategoryHits::default();
        for sig in &self.signatures {
            if sig.pattern.is_match(text) {
                hits.distinct += 1;
                hits.score += sig.weight;
                hits.matched.push(sig.pattern.as_str().to_string());
            }
        }
        hits
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.signatures.iter().any(|s| s.pattern.is_match(text))
    }
}

/// A domain-expected test pattern
#[derive(Debug, Clone)]
pub struct TestExpectation {
    pub domain: Domain,
    pub id: &'static str,
    pub description: &'static str,
    pub category: PatternCategory<&'static str>,
}

/// Immutable, versioned pattern tables shared by all components
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    pub version: String,
    pub domains: Vec<PatternCategory<Domain>>,
    pub security: Vec<PatternCategory<SecurityPattern>>,
    pub mock_features: Vec<PatternCategory<MockFeature>>,
    pub test_expectations: Vec<TestExpectation>,
    pub invariant_markers: Vec<Regex>,
    pub security_suite_markers: Vec<Regex>,
}

impl PatternLibrary {
    /// Build the library from the built-in tables
    pub fn builtin() -> Self {
        PatternLibrary {
            version: LIBRARY_VERSION.to_string(),
            domains: group_table(DOMAIN_TABLE),
            security: group_table(SECURITY_TABLE),
            mock_features: group_table(MOCK_FEATURE_TABLE),
            test_expectations: TEST_EXPECTATION_TABLE
                .iter()
                .map(|(domain, id, description, sigs)| TestExpectation {
                    domain: *domain,
                    id,
                    description,
                    category: PatternCategory {
                        key: *id,
                        signatures: sigs
                            .iter()
                            .map(|p| Signature {
                                pattern: compile(p),
                                weight: 1.0,
                            })
                            .collect(),
                    },
                })
                .collect(),
            invariant_markers: INVARIANT_MARKERS.iter().map(|p| compile(p)).collect(),
            security_suite_markers: SECURITY_SUITE_MARKERS.iter().map(|p| compile(p)).collect(),
        }
    }

    /// Expected test patterns for a domain, in table order
    pub fn expectations_for(&self, domain: Domain) -> impl Iterator<Item = &TestExpectation> {
        self.test_expectations
            .iter()
            .filter(move |e| e.domain == domain)
    }

    /// True if lower-cased `text` contains an invariant-runner marker
    pub fn has_invariant_marker(&self, text: &str) -> bool {
        self.invariant_markers.iter().any(|re| re.is_match(text))
    }

    /// True if a lower-cased path or file name denotes a security-focused suite
    pub fn is_security_suite(&self, path: &str) -> bool {
        self.security_suite_markers.iter().any(|re| re.is_match(path))
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Group a flat (category, signature, weight) table into categories, keeping
/// first-appearance order of categories and table order of signatures.
fn group_table<K: Copy + PartialEq>(table: &[(K, &str, f64)]) -> Vec<PatternCategory<K>> {
    let mut categories: Vec<PatternCategory<K>> = Vec::new();
    for (key, pattern, weight) in table {
        let sig = Signature {
            pattern: compile(pattern),
            weight: *weight,
        };
        match categories.iter_mut().find(|c| c.key == *key) {
            Some(cat) => cat.signatures.push(sig),
            None => categories.push(PatternCategory {
                key: *key,
                signatures: vec![sig],
            }),
        }
    }
    categories
}

fn compile(pattern: &str) -> Regex {
    // Built-in tables are covered by `builtin_tables_compile`.
    Regex::new(&pattern.to_ascii_lowercase()).expect("built-in signature must compile")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tables_compile() {
        let lib = PatternLibrary::builtin();
        assert_eq!(lib.version, LIBRARY_VERSION);
        assert_eq!(lib.domains.len(), 7, "one category per classifiable domain");
        assert_eq!(lib.security.len(), SecurityPattern::ALL.len());
        assert_eq!(lib.mock_features.len(), MockFeature::COUNT);
    }

    #[test]
    fn domain_categories_follow_table_order() {
        let lib = PatternLibrary::builtin();
        let keys: Vec<Domain> = lib.domains.iter().map(|c| c.key).collect();
        assert_eq!(
            keys,
            vec![
                Domain::Defi,
                Domain::Nft,
                Domain::Governance,
                Domain::Bridge,
                Domain::Token,
                Domain::Gaming,
                Domain::Utility,
            ]
        );
    }

    #[test]
    fn hits_count_distinct_signatures_not_occurrences() {
        let lib = PatternLibrary::builtin();
        let defi = lib.domains.iter().find(|c| c.key == Domain::Defi).unwrap();
        let once = defi.hits("function swap() {}");
        let many = defi.hits("swap swap swap swap swap");
        assert_eq!(once.distinct, 1);
        assert_eq!(many.distinct, 1);
        assert_eq!(once.score, many.score);
    }

    #[test]
    fn uppercase_signatures_are_normalised() {
        // `mulDiv` is written camel-case in the table but must match lower-cased text.
        let lib = PatternLibrary::builtin();
        let utility = lib.domains.iter().find(|c| c.key == Domain::Utility).unwrap();
        assert!(utility.is_match("return fullmath.muldiv(a, b, c);"));
    }

    #[test]
    fn expectations_for_utility_is_empty() {
        let lib = PatternLibrary::builtin();
        assert_eq!(lib.expectations_for(Domain::Utility).count(), 0);
        assert!(lib.expectations_for(Domain::Defi).count() >= 4);
    }

    #[test]
    fn invariant_and_security_markers() {
        let lib = PatternLibrary::builtin();
        assert!(lib.has_invariant_marker("contract vaultinvariants is stdinvariant, test {"));
        assert!(lib.has_invariant_marker("targetcontract(address(handler));"));
        assert!(!lib.has_invariant_marker("function test_deposit() public {}"));
        assert!(lib.is_security_suite("test/security/reentrancyattack.t.sol"));
        assert!(!lib.is_security_suite("test/vault.t.sol"));
    }

    #[test]
    fn timestamp_signature_ignores_now_in_words_and_strings() {
        let lib = PatternLibrary::builtin();
        let ts = lib
            .security
            .iter()
            .find(|c| c.key == SecurityPattern::TimestampDependence)
            .unwrap();
        assert!(ts.is_match("require(now >= deadline);"));
        assert!(ts.is_match("uint t = now;"));
        assert!(ts.is_match("return block.timestamp + 1;"));
        assert!(!ts.is_match(r#"emit log("now");"#));
        assert!(!ts.is_match(r#"string memory s = "as of now we accept deposits";"#));
        assert!(!ts.is_match("uint knownow_value = 1;"));
    }

    #[test]
    fn security_weights_rank_external_calls_above_access_control() {
        assert!(
            SecurityPattern::LowLevelCall.default_weight()
                > SecurityPattern::AccessControl.default_weight()
        );
    }

    #[test]
    fn domain_parse_round_trips_names() {
        for d in DEFAULT_DOMAIN_PRIORITY {
            assert_eq!(Domain::parse(d.as_str()), Some(d));
        }
        assert_eq!(Domain::parse("nonsense"), None);
    }
}
