//! End-to-end analysis of the lending-vault fixture project

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use suitegrade_core::classify::{classify, classify_project, ClassifierSettings};
use suitegrade_core::filter::{filter, FilterConfig, FilterContext};
use suitegrade_core::findings::{Finding, FindingKind, Severity};
use suitegrade_core::mapper::{build_groups, MapperConfig, ProductionIndex};
use suitegrade_core::mocks::{score_mocks, Sophistication};
use suitegrade_core::patterns::{Domain, PatternLibrary};
use suitegrade_core::risk::RiskBand;
use suitegrade_core::source::{SourceUnit, UnitRole};
use suitegrade_core::{
    analyze_path, analyze_project, analyze_sources, render_json, render_text, ExecutionStatus, Report, ResolvedConfig, RunOutput,
    TestRunner, ToolchainError,
};

const INVARIANT_FILE: &str = "test/invariant/VaultInvariants.t.sol";

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn analyze_fixture(runner: Option<&dyn TestRunner>) -> Report {
    let config = ResolvedConfig::defaults().unwrap();
    analyze_project(&fixture_path("lending-vault"), &config, runner).unwrap()
}

fn finding<'a>(report: &'a Report, kind: FindingKind, target: &str) -> &'a Finding {
    report
        .findings
        .iter()
        .find(|f| f.kind == kind && f.target == target)
        .unwrap_or_else(|| panic!("no {} finding for {}", kind.as_str(), target))
}

/// Returns a canned result instead of spawning a process
struct FakeRunner(fn() -> Result<RunOutput, ToolchainError>);

impl TestRunner for FakeRunner {
    fn run(&self, _root: &Path) -> Result<RunOutput, ToolchainError> {
        (self.0)()
    }
}

/// Records the directory each run was started in
#[derive(Default)]
struct RecordingRunner(Mutex<Vec<PathBuf>>);

impl TestRunner for RecordingRunner {
    fn run(&self, root: &Path) -> Result<RunOutput, ToolchainError> {
        self.0.lock().unwrap().push(root.to_path_buf());
        Ok(RunOutput {
            exit_code: Some(0),
            ..RunOutput::default()
        })
    }
}

fn coverage_42() -> BTreeMap<String, f64> {
    BTreeMap::from([("src/LendingVault.sol".to_string(), 42.5)])
}

#[test]
fn test_project_classification_and_risk() {
    let report = analyze_fixture(None);
    assert_eq!(report.project_domain, Domain::Defi);
    assert_eq!(report.execution_status, ExecutionStatus::NotExecuted);
    assert_eq!(report.contracts.len(), 1);

    let vault = &report.contracts[0];
    assert_eq!(vault.file, "src/LendingVault.sol");
    assert_eq!(vault.classification.domain, Domain::Defi);
    assert!(!vault.classification.ambiguous);
    assert!(vault.risk.band >= RiskBand::High);
    assert!(vault.risk.value <= 1.0);
}

#[test]
fn test_negative_test_in_another_file_suppresses_finding() {
    let report = analyze_fixture(None);

    let withdraw = report.group("withdraw").unwrap();
    assert_eq!(withdraw.negative.len(), 1);
    assert_eq!(withdraw.negative[0].file, "test/LendingVaultReverts.t.sol");
    assert!(withdraw.positive.iter().any(|t| t.file == "test/LendingVault.t.sol"));

    let f = finding(&report, FindingKind::MissingNegativeTest, "withdraw");
    assert!(f.suppressed);
    assert_eq!(f.suppression_reason.as_deref(), Some("negative test exists"));
    assert!(f
        .evidence
        .iter()
        .any(|e| e.contains("test_withdraw_insufficientCollateral_reverts in test/LendingVaultReverts.t.sol")));

    // borrow has no negative test anywhere
    let borrow = finding(&report, FindingKind::MissingNegativeTest, "borrow");
    assert!(!borrow.suppressed);
}

fn split_withdraw_sources() -> Vec<(String, String)> {
    [
        (
            "src/Vault.sol",
            "contract Vault { uint256 collateral; function withdraw(uint256 amount) external { collateral -= amount; } }",
        ),
        (
            "test/VaultRevert.t.sol",
            "contract VaultRevertTest is Test { function test_withdraw_whenAmountZero_shouldRevert() public { vm.expectRevert(); vault.withdraw(0); } }",
        ),
        (
            "test/Vault.t.sol",
            "contract VaultTest is Test { function test_withdraw_whenValid_shouldSucceed() public { vault.withdraw(1); } }",
        ),
    ]
    .into_iter()
    .map(|(p, t)| (p.to_string(), t.to_string()))
    .collect()
}

#[test]
fn test_withdraw_tests_split_across_files_form_one_group() {
    let config = ResolvedConfig::defaults().unwrap();
    let report = analyze_sources(split_withdraw_sources(), &config);

    assert_eq!(report.coverage_groups.len(), 1);
    let group = report.group("withdraw").unwrap();
    assert_eq!(group.positive.len(), 1);
    assert_eq!(group.negative.len(), 1);
    assert!(group.coverage_score >= 0.7);

    let f = finding(&report, FindingKind::MissingNegativeTest, "withdraw");
    assert!(f.suppressed);
}

#[test]
fn test_source_order_does_not_change_output() {
    let config = ResolvedConfig::defaults().unwrap();
    let forward = render_json(&analyze_sources(split_withdraw_sources(), &config));
    let mut reversed_sources = split_withdraw_sources();
    reversed_sources.reverse();
    let reversed = render_json(&analyze_sources(reversed_sources, &config));
    assert_eq!(forward, reversed);
}

#[test]
fn test_invariant_suite_contradicts_zero_invariant_claim() {
    let root = fixture_path("lending-vault");
    let lib = PatternLibrary::builtin();
    let read = |rel: &str| SourceUnit::parse(rel, &std::fs::read_to_string(root.join(rel)).unwrap());

    let vault = read("src/LendingVault.sol");
    let tests = vec![
        read("test/LendingVault.t.sol"),
        read("test/LendingVaultReverts.t.sol"),
        read(INVARIANT_FILE),
    ];
    let mock_units = vec![read("test/mocks/MockERC20.sol"), read("test/mocks/MockPriceOracle.sol")];
    assert!(tests.iter().all(|u| u.role == UnitRole::Test));

    let test_refs: Vec<&SourceUnit> = tests.iter().collect();
    let mock_refs: Vec<&SourceUnit> = mock_units.iter().collect();
    let index = ProductionIndex::new(vault.function_names());
    let map = build_groups(&test_refs, &index, &lib, &MapperConfig::default());
    let mocks = score_mocks(&mock_refs, &test_refs, &lib);
    let class = classify(&vault.text, &lib);
    let project = classify_project([(vault.path.as_str(), &class)], &ClassifierSettings::default());

    let candidate = Finding::new(
        FindingKind::MissingInvariantTests,
        Severity::Medium,
        INVARIANT_FILE,
        "0 invariant tests",
    )
    .in_file(INVARIANT_FILE);

    let out = filter(
        vec![candidate],
        &FilterContext {
            test_map: &map,
            mocks: &mocks,
            classification: &project,
            test_units: &test_refs,
            library: &lib,
        },
        &FilterConfig::default(),
    );

    assert_eq!(out.len(), 1);
    assert!(out[0].suppressed);
    assert!(out[0]
        .evidence
        .iter()
        .any(|e| e.starts_with(&format!("15 invariant test(s) in {INVARIANT_FILE}"))));
}

#[test]
fn test_project_with_invariants_gets_no_invariant_candidate() {
    let report = analyze_fixture(None);
    assert!(!report
        .findings
        .iter()
        .any(|f| f.kind == FindingKind::MissingInvariantTests));
    let summary = report
        .test_files
        .iter()
        .find(|t| t.summary.file == INVARIANT_FILE)
        .unwrap();
    assert_eq!(summary.summary.distinct_tests, 15);
    assert!(summary.summary.invariant_marker);
    assert!(summary.sophistication > 0.6);
}

#[test]
fn test_sophisticated_file_gates_heuristic_findings() {
    let report = analyze_fixture(None);
    let f = finding(&report, FindingKind::UnconventionalTestNames, INVARIANT_FILE);
    assert!(f.suppressed);
    assert!(f
        .suppression_reason
        .as_deref()
        .unwrap()
        .starts_with("suite sophistication 0.75"));
}

#[test]
fn test_cheating_mock_is_reported() {
    let report = analyze_fixture(None);

    let oracle = report
        .mock_profiles
        .iter()
        .find(|m| m.contract == "MockPriceOracle")
        .unwrap();
    assert_eq!(oracle.sophistication, Sophistication::Trivial);
    assert!(oracle.unconditional_success);
    assert_eq!(oracle.usage_count, 20);

    let f = finding(&report, FindingKind::CheatingMock, "MockPriceOracle");
    assert!(!f.suppressed);
    assert_eq!(f.severity, Severity::High);

    let token = report
        .mock_profiles
        .iter()
        .find(|m| m.contract == "MockERC20")
        .unwrap();
    assert_eq!(token.sophistication, Sophistication::Advanced);
    assert!(token.state_tracking && token.configurable_failure && token.call_echoing);
    assert!(!report
        .findings
        .iter()
        .any(|f| f.kind == FindingKind::CheatingMock && f.target == "MockERC20"));
}

#[test]
fn test_untested_functions() {
    let report = analyze_fixture(None);
    let liquidate = finding(&report, FindingKind::UntestedFunction, "liquidate");
    assert!(!liquidate.suppressed);
    assert_eq!(liquidate.file.as_deref(), Some("src/LendingVault.sol"));
    assert!(!liquidate.suppressed);
    assert!(report
        .findings
        .iter()
        .any(|f| f.kind == FindingKind::UntestedFunction && f.target == "setOracle"));
    assert!(!report
        .findings
        .iter()
        .any(|f| f.kind == FindingKind::UntestedFunction && f.target == "deposit"));
    // view functions are not state-changing
    assert!(!report
        .findings
        .iter()
        .any(|f| f.kind == FindingKind::UntestedFunction && f.target == "healthFactor"));
}

#[test]
fn test_compile_failure_is_not_a_quality_finding() {
    let runner = FakeRunner(|| {
        Ok(RunOutput {
            exit_code: Some(1),
            stderr: "Error (7576): Undeclared identifier.\nCompiler run failed".to_string(),
            per_file_coverage: coverage_42(),
            ..RunOutput::default()
        })
    });
    let report = analyze_fixture(Some(&runner));

    assert_eq!(report.execution_status, ExecutionStatus::CompileFailed);
    assert!(!report
        .findings
        .iter()
        .any(|f| f.kind == FindingKind::LowLineCoverage));
    // Static results are still present
    assert_eq!(report.project_domain, Domain::Defi);
    assert!(report.group("withdraw").is_some());
    assert!(render_text(&report).contains("compile_failed"));
}

#[test]
fn test_passing_run_reports_low_coverage() {
    let runner = FakeRunner(|| {
        Ok(RunOutput {
            exit_code: Some(0),
            per_file_coverage: coverage_42(),
            ..RunOutput::default()
        })
    });
    let report = analyze_fixture(Some(&runner));

    assert_eq!(report.execution_status, ExecutionStatus::Passed);
    let f = finding(&report, FindingKind::LowLineCoverage, "src/LendingVault.sol");
    assert!(!f.suppressed);
}

#[test]
fn test_timed_out_run_keeps_static_results() {
    let runner = FakeRunner(|| Err(ToolchainError::TimedOut(Duration::from_secs(300))));
    let report = analyze_fixture(Some(&runner));

    assert_eq!(report.execution_status, ExecutionStatus::TimedOut);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.contracts.len(), 1);
    assert!(report.summary.tests > 0);
}

#[test]
fn test_output_is_deterministic() {
    let first = render_json(&analyze_fixture(None));
    let second = render_json(&analyze_fixture(None));
    assert_eq!(first, second);

    let parsed: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(parsed["schema_version"], 1);
    assert_eq!(parsed["project_domain"], "defi");
    assert_eq!(parsed["execution_status"], "not_executed");
}

#[test]
fn test_unreadable_file_becomes_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/Pool.sol"),
        "contract Pool { uint collateral; function borrow() external {} }",
    )
    .unwrap();
    std::fs::write(dir.path().join("src/Broken.sol"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

    let config = ResolvedConfig::defaults().unwrap();
    let report = analyze_project(dir.path(), &config, None).unwrap();
    assert_eq!(report.contracts.len(), 1);
    assert_eq!(report.contracts[0].file, "src/Pool.sol");
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.file.as_deref().is_some_and(|f| f.ends_with("Broken.sol"))));
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_becomes_diagnostic() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::create_dir_all(dir.path().join("secret")).unwrap();
    std::fs::write(
        dir.path().join("src/Pool.sol"),
        "contract Pool { uint collateral; function borrow() external {} }",
    )
    .unwrap();
    std::fs::write(dir.path().join("secret/Hidden.sol"), "contract Hidden {}").unwrap();
    let secret = dir.path().join("secret");
    std::fs::set_permissions(&secret, std::fs::Permissions::from_mode(0o000)).unwrap();
    let locked = std::fs::read_dir(&secret).is_err();

    let config = ResolvedConfig::defaults().unwrap();
    let report = analyze_project(dir.path(), &config, None);
    std::fs::set_permissions(&secret, std::fs::Permissions::from_mode(0o755)).unwrap();
    let report = report.unwrap();

    assert!(report.contracts.iter().any(|c| c.file == "src/Pool.sol"));
    if locked {
        assert_eq!(report.contracts.len(), 1);
        assert!(report
            .diagnostics
            .iter()
            .any(|d| d.file.as_deref().is_some_and(|f| f.ends_with("secret"))));
    }
}

#[test]
fn test_single_file_runs_toolchain_in_project_root() {
    let root = fixture_path("lending-vault");
    let file = root.join("src/LendingVault.sol");
    let runner = RecordingRunner::default();
    let config = ResolvedConfig::defaults().unwrap();

    let report = analyze_path(&file, &root, &config, Some(&runner)).unwrap();

    assert_eq!(*runner.0.lock().unwrap(), vec![root.clone()]);
    assert_eq!(report.execution_status, ExecutionStatus::Passed);
    assert_eq!(report.contracts.len(), 1);
    assert_eq!(report.contracts[0].file, "src/LendingVault.sol");
    assert!(report.diagnostics.is_empty());
}

#[test]
fn test_config_excludes_apply() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::create_dir_all(dir.path().join("lib/dep")).unwrap();
    std::fs::write(dir.path().join("src/A.sol"), "contract A { function f() external {} }").unwrap();
    std::fs::write(dir.path().join("lib/dep/B.sol"), "contract B { function g() external {} }").unwrap();
    std::fs::write(
        dir.path().join(".suitegraderc.json"),
        r#"{"classification": {"min_distinct_hits": 1}}"#,
    )
    .unwrap();

    let config = suitegrade_core::config::load_and_resolve(dir.path(), None).unwrap();
    assert_eq!(config.classifier.min_distinct_hits, 1);
    let report = analyze_project(dir.path(), &config, None).unwrap();
    let files: Vec<&str> = report.contracts.iter().map(|c| c.file.as_str()).collect();
    assert_eq!(files, vec!["src/A.sol"]);
}
