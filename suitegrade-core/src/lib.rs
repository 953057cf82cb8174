//! Suitegrade core library - smart-contract test suite quality analysis

#![deny(warnings)]

// Global invariants enforced in this crate:
// - No global mutable state; pattern tables are passed in by reference
// - Files are sorted before processing and every output list has an explicit order
// - Parallel stages preserve input order, so results do not depend on scheduling
// - A bad file or a failed toolchain run degrades the report, never aborts it
// - Identical input yields byte-for-byte identical output

pub mod classify;
pub mod config;
pub mod detectors;
pub mod error;
pub mod filter;
pub mod findings;
pub mod mapper;
pub mod mocks;
pub mod patterns;
pub mod report;
pub mod risk;
pub mod source;
pub mod toolchain;

pub use config::ResolvedConfig;
pub use error::{Diagnostic, InputError, ToolchainError};
pub use patterns::PatternLibrary;
pub use report::{render_json, render_text, Report};
pub use toolchain::{CommandRunner, ExecutionStatus, RunOutput, TestRunner};

use anyhow::{Context, Result};
use detectors::{AnalyzedContract, DetectorInput};
use filter::FilterContext;
use mapper::ProductionIndex;
use rayon::prelude::*;
use report::{ContractReport, ReportParts};
use source::{SourceUnit, UnitRole};
use std::path::{Path, PathBuf};

/// Analyze the Solidity project at `root`.
///
/// When `runner` is given it is invoked once in `root`; its outcome only adds
/// an execution status and coverage data to the static results.
pub fn analyze_project(
    root: &Path,
    config: &ResolvedConfig,
    runner: Option<&dyn TestRunner>,
) -> Result<Report> {
    analyze_path(root, root, config, runner)
}

/// Analyze `path` (a file or a directory) inside the project at `project_root`.
///
/// Report keys and include/exclude globs are relative to `project_root`, and
/// the runner is invoked there. Only an unreadable `path` is an error; bad
/// entries below it become diagnostics.
pub fn analyze_path(
    path: &Path,
    project_root: &Path,
    config: &ResolvedConfig,
    runner: Option<&dyn TestRunner>,
) -> Result<Report> {
    let mut diagnostics = Vec::new();
    let files = collect_source_files(path, &mut diagnostics)?;
    let mut sources = Vec::new();

    for file in files {
        let relative = match file.strip_prefix(project_root) {
            Ok(r) if !r.as_os_str().is_empty() => r,
            _ => file.as_path(),
        };
        if !config.should_include(relative) {
            continue;
        }
        match read_source(&file) {
            Ok(text) => sources.push((display_path(relative), text)),
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "skipping unreadable source");
                diagnostics.push(Diagnostic::input(&e));
            }
        }
    }
    tracing::debug!(files = sources.len(), skipped = diagnostics.len(), "sources collected");

    let run = runner.map(|r| r.run(project_root));
    if let Some(Err(e)) = &run {
        tracing::warn!(error = %e, "toolchain run failed; reporting static results only");
        diagnostics.push(Diagnostic::toolchain(e));
    }

    Ok(run_pipeline(sources, config, run.as_ref(), diagnostics))
}

/// Analyze in-memory `(path, text)` sources without running a toolchain
pub fn analyze_sources(sources: Vec<(String, String)>, config: &ResolvedConfig) -> Report {
    run_pipeline(sources, config, None, Vec::new())
}

/// Analyze in-memory sources with the result of an earlier toolchain run
pub fn analyze_sources_with_run(
    sources: Vec<(String, String)>,
    config: &ResolvedConfig,
    run: &std::result::Result<RunOutput, ToolchainError>,
) -> Report {
    let diagnostics = match run {
        Err(e) => vec![Diagnostic::toolchain(e)],
        Ok(_) => Vec::new(),
    };
    run_pipeline(sources, config, Some(run), diagnostics)
}

fn run_pipeline(
    mut sources: Vec<(String, String)>,
    config: &ResolvedConfig,
    run: Option<&std::result::Result<RunOutput, ToolchainError>>,
    mut diagnostics: Vec<Diagnostic>,
) -> Report {
    let library = PatternLibrary::builtin();
    sources.sort_by(|a, b| a.0.cmp(&b.0));
    sources.dedup_by(|a, b| a.0 == b.0);

    let units: Vec<SourceUnit> = sources
        .par_iter()
        .map(|(path, text)| SourceUnit::parse(path, text))
        .collect();

    // Classification and risk are per-file and independent
    let contract_units: Vec<&SourceUnit> = units.iter().filter(|u| u.role == UnitRole::Contract).collect();
    let scored: Vec<ContractReport> = contract_units
        .par_iter()
        .map(|unit| {
            let classification = classify::classify_lowered(&unit.lowered, &library, &config.classifier);
            let risk = risk::score_with_config(
                unit,
                &classification,
                &config.risk_weights,
                &config.risk_thresholds,
            );
            ContractReport {
                file: unit.path.clone(),
                contracts: unit.contracts.iter().map(|c| c.name.clone()).collect(),
                classification,
                risk,
            }
        })
        .collect();

    for c in scored.iter().filter(|c| c.classification.ambiguous) {
        diagnostics.push(Diagnostic::ambiguous(&c.file));
    }

    let project = classify::classify_project(
        scored.iter().map(|c| (c.file.as_str(), &c.classification)),
        &config.classifier,
    );

    // Join barrier: tests are grouped by target across every test file
    let test_units: Vec<&SourceUnit> = units.iter().filter(|u| u.role == UnitRole::Test).collect();
    let index = ProductionIndex::new(contract_units.iter().flat_map(|u| u.function_names()));
    let test_map = mapper::build_groups(&test_units, &index, &library, &config.mapper);

    let all_units: Vec<&SourceUnit> = units.iter().collect();
    let mocks = mocks::score_mocks(&all_units, &test_units, &library);

    let execution_status = toolchain::execution_status(run);
    let line_coverage = match run {
        Some(Ok(out)) => Some(&out.per_file_coverage),
        _ => None,
    };

    let analyzed: Vec<AnalyzedContract> = contract_units
        .iter()
        .zip(&scored)
        .map(|(unit, c)| AnalyzedContract {
            unit,
            classification: &c.classification,
            risk: &c.risk,
        })
        .collect();

    let candidates = detectors::detect(&DetectorInput {
        contracts: &analyzed,
        test_map: &test_map,
        mocks: &mocks,
        project_domain: project.domain,
        library: &library,
        execution_status,
        line_coverage,
        config: &config.detectors,
    });

    let findings = filter::filter(
        candidates,
        &FilterContext {
            test_map: &test_map,
            mocks: &mocks,
            classification: &project,
            test_units: &test_units,
            library: &library,
        },
        &config.filter,
    );
    let indicators = filter::compute_indicators(&test_map, &mocks, &config.filter);

    tracing::info!(
        contracts = scored.len(),
        tests = test_map.tests.len(),
        findings = findings.iter().filter(|f| !f.suppressed).count(),
        status = execution_status.as_str(),
        "analysis complete"
    );

    let test_count = test_map.tests.len();
    Report::assemble(ReportParts {
        pattern_library_version: library.version.clone(),
        execution_status,
        project_domain: project.domain,
        contracts: scored,
        coverage_groups: test_map.groups.into_values().collect(),
        unassigned_tests: test_map.unassigned,
        test_count,
        file_summaries: test_map.files.into_values().collect(),
        indicators: indicators.into_values().collect(),
        mock_profiles: mocks,
        findings,
        diagnostics,
    })
}

fn read_source(path: &Path) -> std::result::Result<String, InputError> {
    let bytes = std::fs::read(path).map_err(|source| InputError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| InputError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

/// Forward-slash path for report keys
fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Collect all `.sol` files from a path (file or directory), sorted
///
/// Unreadable entries below `path` are recorded in `diagnostics` and skipped.
fn collect_source_files(path: &Path, diagnostics: &mut Vec<Diagnostic>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if path.is_file() {
        if is_solidity_file(path) {
            files.push(path.to_path_buf());
        }
    } else if path.is_dir() {
        let entries = std::fs::read_dir(path)
            .with_context(|| format!("Failed to read directory: {}", path.display()))?;
        collect_entries(path, entries, &mut files, diagnostics);
    } else {
        anyhow::bail!("path does not exist: {}", path.display());
    }

    // Sort files for deterministic order
    files.sort();

    Ok(files)
}

fn is_solidity_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("sol")
}

/// Returns true for directory names that should not be traversed
fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || name == "node_modules" || name == "out" || name == "cache"
}

fn skip_entry(path: &Path, source: std::io::Error, diagnostics: &mut Vec<Diagnostic>) {
    let err = InputError::Unreadable {
        path: path.to_path_buf(),
        source,
    };
    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable entry");
    diagnostics.push(Diagnostic::input(&err));
}

/// Recursively collect `.sol` files from an opened directory
fn collect_entries(
    dir: &Path,
    entries: std::fs::ReadDir,
    files: &mut Vec<PathBuf>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for entry_result in entries {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => {
                skip_entry(dir, e, diagnostics);
                continue;
            }
        };
        let path = entry.path();
        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                skip_entry(&path, e, diagnostics);
                continue;
            }
        };

        if metadata.is_symlink() {
            continue;
        }
        if metadata.is_dir() {
            let skipped = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_skipped_dir);
            if skipped {
                continue;
            }
            match std::fs::read_dir(&path) {
                Ok(sub) => collect_entries(&path, sub, files, diagnostics),
                Err(e) => skip_entry(&path, e, diagnostics),
            }
        } else if metadata.is_file() && is_solidity_file(&path) {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn collects_sorted_solidity_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("test")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("src/B.sol"), "contract B {}").unwrap();
        fs::write(dir.path().join("src/A.sol"), "contract A {}").unwrap();
        fs::write(dir.path().join("src/notes.md"), "").unwrap();
        fs::write(dir.path().join(".git/X.sol"), "").unwrap();
        fs::write(dir.path().join("test/A.t.sol"), "").unwrap();

        let mut diagnostics = Vec::new();
        let files = collect_source_files(dir.path(), &mut diagnostics).unwrap();
        assert!(diagnostics.is_empty());
        let names: Vec<String> = files
            .iter()
            .map(|p| display_path(p.strip_prefix(dir.path()).unwrap()))
            .collect();
        assert_eq!(names, vec!["src/A.sol", "src/B.sol", "test/A.t.sol"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_source_files(&dir.path().join("nope"), &mut Vec::new()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_is_skipped_with_diagnostic() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("secret")).unwrap();
        fs::write(dir.path().join("src/A.sol"), "contract A {}").unwrap();
        fs::write(dir.path().join("secret/B.sol"), "contract B {}").unwrap();
        fs::set_permissions(dir.path().join("secret"), fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not stop root
        let locked = fs::read_dir(dir.path().join("secret")).is_err();
        let mut diagnostics = Vec::new();
        let files = collect_source_files(dir.path(), &mut diagnostics);
        fs::set_permissions(dir.path().join("secret"), fs::Permissions::from_mode(0o755)).unwrap();
        let files = files.unwrap();

        assert!(files.iter().any(|f| f.ends_with("src/A.sol")));
        if locked {
            assert_eq!(files.len(), 1);
            assert_eq!(diagnostics.len(), 1);
            assert!(diagnostics[0].file.as_deref().unwrap().ends_with("secret"));
        }
    }

    #[test]
    fn no_sources_gives_unknown_domain() {
        let report = analyze_sources(Vec::new(), &ResolvedConfig::defaults().unwrap());
        assert_eq!(report.project_domain, patterns::Domain::Unknown);
        assert!(report.contracts.is_empty());
        assert_eq!(report.execution_status, ExecutionStatus::NotExecuted);
    }
}
