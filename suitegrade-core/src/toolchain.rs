//! External compiler / test-runner interface
//!
//! Global invariants enforced:
//! - A failed or timed-out run never yields coverage numbers
//! - A compile failure is reported as such, never as a test-quality problem
//! - The runner is bounded by a timeout; the child is killed when it expires

use crate::error::ToolchainError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of the external run, as carried in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    NotExecuted,
    Passed,
    QualityIssue,
    CompileFailed,
    TimedOut,
    ToolchainFailed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::NotExecuted => "not_executed",
            ExecutionStatus::Passed => "passed",
            ExecutionStatus::QualityIssue => "quality_issue",
            ExecutionStatus::CompileFailed => "compile_failed",
            ExecutionStatus::TimedOut => "timed_out",
            ExecutionStatus::ToolchainFailed => "toolchain_failed",
        }
    }

    /// Only runs that actually executed the tests can support coverage claims
    pub fn allows_coverage_findings(&self) -> bool {
        matches!(self, ExecutionStatus::Passed | ExecutionStatus::QualityIssue)
    }
}

/// Captured result of one compile/test/coverage invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Line coverage percentage per file
    pub per_file_coverage: BTreeMap<String, f64>,
    pub duration: Duration,
}

/// Anything that can compile and test a project
pub trait TestRunner: Send + Sync {
    fn run(&self, root: &Path) -> Result<RunOutput, ToolchainError>;
}

/// Runs a configured command line in the project root
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRunner {
    pub command: Vec<String>,
    pub timeout: Duration,
}

impl CommandRunner {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        CommandRunner { command, timeout }
    }

    /// `forge coverage --report summary` with a five minute budget
    pub fn forge_coverage() -> Self {
        CommandRunner::new(
            vec![
                "forge".to_string(),
                "coverage".to_string(),
                "--report".to_string(),
                "summary".to_string(),
            ],
            Duration::from_secs(300),
        )
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(25);

impl TestRunner for CommandRunner {
    fn run(&self, root: &Path) -> Result<RunOutput, ToolchainError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(ToolchainError::EmptyCommand)?;

        let started = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolchainError::Spawn {
                program: program.clone(),
                source,
            })?;

        // Drain both pipes concurrently so a chatty child cannot block on a full pipe
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = match wait_with_timeout(&mut child, self.timeout, started) {
            Ok(status) => status,
            Err(e) => {
                if matches!(e, ToolchainError::TimedOut(_)) {
                    tracing::warn!(program = %program, timeout = ?self.timeout, "toolchain timed out; killing");
                } else {
                    tracing::warn!(program = %program, error = %e, "lost track of toolchain process; killing");
                }
                terminate(&mut child);
                return Err(e);
            }
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);
        let per_file_coverage = parse_coverage_table(&stdout);
        tracing::debug!(
            program = %program,
            exit_code = ?status.code(),
            coverage_rows = per_file_coverage.len(),
            "toolchain finished"
        );
        Ok(RunOutput {
            exit_code: status.code(),
            stdout,
            stderr,
            per_file_coverage,
            duration: started.elapsed(),
        })
    }
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    started: Instant,
) -> Result<ExitStatus, ToolchainError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if started.elapsed() >= timeout {
            return Err(ToolchainError::TimedOut(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill and reap the child; failures here are logged only
fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!(pid = child.id(), error = %e, "kill failed");
    }
    if let Err(e) = child.wait() {
        tracing::debug!(pid = child.id(), error = %e, "wait failed");
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// True if the output carries a compiler diagnostic
pub fn has_compile_error(output: &str) -> bool {
    static COMPILE_RE: OnceLock<Regex> = OnceLock::new();
    let re = COMPILE_RE.get_or_init(|| {
        Regex::new(r"Compiler run failed|\bError \(\d+\)|\b(ParserError|TypeError|DeclarationError)\b")
            .unwrap()
    });
    re.is_match(output)
}

/// Derive the report status from a run result; `None` means no run was attempted
pub fn execution_status(result: Option<&Result<RunOutput, ToolchainError>>) -> ExecutionStatus {
    match result {
        None => ExecutionStatus::NotExecuted,
        Some(Err(ToolchainError::TimedOut(_))) => ExecutionStatus::TimedOut,
        Some(Err(_)) => ExecutionStatus::ToolchainFailed,
        Some(Ok(out)) => match out.exit_code {
            None => ExecutionStatus::ToolchainFailed,
            Some(0) => ExecutionStatus::Passed,
            Some(_) if has_compile_error(&out.stdout) || has_compile_error(&out.stderr) => {
                ExecutionStatus::CompileFailed
            }
            Some(_) => ExecutionStatus::QualityIssue,
        },
    }
}

/// Parse Foundry-style coverage summary rows: `| src/Vault.sol | 85.71% (12/14) | ...`
///
/// Only the first percentage column (lines) is read; header and `Total` rows are skipped.
pub fn parse_coverage_table(stdout: &str) -> BTreeMap<String, f64> {
    static ROW_RE: OnceLock<Regex> = OnceLock::new();
    let re = ROW_RE.get_or_init(|| {
        Regex::new(r"(?m)^\|\s*([^|]+?)\s*\|\s*(\d+(?:\.\d+)?)%\s*\(\d+/\d+\)").unwrap()
    });
    let mut rows = BTreeMap::new();
    for caps in re.captures_iter(stdout) {
        let file = caps[1].trim();
        if file.eq_ignore_ascii_case("total") || file.eq_ignore_ascii_case("file") {
            continue;
        }
        if let Ok(pct) = caps[2].parse::<f64>() {
            rows.insert(file.to_string(), pct);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = "\
Analysing contracts...
| File              | % Lines        | % Statements   | % Branches    | % Funcs       |
|-------------------|----------------|----------------|---------------|---------------|
| src/Vault.sol     | 85.71% (12/14) | 86.67% (13/15) | 50.00% (1/2)  | 100.00% (4/4) |
| src/Oracle.sol    | 0.00% (0/3)    | 0.00% (0/3)    | 100.00% (0/0) | 0.00% (0/1)   |
| Total             | 70.59% (12/17) | 72.22% (13/18) | 50.00% (1/2)  | 80.00% (4/5)  |
";

    fn output(code: i32, stdout: &str, stderr: &str) -> RunOutput {
        RunOutput {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..RunOutput::default()
        }
    }

    #[test]
    fn parses_line_coverage_rows() {
        let rows = parse_coverage_table(SUMMARY);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows["src/Vault.sol"], 85.71);
        assert_eq!(rows["src/Oracle.sol"], 0.0);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(execution_status(None), ExecutionStatus::NotExecuted);
        assert_eq!(
            execution_status(Some(&Ok(output(0, SUMMARY, "")))),
            ExecutionStatus::Passed
        );
        assert_eq!(
            execution_status(Some(&Ok(output(1, "[FAIL. Reason: assertion failed]", "")))),
            ExecutionStatus::QualityIssue
        );
        assert_eq!(
            execution_status(Some(&Ok(output(
                1,
                "",
                "Error (7576): Undeclared identifier.\nCompiler run failed"
            )))),
            ExecutionStatus::CompileFailed
        );
        assert_eq!(
            execution_status(Some(&Err(ToolchainError::TimedOut(Duration::from_secs(1))))),
            ExecutionStatus::TimedOut
        );
        assert_eq!(
            execution_status(Some(&Err(ToolchainError::EmptyCommand))),
            ExecutionStatus::ToolchainFailed
        );
    }

    #[test]
    fn coverage_findings_gate() {
        assert!(ExecutionStatus::Passed.allows_coverage_findings());
        assert!(ExecutionStatus::QualityIssue.allows_coverage_findings());
        assert!(!ExecutionStatus::CompileFailed.allows_coverage_findings());
        assert!(!ExecutionStatus::TimedOut.allows_coverage_findings());
        assert!(!ExecutionStatus::NotExecuted.allows_coverage_findings());
    }

    #[test]
    fn empty_command_is_rejected() {
        let runner = CommandRunner::new(Vec::new(), Duration::from_secs(1));
        let err = runner.run(Path::new(".")).unwrap_err();
        assert!(matches!(err, ToolchainError::EmptyCommand));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let runner = CommandRunner::new(
            vec!["suitegrade-no-such-program".to_string()],
            Duration::from_secs(1),
        );
        let err = runner.run(Path::new(".")).unwrap_err();
        assert!(matches!(err, ToolchainError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_coverage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("summary.txt"), SUMMARY).unwrap();
        let runner = CommandRunner::new(
            vec!["sh".into(), "-c".into(), "cat summary.txt; echo warn >&2".into()],
            Duration::from_secs(10),
        );
        let out = runner.run(dir.path()).unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert!(out.stderr.contains("warn"));
        assert_eq!(out.per_file_coverage.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let runner = CommandRunner::new(
            vec!["sh".into(), "-c".into(), "sleep 5".into()],
            Duration::from_millis(100),
        );
        let result = runner.run(Path::new("."));
        assert!(matches!(result, Err(ToolchainError::TimedOut(_))));
        assert_eq!(execution_status(Some(&result)), ExecutionStatus::TimedOut);
    }

    #[cfg(unix)]
    #[test]
    fn timed_out_child_is_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(
            vec!["sh".into(), "-c".into(), "echo $$ > pid; exec sleep 5".into()],
            Duration::from_millis(500),
        );
        let result = runner.run(dir.path());
        assert!(matches!(result, Err(ToolchainError::TimedOut(_))));

        let pid = std::fs::read_to_string(dir.path().join("pid")).unwrap();
        // A zombie still answers signal 0, a reaped process does not
        let alive = Command::new("kill")
            .args(["-0", pid.trim()])
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(!alive.success());
    }
}
