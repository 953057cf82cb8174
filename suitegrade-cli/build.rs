// Injects SUITEGRADE_VERSION from `git describe`, falling back to the package version

use std::process::Command;

fn main() {
    let base = env!("CARGO_PKG_VERSION");
    let version = describe().map_or_else(|| base.to_string(), |d| version_from_describe(base, &d));

    println!("cargo:rustc-env=SUITEGRADE_VERSION={}", version);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/tags");
}

fn describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string())
}

/// `v0.2.0` and `v0.2.0-3-gabc123` both give `0.2.0`; an untagged `abc123`
/// gives `<base>-abc123`
fn version_from_describe(base: &str, described: &str) -> String {
    match described.strip_prefix('v') {
        Some(tagged) => tagged.split('-').next().unwrap_or(tagged).to_string(),
        None => format!("{}-{}", base, described),
    }
}
