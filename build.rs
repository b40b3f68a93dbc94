//! Stamps the agent binary with the source revision it was built from

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn main() {
    // Packaged builds have no .git; let the packager pass the revision in
    let revision = std::env::var("BEAM_AGENT_REVISION")
        .ok()
        .or_else(|| git(&["rev-parse", "--short", "HEAD"]))
        .unwrap_or_else(|| "unknown".to_string());

    let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
        .map(|s| !s.is_empty())
        .unwrap_or(false);

    let stamp = if dirty { format!("{revision}-dirty") } else { revision };
    println!("cargo:rustc-env=GIT_HASH={stamp}");
    println!("cargo:rerun-if-env-changed=BEAM_AGENT_REVISION");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
