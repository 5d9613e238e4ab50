//! Build script recording the source revision for startup logs

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    // Short hash, suffixed with -dirty when the controller was built from a modified tree
    let git_hash = git(&["describe", "--always", "--dirty", "--abbrev=8"])
        .unwrap_or_else(|| String::from("unknown"));

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);

    // Rerun when HEAD moves or the checked-out branch advances
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
