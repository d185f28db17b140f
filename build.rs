//! Embeds git and toolchain details for `booking-chat version`

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = git(&["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(unknown);
    let git_branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(unknown);
    let git_dirty = match git(&["status", "--porcelain"]) {
        Some(status) if !status.is_empty() => "true",
        Some(_) => "false",
        None => "unknown",
    };

    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env::var("TARGET").unwrap_or_else(|_| unknown());
    let profile = env::var("PROFILE").unwrap_or_else(|_| unknown());
    let rustc_version = command_output("rustc", &["--version"]).unwrap_or_else(unknown);

    let vars = [
        ("BOOKING_CHAT_GIT_HASH", git_hash.as_str()),
        ("BOOKING_CHAT_GIT_BRANCH", git_branch.as_str()),
        ("BOOKING_CHAT_GIT_DIRTY", git_dirty),
        ("BOOKING_CHAT_BUILD_TIMESTAMP", build_timestamp.as_str()),
        ("BOOKING_CHAT_TARGET", target.as_str()),
        ("BOOKING_CHAT_PROFILE", profile.as_str()),
        ("BOOKING_CHAT_RUSTC_VERSION", rustc_version.as_str()),
    ];
    for (key, value) in vars {
        println!("cargo:rustc-env={}={}", key, value);
    }
}

fn unknown() -> String {
    "unknown".to_string()
}

fn git(args: &[&str]) -> Option<String> {
    command_output("git", args)
}

/// Trimmed stdout of a successful command
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}
