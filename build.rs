use std::env;
use std::process::Command;

// Build number sources, most specific first.
const BUILD_VARS: &[&str] = &[
    "MASSPROBE_BUILD",
    "APP_BUILD",
    "GITHUB_RUN_NUMBER",
    "CI_PIPELINE_IID",
    "CIRCLE_BUILD_NUM",
    "BUILD_BUILDID",
    "BUILD_NUMBER",
];

fn from_env() -> Option<String> {
    BUILD_VARS
        .iter()
        .filter_map(|var| env::var(var).ok())
        .map(|val| val.trim().to_string())
        .find(|val| !val.is_empty())
}

fn from_git() -> Option<String> {
    let out = Command::new("git").args(["rev-list", "--count", "HEAD"]).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let count = String::from_utf8(out.stdout).ok()?.trim().to_string();
    (!count.is_empty()).then_some(count)
}

fn main() {
    for var in BUILD_VARS {
        println!("cargo:rerun-if-env-changed={var}");
    }
    println!("cargo:rerun-if-changed=.git/HEAD");

    let build = from_env().or_else(from_git).unwrap_or_else(|| "0".to_string());
    println!("cargo:rustc-env=APP_BUILD={build}");
}
