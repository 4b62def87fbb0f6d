use std::env;
use std::process::Command;

const UNKNOWN: &str = "unknown";
const SHORT_COMMIT_LEN: usize = 7;

/// Provenance baked into `xlread --version`.
struct BuildStamp {
    commit_full: Option<String>,
    commit_short: Option<String>,
    date: Option<String>,
}

impl BuildStamp {
    fn collect() -> Self {
        // A CI-provided SHA takes precedence over the local checkout.
        let commit_full = env::var("GITHUB_SHA")
            .ok()
            .filter(|sha| !sha.is_empty())
            .or_else(|| git(&["rev-parse", "HEAD"]));
        let commit_short = match &commit_full {
            Some(full) => Some(full.chars().take(SHORT_COMMIT_LEN).collect()),
            None => git(&["rev-parse", "--short", "HEAD"]),
        };
        let date = git(&["log", "-1", "--format=%cI"]);
        Self { commit_full, commit_short, date }
    }

    fn emit(&self) {
        let fields = [
            ("XLREAD_BUILD_COMMIT", &self.commit_short),
            ("XLREAD_BUILD_COMMIT_FULL", &self.commit_full),
            ("XLREAD_BUILD_DATE", &self.date),
        ];
        for (key, value) in fields {
            println!("cargo:rustc-env={key}={}", value.as_deref().unwrap_or(UNKNOWN));
        }
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
    BuildStamp::collect().emit();
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
