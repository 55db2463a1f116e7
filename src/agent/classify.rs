//! Heuristics for reading command output.
//!
//! Sandbox commands report failure through three channels that don't always
//! agree: exit codes, stderr noise, and error phrases buried in stdout.
//! Build tools routinely write progress and deprecation chatter to stderr,
//! so a non-empty stderr alone proves nothing.

use std::sync::LazyLock;

use regex::Regex;

use crate::sandbox::CommandOutput;

// Checked in order; the first match wins.
static ERROR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)error:",
        r"(?i)\bfailed\b",
        r"(?i)\bcannot\b",
        r"(?i)permission denied",
        r"(?i)no such file or directory",
        r"(?i)command not found",
        r"(?i)syntax error",
        r"(?i)compilation failed",
        r"(?i)build failed",
        r"(?i)npm err!",
        r"(?i)fatal:",
        r"(?i)\bexception\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

// Node's two spellings of a missing dependency.
static MISSING_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)cannot find module '([^']+)'"#).unwrap());
// The capture is anchored past "resolve" because the preceding "Can't"
// carries an apostrophe of its own.
static MODULE_NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)module not found.*?resolve '([^']+)'"#).unwrap());

/// Does this text contain a phrase that indicates a real failure?
pub fn contains_error_phrase(text: &str) -> bool {
    ERROR_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Decide whether a finished command actually failed.
///
/// A non-zero exit code is always a failure. With exit code zero, only an
/// error phrase in stdout or stderr counts; warning-only stderr is benign.
pub fn command_failed(output: &CommandOutput) -> bool {
    if output.exit_code != 0 {
        return true;
    }
    contains_error_phrase(&output.stdout) || contains_error_phrase(&output.stderr)
}

/// Extract the name of a missing npm module, if the output reports one.
/// Relative imports (starting with `.` or `/`) are project files, not
/// installable packages, and are skipped.
pub fn missing_module(text: &str) -> Option<String> {
    let name = MISSING_MODULE
        .captures(text)
        .or_else(|| MODULE_NOT_FOUND.captures(text))
        .map(|caps| caps[1].to_string())?;
    if name.starts_with('.') || name.starts_with('/') {
        return None;
    }
    Some(name)
}

/// One-line description of a failed command for the error log.
pub fn failure_digest(command: &str, output: &CommandOutput) -> String {
    let detail = if !output.stderr.trim().is_empty() {
        output.stderr.trim()
    } else {
        output.stdout.trim()
    };
    let mut line = detail.lines().find(|l| contains_error_phrase(l)).unwrap_or_else(|| {
        detail.lines().next().unwrap_or("no output")
    });
    // Truncate by characters, not bytes; slicing a byte index would panic
    // on multibyte output.
    if let Some((cut, _)) = line.char_indices().nth(200) {
        line = &line[..cut];
    }
    format!("Command `{}` failed (exit {}): {}", command, output.exit_code, line)
}
