//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod retry;

use regex::Regex;
use std::sync::OnceLock;

/// Render an error and its `source()` chain as a multi-line trace
///
/// This is the formatted form stored in per-layer error lists and in the
/// fatal exception of a failed publish task.
pub fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut trace = format!("Error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        trace.push_str(&format!("\nCaused by: {cause}"));
        source = cause.source();
    }
    trace
}

/// Turn a layer name into an identifier accepted by catalog servers
///
/// Anything other than ASCII letters, digits, `_`, `-` and `.` becomes `_`.
pub fn safe_name(name: &str) -> String {
    static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();

    let re = UNSAFE_CHARS
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("Invalid regex pattern"));

    let cleaned = re.replace_all(name.trim(), "_").to_string();
    if cleaned.is_empty() {
        String::from("_")
    } else {
        cleaned
    }
}

/// Sanitize filename by removing invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    static INVALID_CHARS: OnceLock<Regex> = OnceLock::new();

    let re =
        INVALID_CHARS.get_or_init(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("Invalid regex pattern"));

    re.replace_all(filename, "_").to_string()
}

/// Quote a PostgreSQL identifier
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
