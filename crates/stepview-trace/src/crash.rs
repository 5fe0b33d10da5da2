//! Recognising uncaught-exception reports in captured program output.
//!
//! An exception that escapes `main` without being intercepted by the debug
//! protocol only shows up as the runtime's report on stderr:
//!
//! ```text
//! Exception in thread "main" java.lang.IllegalStateException: boom
//!     at Main.main(Main.java:4)
//! ```

pub const CRASH_PREFIX: &str = "Exception in thread ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrashReport {
    pub type_name: String,
    /// The report from the prefix onwards.
    pub traceback: String,
}

/// Parse a crash report out of `text`.
///
/// The report may start anywhere in `text`. Stdout and stderr share one cache,
/// so a prompt printed without a newline ends up glued in front of the report.
/// The traceback runs from the prefix to the end of `text`.
///
/// The type token is the first word after the thread name with any trailing
/// `:` removed, so `java.lang.Error: bad` yields `java.lang.Error` (the
/// convention recorded in DESIGN.md). Returns `None` when there is no prefix
/// or no type token after the thread name.
pub fn parse_crash_report(text: &str) -> Option<CrashReport> {
    let start = text.find(CRASH_PREFIX)?;
    let report = &text[start..];
    let rest = &report[CRASH_PREFIX.len()..];

    let after_thread = match rest.strip_prefix('"') {
        Some(quoted) => &quoted[quoted.find('"')? + 1..],
        None => &rest[rest.find(char::is_whitespace)?..],
    };
    let type_name = after_thread
        .lines()
        .next()?
        .split_whitespace()
        .next()?
        .trim_end_matches(':');
    if type_name.is_empty() {
        return None;
    }

    Some(CrashReport {
        type_name: type_name.to_string(),
        traceback: report.to_string(),
    })
}
