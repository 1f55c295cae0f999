//! Commit-message templates for derive operations.
//!
//! Messages may embed placeholders that are filled from the operation's
//! [`ChangeReport`]:
//!
//! | placeholder | value |
//! |---|---|
//! | `{add_count}` | number of added paths |
//! | `{update_count}` | number of updated paths |
//! | `{delete_count}` | number of deleted paths |
//! | `{total_count}` | sum of the three |
//! | `{op}` | operation name, or empty when none was supplied |
//! | `{default}` | the auto-derived message (see [`default_message`]) |
//!
//! `{{` and `}}` escape literal braces. Unknown placeholders are an error,
//! not silently passed through.

use crate::error::{Error, Result};
use crate::types::ChangeReport;

/// The message used when no template is supplied.
///
/// A single added path yields `"+ <path>"`. Anything else yields
/// `"Batch[ <op>]: +N ~M -K"` with zero-count categories omitted, or
/// `"No changes"` for an empty report.
pub fn default_message(report: &ChangeReport, operation: Option<&str>) -> String {
    if report.total() == 0 {
        return "No changes".to_string();
    }
    if report.add.len() == 1 && report.update.is_empty() && report.delete.is_empty() {
        return format!("+ {}", report.add[0].path);
    }

    let mut parts = Vec::new();
    if !report.add.is_empty() {
        parts.push(format!("+{}", report.add.len()));
    }
    if !report.update.is_empty() {
        parts.push(format!("~{}", report.update.len()));
    }
    if !report.delete.is_empty() {
        parts.push(format!("-{}", report.delete.len()));
    }

    match operation {
        Some(op) => format!("Batch {}: {}", op, parts.join(" ")),
        None => format!("Batch: {}", parts.join(" ")),
    }
}

/// Expand `template` against `report`, or fall back to the auto message.
///
/// # Errors
/// [`Error::InvalidMessage`] for unknown placeholders or unbalanced braces.
pub fn format_commit_message(
    report: &ChangeReport,
    template: Option<&str>,
    operation: Option<&str>,
) -> Result<String> {
    let template = match template {
        Some(t) => t,
        None => return Ok(default_message(report, operation)),
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(Error::invalid_message(format!(
                                "unterminated placeholder in {:?}",
                                template
                            )));
                        }
                    }
                }
                match name.as_str() {
                    "add_count" => out.push_str(&report.add.len().to_string()),
                    "update_count" => out.push_str(&report.update.len().to_string()),
                    "delete_count" => out.push_str(&report.delete.len().to_string()),
                    "total_count" => out.push_str(&report.total().to_string()),
                    "op" => out.push_str(operation.unwrap_or("")),
                    "default" => out.push_str(&default_message(report, operation)),
                    _ => {
                        return Err(Error::invalid_message(format!(
                            "unknown placeholder {{{}}}",
                            name
                        )));
                    }
                }
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(Error::invalid_message(format!(
                        "single '}}' in {:?}",
                        template
                    )));
                }
            }
            _ => out.push(ch),
        }
    }

    Ok(out)
}
