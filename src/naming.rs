//! Structured output filename templates.
//!
//! Templates carry a closed set of named placeholders (`{series}`, `{title}`,
//! `{chapter}`, `{volume}`, `{index}`) with an optional zero-pad width on
//! `{index}` (e.g. `{index:03}`). Unknown placeholders are rejected when the
//! request is built, not silently passed through.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

/// Default template applied when a request names none.
pub const DEFAULT_TEMPLATE: &str = "{series} - Chapter {index:03}";

/// Placeholder fields a template may reference.
const KNOWN_FIELDS: &[&str] = &["series", "title", "chapter", "volume", "index"];

lazy_static! {
    static ref PLACEHOLDER_REGEX: Regex = Regex::new(r"\{([a-z]+)(?::0?(\d+))?\}").unwrap();
    /// Anything brace-delimited, to catch malformed placeholders too.
    static ref BRACE_REGEX: Regex = Regex::new(r"\{[^{}]*\}").unwrap();
}

/// Field values substituted into a naming template.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    pub series: String,
    pub title: String,
    pub chapter: String,
    pub volume: String,
    pub index: usize,
}

/// Checks that every placeholder in `template` names a known field.
pub fn validate_template(template: &str) -> Result<()> {
    for brace in BRACE_REGEX.find_iter(template) {
        let captures = PLACEHOLDER_REGEX
            .captures(brace.as_str())
            .filter(|c| c.get(0).map(|m| m.as_str()) == Some(brace.as_str()))
            .ok_or_else(|| {
                Error::Validation(format!("Malformed placeholder: {}", brace.as_str()))
            })?;
        let field = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        if !KNOWN_FIELDS.contains(&field) {
            return Err(Error::Validation(format!(
                "Unknown placeholder: {{{}}}",
                field
            )));
        }
    }

    // A stray brace forms no brace-delimited span, so catch it separately.
    let stripped = BRACE_REGEX.replace_all(template, "");
    if stripped.contains('{') || stripped.contains('}') {
        return Err(Error::Validation(format!(
            "Malformed placeholder: unbalanced braces in '{}'",
            template
        )));
    }
    Ok(())
}

/// Renders `template` with the given context.
///
/// Fails on unknown placeholders with the same error `validate_template`
/// reports, so rendering a validated template cannot fail.
pub fn render_template(template: &str, ctx: &NameContext) -> Result<String> {
    validate_template(template)?;

    let rendered = PLACEHOLDER_REGEX.replace_all(template, |caps: &regex::Captures| {
        let pad: usize = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        match &caps[1] {
            "series" => ctx.series.clone(),
            "title" => ctx.title.clone(),
            "chapter" => ctx.chapter.clone(),
            "volume" => ctx.volume.clone(),
            "index" => format!("{:0width$}", ctx.index, width = pad),
            _ => unreachable!("validated above"),
        }
    });

    Ok(rendered.trim().to_string())
}

/// Strips characters unsafe for cross-platform filenames.
///
/// Keeps alphanumerics, spaces, hyphens, underscores, and dots; everything
/// else is dropped. A name reduced to nothing becomes `"untitled"`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').to_string();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}
