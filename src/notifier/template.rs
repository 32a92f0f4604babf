//! Placeholder substitution for alert bodies
//!
//! Only `{{key}}` (optionally `{{ .key }}`) placeholders are recognised. There
//! are no conditionals, loops or filters.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("no value for placeholder {0:?}")]
    UnknownPlaceholder(String),
}

/// Substitute every placeholder in `text` with its entry in `values`
pub fn render(text: &str, values: &HashMap<String, String>) -> Result<String, RenderError> {
    if let Some(missing) = PLACEHOLDER
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .find(|key| !values.contains_key(key))
    {
        return Err(RenderError::UnknownPlaceholder(missing));
    }

    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures| {
        values.get(&caps[1]).cloned().unwrap_or_default()
    });

    Ok(rendered.into_owned())
}
