//! `{name}` placeholder extraction and substitution.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use promptbook_types::{Parameters, PromptbookError, Result};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([a-z][A-Za-z0-9_]*)\}").unwrap();
}

/// Names of all `{name}` placeholders in `text`.
pub fn extract_parameter_names(text: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Replace every `{name}` placeholder with its value from `parameters`.
///
/// Fails on the first placeholder that has no value.
pub fn replace_parameters(template: &str, parameters: &Parameters) -> Result<String> {
    if let Some(missing) = PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .find(|name| !parameters.contains_key(name))
    {
        return Err(PromptbookError::Execution(format!(
            "Parameter {{{missing}}} is not defined"
        )));
    }

    Ok(PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            parameters
                .get(&caps[1])
                .cloned()
                .unwrap_or_default()
        })
        .into_owned())
}
