//! Named postprocessing functions applied to template results.
//!
//! The registry is filled once, then shared read-only between runs as
//! `Arc<PostprocessingRegistry>`.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use promptbook_types::{PromptbookError, Result};

/// A text transform. Failing with [`PromptbookError::Expect`] makes the
/// engine retry the template.
pub type PostprocessingFunction = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Names the default registry knows.
pub const BUILTIN_FUNCTIONS: &[&str] = &[
    "trim",
    "spaceTrim",
    "removeQuotes",
    "unwrapResult",
    "trimCodeBlock",
    "trimEndOfCodeBlock",
    "extractBlock",
    "removeMarkdownFormatting",
    "toUppercase",
    "toLowercase",
];

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[^\n]*\n(.*?)\n?```").unwrap();
    static ref RESULT_LABEL: Regex = Regex::new(r"^[\p{L} ]{1,30}:\s*(.+)$").unwrap();
    static ref STRONG_STAR: Regex = Regex::new(r"\*\*([^*\n]+)\*\*").unwrap();
    static ref STRONG_UNDERSCORE: Regex = Regex::new(r"__([^_\n]+)__").unwrap();
    static ref EM_STAR: Regex = Regex::new(r"\*([^*\s](?:[^*\n]*[^*\s])?)\*").unwrap();
    static ref EM_UNDERSCORE: Regex =
        Regex::new(r"(?m)(^|[^\w])_([^_\s](?:[^_\n]*[^_\s])?)_([^\w]|$)").unwrap();
    static ref INLINE_CODE: Regex = Regex::new(r"`([^`\n]+)`").unwrap();
    static ref HEADING_MARK: Regex = Regex::new(r"(?m)^#{1,6}\s+").unwrap();
}

// ---------------------------------------------------------------------------
// PostprocessingRegistry
// ---------------------------------------------------------------------------

pub struct PostprocessingRegistry {
    functions: HashMap<String, PostprocessingFunction>,
}

impl PostprocessingRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// A registry pre-loaded with every built-in function.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("trim", |text| Ok(text.trim().to_string()));
        registry.register("spaceTrim", |text| Ok(space_trim(text)));
        registry.register("removeQuotes", |text| Ok(remove_quotes(text)));
        registry.register("unwrapResult", |text| Ok(unwrap_result(text)));
        registry.register("trimCodeBlock", |text| Ok(trim_code_block(text)));
        registry.register("trimEndOfCodeBlock", |text| Ok(trim_end_of_code_block(text)));
        registry.register("extractBlock", extract_block);
        registry.register("removeMarkdownFormatting", |text| {
            Ok(remove_markdown_formatting(text))
        });
        registry.register("toUppercase", |text| Ok(text.to_uppercase()));
        registry.register("toLowercase", |text| Ok(text.to_lowercase()));
        registry
    }

    /// Register (or replace) a function under `name`.
    pub fn register<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<&PostprocessingFunction> {
        self.functions.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Apply the functions in order: `[f, g]` yields `g(f(text))`.
    pub fn apply_all(&self, names: &[String], text: &str) -> Result<String> {
        let mut result = text.to_string();
        for name in names {
            let function = self
                .get(name)
                .ok_or_else(|| PromptbookError::UnknownPostprocessing(name.clone()))?;
            result = function(&result)?;
        }
        Ok(result)
    }
}

impl Default for PostprocessingRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ---------------------------------------------------------------------------
// Built-in functions
// ---------------------------------------------------------------------------

/// Drop blank edge lines and the indentation common to all lines.
pub fn space_trim(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let (first, last) = match (first, last) {
        (Some(first), Some(last)) => (first, last),
        _ => return String::new(),
    };
    let body = &lines[first..=last];
    let indent = body
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);
    // indent counts chars; whitespace widths differ in bytes
    body.iter()
        .map(|l| {
            if l.trim().is_empty() {
                ""
            } else {
                let start = l.char_indices().nth(indent).map_or(l.len(), |(i, _)| i);
                l[start..].trim_end()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn remove_quotes(text: &str) -> String {
    let trimmed = text.trim();
    let pairs = [
        ('"', '"'),
        ('\'', '\''),
        ('“', '”'),
        ('„', '“'),
        ('«', '»'),
        ('`', '`'),
    ];
    for (open, close) in pairs {
        if let Some(inner) = trimmed
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Strip a short `Label:` prefix and wrapping quotes from a one-line answer.
pub fn unwrap_result(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.lines().count() != 1 {
        return trimmed.to_string();
    }
    let unlabeled = match RESULT_LABEL.captures(trimmed) {
        Some(caps) if is_quoted(&caps[1]) => caps[1].to_string(),
        _ => trimmed.to_string(),
    };
    remove_quotes(&unlabeled)
}

fn is_quoted(text: &str) -> bool {
    remove_quotes(text) != text.trim()
}

/// Remove the fence lines when the whole text is one code block.
pub fn trim_code_block(text: &str) -> String {
    let trimmed = text.trim();
    if !(trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() >= 6) {
        return text.to_string();
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() < 2 {
        return text.to_string();
    }
    lines[1..lines.len() - 1].join("\n")
}

/// Remove a dangling closing fence at the end of the text.
pub fn trim_end_of_code_block(text: &str) -> String {
    let trimmed = text.trim_end();
    match trimmed.strip_suffix("```") {
        Some(rest) => rest.trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Content of the first fenced code block.
pub fn extract_block(text: &str) -> Result<String> {
    FENCED_BLOCK
        .captures(text)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| PromptbookError::Expect("Expected a fenced code block in the result".into()))
}

/// Drop heading marks and paired emphasis or code delimiters.
pub fn remove_markdown_formatting(text: &str) -> String {
    let text = HEADING_MARK.replace_all(text, "");
    let text = STRONG_STAR.replace_all(&text, "$1");
    let text = STRONG_UNDERSCORE.replace_all(&text, "$1");
    let text = EM_STAR.replace_all(&text, "$1");
    let text = EM_UNDERSCORE.replace_all(&text, "${1}${2}${3}");
    INLINE_CODE.replace_all(&text, "$1").into_owned()
}
