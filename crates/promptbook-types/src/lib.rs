//! Shared types, errors and usage accounting for the Promptbook pipeline engine.
//!
//! This crate provides the foundational types used across all other Promptbook crates:
//! - `PromptbookError`: unified error taxonomy (syntax, logic, execution)
//! - `Parameters`: the per-run parameter bag
//! - `Usage`: token/character/word/price accounting for tool calls

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Unified error type for all Promptbook subsystems.
#[derive(Debug, thiserror::Error)]
pub enum PromptbookError {
    // === Compile time ===
    #[error("Syntax error: {0}")]
    Syntax(String),

    // === Validation ===
    #[error("Logic error: {0}")]
    Logic(String),

    // === Run time ===
    #[error("{0}")]
    Execution(String),

    #[error("{0}")]
    Expect(String),

    #[error("Template '{template}' failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        template: String,
        attempts: usize,
        last_error: String,
    },

    #[error("Tool '{tool}' failed in template '{template}': {message}")]
    ToolFailed {
        tool: String,
        template: String,
        message: String,
    },

    #[error("Template '{template}' requires {capability}, but no such tool is configured")]
    MissingTool {
        template: String,
        capability: String,
    },

    #[error("Postprocessing function `{0}` is not registered")]
    UnknownPostprocessing(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// The three phases an error can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Syntax,
    Logic,
    Execution,
}

impl PromptbookError {
    /// Returns `true` if another attempt of the same template may succeed.
    ///
    /// Only unmet expectations are retried; tool failures are terminal for the run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PromptbookError::Expect(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PromptbookError::Syntax(_) | PromptbookError::Json(_) => ErrorKind::Syntax,
            PromptbookError::Logic(_) => ErrorKind::Logic,
            _ => ErrorKind::Execution,
        }
    }
}

/// A convenience alias for `Result<T, PromptbookError>`.
pub type Result<T> = std::result::Result<T, PromptbookError>;

/// Parameter bag: parameter name to its textual value.
pub type Parameters = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Usage accounting
// ---------------------------------------------------------------------------

/// Counts of one side (input or output) of a tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounts {
    pub tokens_count: u64,
    pub characters_count: u64,
    pub words_count: u64,
    pub sentences_count: u64,
    pub lines_count: u64,
    pub paragraphs_count: u64,
    pub pages_count: u64,
}

impl Add for UsageCounts {
    type Output = UsageCounts;

    fn add(self, other: UsageCounts) -> UsageCounts {
        UsageCounts {
            tokens_count: self.tokens_count + other.tokens_count,
            characters_count: self.characters_count + other.characters_count,
            words_count: self.words_count + other.words_count,
            sentences_count: self.sentences_count + other.sentences_count,
            lines_count: self.lines_count + other.lines_count,
            paragraphs_count: self.paragraphs_count + other.paragraphs_count,
            pages_count: self.pages_count + other.pages_count,
        }
    }
}

/// Usage of one or more tool calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Price in USD.
    pub price: f64,
    pub input: UsageCounts,
    pub output: UsageCounts,
}

impl Usage {
    /// Usage of no calls at all.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    /// Sum an iterator of usages.
    pub fn sum<'a>(usages: impl IntoIterator<Item = &'a Usage>) -> Usage {
        usages.into_iter().fold(Usage::zero(), |acc, u| acc + *u)
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, other: Usage) -> Usage {
        Usage {
            price: self.price + other.price,
            input: self.input + other.input,
            output: self.output + other.output,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Usage) {
        *self = *self + other;
    }
}
