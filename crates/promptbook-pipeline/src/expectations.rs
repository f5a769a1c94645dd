//! Text measurement and expectation checks.

use lazy_static::lazy_static;
use regex::Regex;

use promptbook_markdown::{ExpectFormat, ExpectationUnit};
use promptbook_types::{PromptbookError, Result, UsageCounts};

use crate::pipeline::{Expectations, PromptTemplate};

/// Characters per line before a line counts twice.
pub const CHARACTERS_PER_LINE: usize = 63;
pub const LINES_PER_PAGE: usize = 44;

lazy_static! {
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]+").unwrap();
    static ref PARAGRAPH_BREAK: Regex = Regex::new(r"\n\s*\n").unwrap();
}

pub fn count_characters(text: &str) -> usize {
    text.chars().count()
}

/// Words are maximal runs of alphanumeric characters.
pub fn count_words(text: &str) -> usize {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .count()
}

pub fn count_sentences(text: &str) -> usize {
    SENTENCE_END
        .split(text)
        .filter(|sentence| !sentence.trim().is_empty())
        .count()
}

/// Visual lines, wrapping each source line at [`CHARACTERS_PER_LINE`].
pub fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.split('\n')
        .map(|line| count_characters(line).div_ceil(CHARACTERS_PER_LINE).max(1))
        .sum()
}

pub fn count_paragraphs(text: &str) -> usize {
    PARAGRAPH_BREAK
        .split(text)
        .filter(|paragraph| !paragraph.trim().is_empty())
        .count()
}

pub fn count_pages(text: &str) -> usize {
    count_lines(text).div_ceil(LINES_PER_PAGE)
}

pub fn count(unit: ExpectationUnit, text: &str) -> usize {
    match unit {
        ExpectationUnit::Characters => count_characters(text),
        ExpectationUnit::Words => count_words(text),
        ExpectationUnit::Sentences => count_sentences(text),
        ExpectationUnit::Lines => count_lines(text),
        ExpectationUnit::Paragraphs => count_paragraphs(text),
        ExpectationUnit::Pages => count_pages(text),
    }
}

/// Measure `text` in every unit; token count is left to the tool.
pub fn measure_usage(text: &str) -> UsageCounts {
    UsageCounts {
        tokens_count: 0,
        characters_count: count_characters(text) as u64,
        words_count: count_words(text) as u64,
        sentences_count: count_sentences(text) as u64,
        lines_count: count_lines(text) as u64,
        paragraphs_count: count_paragraphs(text) as u64,
        pages_count: count_pages(text) as u64,
    }
}

/// Check `text` against quantitative expectations.
pub fn check_expectations(text: &str, expectations: &Expectations) -> Result<()> {
    for (unit, bounds) in expectations {
        let amount = count(*unit, text) as i64;
        if let Some(min) = bounds.min {
            if amount < min {
                return Err(PromptbookError::Expect(format!(
                    "Expected at least {min} {unit} but got {amount}"
                )));
            }
        }
        if let Some(max) = bounds.max {
            if amount > max {
                return Err(PromptbookError::Expect(format!(
                    "Expected at most {max} {unit} but got {amount}"
                )));
            }
        }
    }
    Ok(())
}

pub fn check_format(text: &str, format: Option<ExpectFormat>) -> Result<()> {
    match format {
        Some(ExpectFormat::Json) => serde_json::from_str::<serde_json::Value>(text)
            .map(|_| ())
            .map_err(|e| PromptbookError::Expect(format!("Expected valid JSON but got: {e}"))),
        None => Ok(()),
    }
}

/// Run every quality gate of `template` against `text`.
pub fn check_template(template: &PromptTemplate, text: &str) -> Result<()> {
    check_format(text, template.expect_format)?;
    check_expectations(text, &template.expectations)
}
