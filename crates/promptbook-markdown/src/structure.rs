//! Two-level heading structure of a pipeline document and block extraction
//! for the body of each heading.

use std::ops::Range;

use lazy_static::lazy_static;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser, Tag, TagEnd};
use regex::Regex;
use serde::{Deserialize, Serialize};

use promptbook_types::{PromptbookError, Result};

lazy_static! {
    static ref COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref LIST_MARKER: Regex = Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s*").unwrap();
}

/// The pipeline header and one section per second-level heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownStructure {
    pub title: String,
    pub content: String,
    pub sections: Vec<MarkdownSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownSection {
    pub title: String,
    pub content: String,
}

/// A fenced code block found in a section body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub content: String,
}

/// The parts of a heading body the compiler cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionBlocks {
    pub description: Option<String>,
    pub commands: Vec<String>,
    pub code_blocks: Vec<CodeBlock>,
}

/// Remove `<!-- ... -->` comments.
pub fn strip_comments(source: &str) -> String {
    COMMENT.replace_all(source, "").into_owned()
}

struct Heading {
    level: HeadingLevel,
    title: String,
    range: Range<usize>,
}

fn collect_headings(source: &str) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut current: Option<Heading> = None;

    for (event, range) in Parser::new(source).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some(Heading {
                    level,
                    title: String::new(),
                    range,
                });
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(mut heading) = current.take() {
                    heading.title = heading.title.trim().to_string();
                    headings.push(heading);
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(heading) = current.as_mut() {
                    heading.title.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(heading) = current.as_mut() {
                    heading.title.push(' ');
                }
            }
            _ => {}
        }
    }
    headings
}

/// Split a pipeline document into its header and template sections.
///
/// Comments are stripped first. The document must open with exactly one
/// top-level heading and contain at least one second-level heading; no other
/// heading depth is allowed.
pub fn structure(source: &str) -> Result<MarkdownStructure> {
    let source = strip_comments(source);
    let headings = collect_headings(&source);

    if let Some(deep) = headings
        .iter()
        .find(|h| !matches!(h.level, HeadingLevel::H1 | HeadingLevel::H2))
    {
        return Err(PromptbookError::Syntax(format!(
            "markdown structure deepness must be 2, but heading \"{}\" is nested deeper",
            deep.title
        )));
    }

    let top_level = headings
        .iter()
        .filter(|h| h.level == HeadingLevel::H1)
        .count();
    if top_level != 1 {
        return Err(PromptbookError::Syntax(format!(
            "Pipeline must have exactly one top-level heading (# Title), found {top_level}"
        )));
    }

    let first = &headings[0];
    if first.level != HeadingLevel::H1 {
        return Err(PromptbookError::Syntax(format!(
            "Pipeline must start with its top-level heading, found \"## {}\" first",
            first.title
        )));
    }
    if !source[..first.range.start].trim().is_empty() {
        return Err(PromptbookError::Syntax(
            "Pipeline must start with its top-level heading, found text before it".into(),
        ));
    }
    if headings.len() < 2 {
        return Err(PromptbookError::Syntax(
            "Pipeline must contain at least one prompt template (## Heading)".into(),
        ));
    }

    let body = |index: usize| -> String {
        let start = headings[index].range.end;
        let end = headings
            .get(index + 1)
            .map(|next| next.range.start)
            .unwrap_or(source.len());
        source[start..end].trim().to_string()
    };

    let sections = (1..headings.len())
        .map(|index| MarkdownSection {
            title: headings[index].title.clone(),
            content: body(index),
        })
        .collect::<Vec<_>>();
    tracing::trace!(
        title = %first.title,
        sections = sections.len(),
        "structured pipeline document"
    );

    Ok(MarkdownStructure {
        title: first.title.clone(),
        content: body(0),
        sections,
    })
}

enum BlockKind {
    List,
    Code,
    Other,
}

/// Split a heading body into description, command lines and code blocks.
///
/// Only top-level blocks count: nested lists stay inside their parent item
/// and are not commands.
pub fn extract_blocks(content: &str) -> SectionBlocks {
    let mut blocks = SectionBlocks::default();
    let mut description_parts: Vec<&str> = Vec::new();

    let mut depth = 0usize;
    let mut block: Option<(BlockKind, usize)> = None;
    let mut item: Option<Range<usize>> = None;
    let mut code: Option<CodeBlock> = None;

    for (event, range) in Parser::new(content).into_offset_iter() {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    let kind = match &tag {
                        Tag::List(_) => BlockKind::List,
                        Tag::CodeBlock(CodeBlockKind::Fenced(info)) => {
                            let language = info
                                .split_whitespace()
                                .next()
                                .map(|lang| lang.to_string());
                            code = Some(CodeBlock {
                                language,
                                content: String::new(),
                            });
                            BlockKind::Code
                        }
                        _ => BlockKind::Other,
                    };
                    block = Some((kind, range.start));
                } else if depth == 1 && matches!(tag, Tag::Item) {
                    if let Some((BlockKind::List, _)) = block {
                        item = Some(range.clone());
                    }
                } else if depth == 2 && matches!(tag, Tag::List(_)) {
                    // nested list: cut the item text short
                    if let Some(current) = item.as_mut() {
                        current.end = range.start;
                    }
                }
                depth += 1;
            }
            Event::End(tag_end) => {
                depth = depth.saturating_sub(1);
                if depth == 1 && matches!(tag_end, TagEnd::Item) {
                    if let Some(item_range) = item.take() {
                        let line = command_line(&content[item_range]);
                        if !line.is_empty() {
                            blocks.commands.push(line);
                        }
                    }
                }
                if depth == 0 {
                    match block.take() {
                        Some((BlockKind::Code, _)) => {
                            if let Some(mut finished) = code.take() {
                                let trimmed_len = finished.content.trim_end_matches('\n').len();
                                finished.content.truncate(trimmed_len);
                                blocks.code_blocks.push(finished);
                            }
                        }
                        Some((BlockKind::Other, start)) => {
                            description_parts.push(content[start..range.end].trim());
                        }
                        _ => {}
                    }
                }
            }
            Event::Text(text) if depth == 1 => {
                if let Some(current) = code.as_mut() {
                    current.content.push_str(&text);
                }
            }
            Event::Rule if depth == 0 => {
                description_parts.push(content[range].trim());
            }
            _ => {}
        }
    }

    let description = description_parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !description.is_empty() {
        blocks.description = Some(description);
    }
    blocks
}

/// Source of one list item reduced to a single command line.
fn command_line(item_source: &str) -> String {
    let without_marker = LIST_MARKER.replace(item_source, "");
    without_marker
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
