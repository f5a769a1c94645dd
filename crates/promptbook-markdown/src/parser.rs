use winnow::ascii::{digit1, space0};
use winnow::combinator::{alt, cut_err, delimited, eof, opt, preceded, terminated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{one_of, rest, take_while};
use winnow::{ModalResult, Parser};

use promptbook_types::{PromptbookError, Result};

use crate::command::*;

fn expected(desc: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(desc))
}

/// Trim a free-text value and drop one pair of wrapping backticks or quotes.
pub(crate) fn clean_value(raw: &str) -> String {
    let trimmed = raw.trim();
    for (open, close) in [('`', '`'), ('"', '"'), ('\'', '\'')] {
        if trimmed.len() >= 2 && trimmed.starts_with(open) && trimmed.ends_with(close) {
            return trimmed[1..trimmed.len() - 1].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A single keyword-like word, preceded by optional spaces.
fn word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    preceded(
        space0,
        take_while(1.., |c: char| c.is_alphanumeric() || c == '_'),
    )
    .parse_next(input)
}

/// Case-insensitive keyword matching a whole word.
fn keyword<'i>(expected: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    word.verify(move |w: &str| w.eq_ignore_ascii_case(expected))
}

/// `{name}` where name starts with a lowercase letter.
fn parameter_name(input: &mut &str) -> ModalResult<String> {
    preceded(
        space0,
        delimited(
            '{',
            (
                one_of('a'..='z'),
                take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
            )
                .take(),
            '}',
        ),
    )
    .map(String::from)
    .context(expected(
        "parameter name in curly braces starting with a lowercase letter",
    ))
    .parse_next(input)
}

/// Remainder of the line as a non-empty value.
fn value_text(input: &mut &str) -> ModalResult<String> {
    rest.verify_map(|raw: &str| {
        let value = clean_value(raw);
        (!value.is_empty()).then_some(value)
    })
    .parse_next(input)
}

/// Remainder of the line as an optional description.
fn description_text(input: &mut &str) -> ModalResult<Option<String>> {
    rest.map(|raw: &str| {
        let value = clean_value(raw);
        (!value.is_empty()).then_some(value)
    })
    .parse_next(input)
}

fn promptbook_command(input: &mut &str) -> ModalResult<Command> {
    preceded(
        keyword("PROMPTBOOK"),
        cut_err(
            alt((
                preceded(keyword("URL"), value_text).map(Command::PromptbookUrl),
                preceded(keyword("VERSION"), value_text).map(Command::PromptbookVersion),
            ))
            .context(expected("URL <url> or VERSION <version> after PROMPTBOOK")),
        ),
    )
    .parse_next(input)
}

fn model_command(input: &mut &str) -> ModalResult<Command> {
    preceded(
        keyword("MODEL"),
        cut_err(
            alt((
                preceded(keyword("VARIANT"), word.verify_map(ModelVariant::from_keyword))
                    .map(|variant| Command::Model(ModelCommand::Variant(variant))),
                preceded(keyword("NAME"), value_text)
                    .map(|name| Command::Model(ModelCommand::Name(name))),
            ))
            .context(expected("VARIANT <CHAT|COMPLETION> or NAME <model> after MODEL")),
        ),
    )
    .parse_next(input)
}

fn parameter_command(input: &mut &str) -> ModalResult<Command> {
    (
        opt(alt((
            keyword("INPUT").value(ParameterRole::Input),
            keyword("OUTPUT").value(ParameterRole::Output),
        ))),
        keyword("PARAMETER"),
        cut_err(parameter_name),
        description_text,
    )
        .map(|(role, _, name, description)| Command::Parameter {
            role: role.unwrap_or(ParameterRole::Intermediate),
            name,
            description,
        })
        .parse_next(input)
}

fn execution_command(input: &mut &str) -> ModalResult<Command> {
    preceded(
        opt(keyword("EXECUTE")),
        alt((
            (keyword("PROMPT"), keyword("TEMPLATE")).value(ExecutionType::PromptTemplate),
            (keyword("SIMPLE"), keyword("TEMPLATE")).value(ExecutionType::SimpleTemplate),
            keyword("SCRIPT").value(ExecutionType::Script),
            (keyword("PROMPT"), keyword("DIALOG")).value(ExecutionType::PromptDialog),
        )),
    )
    .map(Command::ExecutionType)
    .parse_next(input)
}

fn joker_command(input: &mut &str) -> ModalResult<Command> {
    preceded(keyword("JOKER"), cut_err(parameter_name))
        .map(Command::Joker)
        .parse_next(input)
}

fn postprocessing_command(input: &mut &str) -> ModalResult<Command> {
    preceded(
        alt((keyword("POSTPROCESSING"), keyword("POSTPROCESS"))),
        cut_err(
            value_text
                .verify(|name: &String| is_identifier(name))
                .context(expected("function name after POSTPROCESSING")),
        ),
    )
    .map(Command::Postprocessing)
    .parse_next(input)
}

fn expectation_sign(input: &mut &str) -> ModalResult<ExpectationSign> {
    alt((
        alt((keyword("MIN"), keyword("MINIMUM"))).value(ExpectationSign::Minimum),
        alt((keyword("MAX"), keyword("MAXIMUM"))).value(ExpectationSign::Maximum),
        keyword("EXACTLY").value(ExpectationSign::Exactly),
    ))
    .parse_next(input)
}

fn amount(input: &mut &str) -> ModalResult<i64> {
    preceded(space0, (opt('-'), digit1).take())
        .try_map(|digits: &str| digits.parse::<i64>())
        .parse_next(input)
}

fn expect_command(input: &mut &str) -> ModalResult<Command> {
    preceded(
        keyword("EXPECT"),
        cut_err(
            alt((
                (
                    expectation_sign,
                    amount,
                    word.verify_map(ExpectationUnit::from_keyword),
                )
                    .map(|(sign, amount, unit)| Command::Expect { sign, amount, unit }),
                word.verify_map(ExpectFormat::from_keyword)
                    .map(Command::ExpectFormat),
            ))
            .context(expected(
                "MIN|MAX|EXACTLY <n> <unit> or a format such as JSON after EXPECT",
            )),
        ),
    )
    .parse_next(input)
}

fn any_command(input: &mut &str) -> ModalResult<Command> {
    terminated(
        alt((
            promptbook_command,
            model_command,
            parameter_command,
            execution_command,
            joker_command,
            postprocessing_command,
            expect_command,
        )),
        (space0, eof),
    )
    .parse_next(input)
}

/// Parse one bullet-list line (without its list marker) into a [`Command`].
pub fn parse_command(line: &str) -> Result<Command> {
    let normalized = line.trim();
    let mut remaining = normalized;

    any_command.parse_next(&mut remaining).map_err(|e| match e {
        ErrMode::Cut(context) => {
            PromptbookError::Syntax(format!("Invalid command \"{normalized}\": {context}"))
        }
        _ => PromptbookError::Syntax(format!("Unknown command \"{normalized}\"")),
    })
}
