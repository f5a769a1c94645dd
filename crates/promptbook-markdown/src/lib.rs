//! Markdown front end for the Promptbook pipeline dialect.
//!
//! Splits a pipeline document into its header and `##` template sections,
//! extracts bullet-list commands and code blocks from each section, and parses
//! every command line into a typed [`Command`].
//!
//! # Example
//! ```
//! let doc = "# Greeting\n\n- INPUT PARAMETER {name}\n\n## Greet\n\n```\nHello {name}\n```\n\n`-> {greeting}`\n";
//! let structure = promptbook_markdown::structure(doc).unwrap();
//! assert_eq!(structure.title, "Greeting");
//! assert_eq!(structure.sections[0].title, "Greet");
//!
//! let command = promptbook_markdown::parse_command("EXPECT MIN 2 words").unwrap();
//! assert_eq!(command.to_string(), "EXPECT MIN 2 words");
//! ```

pub mod command;
mod parser;
pub mod structure;

pub use command::*;
pub use parser::parse_command;
pub use structure::{
    extract_blocks, strip_comments, structure, CodeBlock, MarkdownSection, MarkdownStructure,
    SectionBlocks,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn syntax_message(line: &str) -> String {
        parse_command(line).unwrap_err().to_string()
    }

    #[test]
    fn parse_promptbook_url() {
        let cmd = parse_command("PROMPTBOOK URL https://example.com/article.ptbk.md").unwrap();
        assert_eq!(
            cmd,
            Command::PromptbookUrl("https://example.com/article.ptbk.md".into())
        );
    }

    #[test]
    fn parse_promptbook_version_strips_backticks() {
        let cmd = parse_command("PROMPTBOOK VERSION `0.5.0`").unwrap();
        assert_eq!(cmd, Command::PromptbookVersion("0.5.0".into()));
    }

    #[test]
    fn parse_model_variant_case_insensitive() {
        let cmd = parse_command("model variant chat").unwrap();
        assert_eq!(cmd, Command::Model(ModelCommand::Variant(ModelVariant::Chat)));
        let cmd = parse_command("MODEL VARIANT Completion").unwrap();
        assert_eq!(
            cmd,
            Command::Model(ModelCommand::Variant(ModelVariant::Completion))
        );
    }

    #[test]
    fn parse_model_variant_unknown_is_invalid() {
        let msg = syntax_message("MODEL VARIANT Embedding");
        assert!(msg.starts_with("Syntax error: Invalid command"), "{msg}");
    }

    #[test]
    fn parse_model_name() {
        let cmd = parse_command("MODEL NAME `gpt-4-turbo`").unwrap();
        assert_eq!(cmd, Command::Model(ModelCommand::Name("gpt-4-turbo".into())));
    }

    #[test]
    fn parse_input_parameter_with_description() {
        let cmd = parse_command("INPUT PARAMETER {topic} Topic of the article").unwrap();
        assert_eq!(
            cmd,
            Command::Parameter {
                role: ParameterRole::Input,
                name: "topic".into(),
                description: Some("Topic of the article".into()),
            }
        );
    }

    #[test]
    fn parse_output_parameter_without_description() {
        let cmd = parse_command("OUTPUT PARAMETER {article}").unwrap();
        assert_eq!(
            cmd,
            Command::Parameter {
                role: ParameterRole::Output,
                name: "article".into(),
                description: None,
            }
        );
    }

    #[test]
    fn parse_intermediate_parameter() {
        let cmd = parse_command("PARAMETER {draft} First draft").unwrap();
        assert!(matches!(
            cmd,
            Command::Parameter {
                role: ParameterRole::Intermediate,
                ..
            }
        ));
    }

    #[test]
    fn parameter_name_must_start_lowercase() {
        let msg = syntax_message("INPUT PARAMETER {Topic}");
        assert!(msg.contains("Invalid command"), "{msg}");
    }

    #[test]
    fn parse_execution_types() {
        let cases = [
            ("EXECUTE PROMPT TEMPLATE", ExecutionType::PromptTemplate),
            ("EXECUTE SIMPLE TEMPLATE", ExecutionType::SimpleTemplate),
            ("Execute script", ExecutionType::Script),
            ("EXECUTE PROMPT DIALOG", ExecutionType::PromptDialog),
            ("SIMPLE TEMPLATE", ExecutionType::SimpleTemplate),
            ("PROMPT DIALOG", ExecutionType::PromptDialog),
        ];
        for (line, expected) in cases {
            assert_eq!(
                parse_command(line).unwrap(),
                Command::ExecutionType(expected),
                "{line}"
            );
        }
    }

    #[test]
    fn parse_joker() {
        let cmd = parse_command("JOKER {draft}").unwrap();
        assert_eq!(cmd, Command::Joker("draft".into()));
    }

    #[test]
    fn parse_postprocessing_and_alias() {
        assert_eq!(
            parse_command("POSTPROCESSING `unwrapResult`").unwrap(),
            Command::Postprocessing("unwrapResult".into())
        );
        assert_eq!(
            parse_command("POSTPROCESS trim").unwrap(),
            Command::Postprocessing("trim".into())
        );
    }

    #[test]
    fn postprocessing_requires_identifier() {
        let msg = syntax_message("POSTPROCESSING not a name");
        assert!(msg.contains("Invalid command"), "{msg}");
    }

    #[test]
    fn parse_expectations() {
        assert_eq!(
            parse_command("EXPECT MIN 2 words").unwrap(),
            Command::Expect {
                sign: ExpectationSign::Minimum,
                amount: 2,
                unit: ExpectationUnit::Words,
            }
        );
        assert_eq!(
            parse_command("Expect maximum 1 sentence").unwrap(),
            Command::Expect {
                sign: ExpectationSign::Maximum,
                amount: 1,
                unit: ExpectationUnit::Sentences,
            }
        );
        assert_eq!(
            parse_command("EXPECT EXACTLY 3 Lines").unwrap(),
            Command::Expect {
                sign: ExpectationSign::Exactly,
                amount: 3,
                unit: ExpectationUnit::Lines,
            }
        );
    }

    #[test]
    fn parse_negative_amount_is_kept_for_validation() {
        let cmd = parse_command("EXPECT MIN -1 pages").unwrap();
        assert!(matches!(cmd, Command::Expect { amount: -1, .. }));
    }

    #[test]
    fn parse_expect_json() {
        assert_eq!(
            parse_command("EXPECT JSON").unwrap(),
            Command::ExpectFormat(ExpectFormat::Json)
        );
    }

    #[test]
    fn expect_with_unknown_unit_is_invalid() {
        let msg = syntax_message("EXPECT MIN 2 bananas");
        assert!(msg.starts_with("Syntax error: Invalid command"), "{msg}");
    }

    #[test]
    fn unknown_command() {
        let msg = syntax_message("FOO BAR");
        assert_eq!(msg, "Syntax error: Unknown command \"FOO BAR\"");
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(parse_command("JOKER {a} {b}").is_err());
        assert!(parse_command("EXPECT JSON please").is_err());
    }

    #[test]
    fn display_is_canonical_and_reparses() {
        let lines = [
            "PROMPTBOOK URL https://example.com/a.ptbk.md",
            "MODEL VARIANT CHAT",
            "MODEL NAME `gpt-4`",
            "INPUT PARAMETER {topic} The topic",
            "EXECUTE SCRIPT",
            "JOKER {draft}",
            "POSTPROCESSING `trim`",
            "EXPECT MAX 10 words",
            "EXPECT JSON",
        ];
        for line in lines {
            let cmd = parse_command(line).unwrap();
            assert_eq!(cmd.to_string(), line);
            assert_eq!(parse_command(&cmd.to_string()).unwrap(), cmd);
        }
    }

    #[test]
    fn command_scopes() {
        let url = parse_command("PROMPTBOOK URL https://x.y/z").unwrap();
        assert!(url.is_allowed_in(CommandScope::PipelineHeader));
        assert!(!url.is_allowed_in(CommandScope::Template));

        let joker = parse_command("JOKER {a}").unwrap();
        assert!(!joker.is_allowed_in(CommandScope::PipelineHeader));
        assert!(joker.is_allowed_in(CommandScope::Template));

        let model = parse_command("MODEL VARIANT CHAT").unwrap();
        assert!(model.is_allowed_in(CommandScope::PipelineHeader));
        assert!(model.is_allowed_in(CommandScope::Template));
    }

    #[test]
    fn command_serializes() {
        let cmd = parse_command("EXPECT MIN 2 words").unwrap();
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["Expect"]["unit"], "words");
        assert_eq!(json["Expect"]["sign"], "minimum");
    }
}
