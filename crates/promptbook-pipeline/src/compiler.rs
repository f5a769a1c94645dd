//! Markdown to [`Pipeline`] compiler.
//!
//! Folds the header commands and every `##` section into the compiled form.
//! Compilation checks syntax only; logical soundness is the job of
//! [`crate::validate_pipeline`].

use std::collections::BTreeSet;

use heck::ToKebabCase;
use lazy_static::lazy_static;
use regex::Regex;

use promptbook_markdown::{
    extract_blocks, parse_command, structure, Command, CommandScope, ExecutionType, ExpectFormat,
    ExpectationSign, ExpectationUnit, ModelCommand, ParameterRole,
};
use promptbook_types::{PromptbookError, Result};

use crate::parameters::extract_parameter_names;
use crate::pipeline::{
    Expectations, ModelRequirements, Parameter, Pipeline, PromptTemplate, ScriptLanguage,
};

lazy_static! {
    static ref RETURN_LINE: Regex = Regex::new(r"^->\s*\{([a-z][A-Za-z0-9_]*)\}$").unwrap();
}

/// Compile pipeline source text into its structured form.
pub fn compile(source: &str) -> Result<Pipeline> {
    let document = structure(source)?;
    let mut parameters = ParameterTable::default();

    // ---- Header ----
    let header = extract_blocks(&document.content);
    let mut pipeline_url: Option<String> = None;
    let mut promptbook_version: Option<String> = None;
    let mut default_model = ModelRequirements::default();

    for line in &header.commands {
        match parse_scoped(line, CommandScope::PipelineHeader)? {
            Command::PromptbookUrl(url) => {
                if pipeline_url.is_some() {
                    return Err(PromptbookError::Syntax(
                        "PROMPTBOOK URL is specified more than once".into(),
                    ));
                }
                url::Url::parse(&url).map_err(|e| {
                    PromptbookError::Syntax(format!("Invalid PROMPTBOOK URL `{url}`: {e}"))
                })?;
                pipeline_url = Some(url);
            }
            Command::PromptbookVersion(version) => {
                if promptbook_version.is_some() {
                    return Err(PromptbookError::Syntax(
                        "PROMPTBOOK VERSION is specified more than once".into(),
                    ));
                }
                semver::Version::parse(&version).map_err(|e| {
                    PromptbookError::Syntax(format!(
                        "Invalid PROMPTBOOK VERSION `{version}`: {e}"
                    ))
                })?;
                promptbook_version = Some(version);
            }
            Command::Model(model) => apply_model(&mut default_model, model),
            Command::Parameter {
                role,
                name,
                description,
            } => parameters.declare(role, &name, description)?,
            other => {
                return Err(scope_error(&other.to_string(), CommandScope::PipelineHeader));
            }
        }
    }

    // ---- Templates ----
    let mut templates: Vec<PromptTemplate> = Vec::with_capacity(document.sections.len());
    let mut names = BTreeSet::new();

    for section in &document.sections {
        let template = compile_section(
            &section.title,
            &section.content,
            &default_model,
            &mut parameters,
        )?;
        if !names.insert(template.name.clone()) {
            return Err(PromptbookError::Syntax(format!(
                "Template name \"{}\" (from title \"{}\") is used more than once",
                template.name, template.title
            )));
        }
        templates.push(template);
    }

    for template in &templates {
        parameters.ensure(&template.resulting_parameter_name);
    }

    tracing::debug!(
        title = %document.title,
        templates = templates.len(),
        parameters = parameters.entries.len(),
        "compiled pipeline"
    );

    Ok(Pipeline {
        title: document.title,
        pipeline_url,
        promptbook_version: promptbook_version
            .unwrap_or_else(|| crate::PROMPTBOOK_VERSION.to_string()),
        description: header.description,
        parameters: parameters.entries,
        templates,
    })
}

fn compile_section(
    title: &str,
    content: &str,
    default_model: &ModelRequirements,
    parameters: &mut ParameterTable,
) -> Result<PromptTemplate> {
    let (body, resulting_parameter_name) = split_return_line(content).ok_or_else(|| {
        PromptbookError::Syntax(format!(
            "Invalid template \"{title}\": each section must end with `-> {{parameterName}}`\n\n{}",
            quote(content)
        ))
    })?;

    let blocks = extract_blocks(body);

    let mut execution_type: Option<ExecutionType> = None;
    let mut model = default_model.clone();
    let mut jokers: Vec<String> = Vec::new();
    let mut postprocessing: Vec<String> = Vec::new();
    let mut expectations = Expectations::new();
    let mut expect_format: Option<ExpectFormat> = None;

    for line in &blocks.commands {
        match parse_scoped(line, CommandScope::Template)? {
            Command::ExecutionType(kind) => {
                if let Some(previous) = execution_type {
                    return Err(PromptbookError::Syntax(format!(
                        "Template \"{title}\" has more than one execution type ({previous} and {kind})"
                    )));
                }
                execution_type = Some(kind);
            }
            Command::Model(command) => apply_model(&mut model, command),
            Command::Parameter {
                role,
                name,
                description,
            } => parameters.declare(role, &name, description)?,
            Command::Joker(name) => {
                if !jokers.contains(&name) {
                    jokers.push(name);
                }
            }
            Command::Postprocessing(function) => postprocessing.push(function),
            Command::Expect { sign, amount, unit } => {
                apply_expectation(&mut expectations, title, sign, amount, unit)?
            }
            Command::ExpectFormat(format) => match expect_format {
                Some(previous) if previous != format => {
                    return Err(PromptbookError::Syntax(format!(
                        "Template \"{title}\" expects both {previous} and {format} format"
                    )));
                }
                _ => expect_format = Some(format),
            },
            other => return Err(scope_error(&other.to_string(), CommandScope::Template)),
        }
    }

    let code = match blocks.code_blocks.as_slice() {
        [single] => single,
        [] => {
            return Err(PromptbookError::Syntax(format!(
                "Template \"{title}\" must contain exactly one code block, found none"
            )))
        }
        many => {
            return Err(PromptbookError::Syntax(format!(
                "Template \"{title}\" must contain exactly one code block, found {}",
                many.len()
            )))
        }
    };

    let execution_type = execution_type.unwrap_or_default();
    let content_language = if execution_type == ExecutionType::Script {
        let supported = ScriptLanguage::SUPPORTED
            .iter()
            .map(ScriptLanguage::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let language = code.language.as_deref().unwrap_or_default();
        let parsed = ScriptLanguage::from_fence(language).ok_or_else(|| {
            PromptbookError::Syntax(format!(
                "Script language \"{language}\" of template \"{title}\" is not supported, use one of: {supported}"
            ))
        })?;
        Some(parsed)
    } else {
        None
    };

    let mut dependent_parameter_names: BTreeSet<String> = jokers.iter().cloned().collect();
    dependent_parameter_names.extend(extract_parameter_names(title));
    if let Some(description) = &blocks.description {
        dependent_parameter_names.extend(extract_parameter_names(description));
    }
    dependent_parameter_names.extend(extract_parameter_names(&code.content));

    let name = title.to_kebab_case();
    tracing::debug!(
        template = %name,
        execution_type = %execution_type,
        dependencies = dependent_parameter_names.len(),
        result = %resulting_parameter_name,
        "compiled template"
    );

    Ok(PromptTemplate {
        name,
        title: title.to_string(),
        description: blocks.description,
        dependent_parameter_names,
        execution_type,
        model_requirements: (!model.is_empty()).then_some(model),
        jokers,
        postprocessing,
        expectations,
        expect_format,
        content: code.content.clone(),
        content_language,
        resulting_parameter_name,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a command line and check it may appear in `scope`.
fn parse_scoped(line: &str, scope: CommandScope) -> Result<Command> {
    let command = parse_command(line).map_err(|e| {
        let reason = match e {
            PromptbookError::Syntax(message) => message,
            other => other.to_string(),
        };
        PromptbookError::Syntax(format!(
            "Command \"{}\" is not allowed in {scope}: {reason}",
            line.trim()
        ))
    })?;
    if !command.is_allowed_in(scope) {
        return Err(scope_error(line, scope));
    }
    Ok(command)
}

fn scope_error(line: &str, scope: CommandScope) -> PromptbookError {
    PromptbookError::Syntax(format!(
        "Command \"{}\" is not allowed in {scope}",
        line.trim()
    ))
}

/// Separate the trailing `-> {name}` line from the rest of a section.
fn split_return_line(content: &str) -> Option<(&str, String)> {
    let trimmed = content.trim_end();
    let (body, last) = match trimmed.rfind('\n') {
        Some(index) => (&trimmed[..index], &trimmed[index + 1..]),
        None => ("", trimmed),
    };
    let candidate = last.trim().trim_matches('`').trim();
    let caps = RETURN_LINE.captures(candidate)?;
    Some((body, caps[1].to_string()))
}

fn quote(content: &str) -> String {
    content
        .lines()
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn apply_model(requirements: &mut ModelRequirements, command: ModelCommand) {
    match command {
        ModelCommand::Variant(variant) => requirements.model_variant = Some(variant),
        ModelCommand::Name(name) => requirements.model_name = Some(name),
    }
}

fn apply_expectation(
    expectations: &mut Expectations,
    title: &str,
    sign: ExpectationSign,
    amount: i64,
    unit: ExpectationUnit,
) -> Result<()> {
    let bounds = expectations.entry(unit).or_default();
    let conflict = match sign {
        ExpectationSign::Minimum => bounds.min.is_some(),
        ExpectationSign::Maximum => bounds.max.is_some(),
        ExpectationSign::Exactly => bounds.min.is_some() || bounds.max.is_some(),
    };
    if conflict {
        return Err(PromptbookError::Syntax(format!(
            "Template \"{title}\" already sets an expectation bound for {unit} (EXPECT {sign} {amount} {unit})"
        )));
    }
    match sign {
        ExpectationSign::Minimum => bounds.min = Some(amount),
        ExpectationSign::Maximum => bounds.max = Some(amount),
        ExpectationSign::Exactly => {
            bounds.min = Some(amount);
            bounds.max = Some(amount);
        }
    }
    Ok(())
}

/// Parameter declarations shared by the header and all sections.
#[derive(Default)]
struct ParameterTable {
    entries: Vec<Parameter>,
}

impl ParameterTable {
    fn declare(
        &mut self,
        role: ParameterRole,
        name: &str,
        description: Option<String>,
    ) -> Result<()> {
        let is_input = role == ParameterRole::Input;
        let is_output = role == ParameterRole::Output;

        match self.entries.iter_mut().find(|p| p.name == name) {
            Some(existing) => {
                if let (Some(old), Some(new)) = (&existing.description, &description) {
                    if old != new {
                        return Err(PromptbookError::Syntax(format!(
                            "Parameter {{{name}}} is defined multiple times with different descriptions:\n\n1) {old}\n2) {new}"
                        )));
                    }
                }
                if existing.description.is_none() {
                    existing.description = description;
                }
                existing.is_input |= is_input;
                existing.is_output |= is_output;
            }
            None => self.entries.push(Parameter {
                name: name.to_string(),
                is_input,
                is_output,
                description,
            }),
        }
        Ok(())
    }

    /// Add `name` as an intermediate parameter unless already declared.
    fn ensure(&mut self, name: &str) {
        if !self.entries.iter().any(|p| p.name == name) {
            self.entries.push(Parameter {
                name: name.to_string(),
                is_input: false,
                is_output: false,
                description: None,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use promptbook_markdown::ModelVariant;

    const ARTICLE: &str = r#"
# Write an article

Writes a short article about a topic.

- PROMPTBOOK URL https://example.com/pipelines/article.ptbk.md
- PROMPTBOOK VERSION 1.0.0
- MODEL VARIANT Chat
- INPUT PARAMETER {topic} Topic of the article
- OUTPUT PARAMETER {article} The finished article

## Draft the article

Draft an article about {topic}.

- MODEL NAME `gpt-4`
- EXPECT MIN 2 words
- EXPECT MAX 1 paragraph
- POSTPROCESSING trim

```markdown
Write an article about {topic}.
```

`-> {draft}`

## Polish

- EXECUTE SIMPLE TEMPLATE

```
{draft}
```

`-> {article}`
"#;

    // 1. Full pipeline compiles into the expected shape
    #[test]
    fn compile_article_pipeline() {
        let pipeline = compile(ARTICLE).unwrap();
        assert_eq!(pipeline.title, "Write an article");
        assert_eq!(
            pipeline.pipeline_url.as_deref(),
            Some("https://example.com/pipelines/article.ptbk.md")
        );
        assert_eq!(pipeline.promptbook_version, "1.0.0");
        assert_eq!(
            pipeline.description.as_deref(),
            Some("Writes a short article about a topic.")
        );
        assert_eq!(pipeline.templates.len(), 2);

        let draft = &pipeline.templates[0];
        assert_eq!(draft.name, "draft-the-article");
        assert_eq!(draft.execution_type, ExecutionType::PromptTemplate);
        assert_eq!(draft.resulting_parameter_name, "draft");
        assert_eq!(draft.content, "Write an article about {topic}.");
        assert_eq!(draft.postprocessing, vec!["trim".to_string()]);
        assert!(draft.dependent_parameter_names.contains("topic"));
        let model = draft.model_requirements.as_ref().unwrap();
        assert_eq!(model.model_variant, Some(ModelVariant::Chat));
        assert_eq!(model.model_name.as_deref(), Some("gpt-4"));
        assert_eq!(draft.expectations[&ExpectationUnit::Words].min, Some(2));
        assert_eq!(draft.expectations[&ExpectationUnit::Paragraphs].max, Some(1));

        let polish = &pipeline.templates[1];
        assert_eq!(polish.execution_type, ExecutionType::SimpleTemplate);
        assert!(polish.dependent_parameter_names.contains("draft"));
    }

    // 2. Undeclared resulting parameters become intermediate parameters
    #[test]
    fn resulting_parameters_are_appended() {
        let pipeline = compile(ARTICLE).unwrap();
        let names: Vec<_> = pipeline.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["topic", "article", "draft"]);
        let draft = pipeline.parameter("draft").unwrap();
        assert!(!draft.is_input && !draft.is_output);
    }

    // 3. Version defaults to the library version
    #[test]
    fn version_defaults_to_library_version() {
        let pipeline = compile("# T\n\n## A\n\n```\nx\n```\n\n`-> {a}`\n").unwrap();
        assert_eq!(pipeline.promptbook_version, crate::PROMPTBOOK_VERSION);
        assert!(pipeline.pipeline_url.is_none());
        assert!(pipeline.description.is_none());
    }

    #[test]
    fn missing_return_line_is_rejected() {
        let err = compile("# T\n\n## A\n\n```\nx\n```\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("each section must end with `-> {parameterName}`"), "{msg}");
        assert!(msg.contains("> ```"), "{msg}");
    }

    #[test]
    fn return_line_without_backticks_is_accepted() {
        let pipeline = compile("# T\n\n## A\n\n```\nx\n```\n\n-> {a}\n").unwrap();
        assert_eq!(pipeline.templates[0].resulting_parameter_name, "a");
    }

    #[test]
    fn zero_or_many_code_blocks_are_rejected() {
        let none = compile("# T\n\n## A\n\nNo code here.\n\n`-> {a}`\n").unwrap_err();
        assert!(none.to_string().contains("exactly one code block, found none"));

        let two = compile("# T\n\n## A\n\n```\nx\n```\n\n```\ny\n```\n\n`-> {a}`\n").unwrap_err();
        assert!(two.to_string().contains("exactly one code block, found 2"));
    }

    #[test]
    fn second_execution_type_is_rejected() {
        let source = "# T\n\n## A\n\n- EXECUTE SCRIPT\n- EXECUTE SIMPLE TEMPLATE\n\n```javascript\nx\n```\n\n`-> {a}`\n";
        let err = compile(source).unwrap_err();
        assert!(err.to_string().contains("more than one execution type"));
    }

    #[test]
    fn script_language_must_be_supported() {
        let source = "# T\n\n## A\n\n- EXECUTE SCRIPT\n\n```ruby\nputs 1\n```\n\n`-> {a}`\n";
        let err = compile(source).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("javascript, typescript, python"), "{msg}");

        let ok = "# T\n\n## A\n\n- EXECUTE SCRIPT\n\n```python\nprint(1)\n```\n\n`-> {a}`\n";
        let pipeline = compile(ok).unwrap();
        assert_eq!(
            pipeline.templates[0].content_language,
            Some(ScriptLanguage::Python)
        );
    }

    #[test]
    fn header_only_command_in_template_is_rejected() {
        let source = "# T\n\n## A\n\n- PROMPTBOOK VERSION 1.0.0\n\n```\nx\n```\n\n`-> {a}`\n";
        let err = compile(source).unwrap_err();
        assert!(err
            .to_string()
            .contains("Command \"PROMPTBOOK VERSION 1.0.0\" is not allowed in a prompt template"));
    }

    #[test]
    fn template_only_command_in_header_is_rejected() {
        let source = "# T\n\n- JOKER {a}\n\n## A\n\n```\nx\n```\n\n`-> {a}`\n";
        let err = compile(source).unwrap_err();
        assert!(err
            .to_string()
            .contains("Command \"JOKER {a}\" is not allowed in the pipeline header"));
    }

    #[test]
    fn unknown_command_carries_parser_reason() {
        let source = "# T\n\n## A\n\n- BOGUS THING\n\n```\nx\n```\n\n`-> {a}`\n";
        let msg = compile(source).unwrap_err().to_string();
        assert!(msg.contains("Command \"BOGUS THING\" is not allowed in a prompt template"));
        assert!(msg.contains("Unknown command"));
    }

    #[test]
    fn conflicting_parameter_descriptions_are_rejected() {
        let source = "# T\n\n- INPUT PARAMETER {a} First\n- INPUT PARAMETER {a} Second\n\n## A\n\n```\n{a}\n```\n\n`-> {b}`\n";
        let err = compile(source).unwrap_err();
        assert!(err.to_string().contains("different descriptions"));
    }

    #[test]
    fn same_description_redeclaration_merges() {
        let source = "# T\n\n- INPUT PARAMETER {a} Same\n\n## A\n\n- INPUT PARAMETER {a}\n\n```\n{a}\n```\n\n`-> {b}`\n";
        let pipeline = compile(source).unwrap();
        let a = pipeline.parameter("a").unwrap();
        assert!(a.is_input);
        assert_eq!(a.description.as_deref(), Some("Same"));
        assert_eq!(pipeline.parameters.len(), 2);
    }

    #[test]
    fn conflicting_roles_merge_for_validation() {
        let source = "# T\n\n- INPUT PARAMETER {a}\n- OUTPUT PARAMETER {a}\n\n## A\n\n```\n{a}\n```\n\n`-> {b}`\n";
        let pipeline = compile(source).unwrap();
        let a = pipeline.parameter("a").unwrap();
        assert!(a.is_input && a.is_output);
    }

    #[test]
    fn expectation_bound_redefinition_is_rejected() {
        let source = "# T\n\n## A\n\n- EXPECT MIN 1 word\n- EXPECT MIN 2 words\n\n```\nx\n```\n\n`-> {a}`\n";
        assert!(compile(source).unwrap_err().to_string().contains("already sets"));

        let exactly = "# T\n\n## A\n\n- EXPECT MAX 5 words\n- EXPECT EXACTLY 2 words\n\n```\nx\n```\n\n`-> {a}`\n";
        assert!(compile(exactly).is_err());
    }

    #[test]
    fn exactly_sets_both_bounds() {
        let source = "# T\n\n## A\n\n- EXPECT EXACTLY 3 lines\n\n```\nx\n```\n\n`-> {a}`\n";
        let pipeline = compile(source).unwrap();
        let bounds = pipeline.templates[0].expectations[&ExpectationUnit::Lines];
        assert_eq!((bounds.min, bounds.max), (Some(3), Some(3)));
    }

    #[test]
    fn template_model_overrides_header_default() {
        let source = "# T\n\n- MODEL VARIANT COMPLETION\n- MODEL NAME base\n\n## A\n\n- MODEL VARIANT CHAT\n\n```\nx\n```\n\n`-> {a}`\n";
        let pipeline = compile(source).unwrap();
        let model = pipeline.templates[0].model_requirements.clone().unwrap();
        assert_eq!(model.model_variant, Some(ModelVariant::Chat));
        assert_eq!(model.model_name.as_deref(), Some("base"));
    }

    #[test]
    fn duplicate_template_names_are_rejected() {
        let source = "# T\n\n## Same Title\n\n```\nx\n```\n\n`-> {a}`\n\n## same title\n\n```\ny\n```\n\n`-> {b}`\n";
        let err = compile(source).unwrap_err();
        assert!(err.to_string().contains("used more than once"));
    }

    #[test]
    fn invalid_url_and_version_are_rejected() {
        let bad_url = "# T\n\n- PROMPTBOOK URL not a url\n\n## A\n\n```\nx\n```\n\n`-> {a}`\n";
        assert!(compile(bad_url).unwrap_err().to_string().contains("Invalid PROMPTBOOK URL"));

        let bad_version = "# T\n\n- PROMPTBOOK VERSION one\n\n## A\n\n```\nx\n```\n\n`-> {a}`\n";
        assert!(compile(bad_version)
            .unwrap_err()
            .to_string()
            .contains("Invalid PROMPTBOOK VERSION"));
    }

    #[test]
    fn jokers_are_dependencies() {
        let source = "# T\n\n- INPUT PARAMETER {previous}\n\n## A\n\n- JOKER {previous}\n- EXPECT MIN 1 word\n\n```\nx\n```\n\n`-> {a}`\n";
        let pipeline = compile(source).unwrap();
        let template = &pipeline.templates[0];
        assert_eq!(template.jokers, vec!["previous".to_string()]);
        assert!(template.dependent_parameter_names.contains("previous"));
    }

    #[test]
    fn placeholders_in_title_and_description_are_dependencies() {
        let source = "# T\n\n## About {subject}\n\nUse {tone} tone.\n\n```\nx\n```\n\n`-> {a}`\n";
        let pipeline = compile(source).unwrap();
        let deps = &pipeline.templates[0].dependent_parameter_names;
        assert!(deps.contains("subject"));
        assert!(deps.contains("tone"));
    }
}
