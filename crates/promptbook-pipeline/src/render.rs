//! Write a [`Pipeline`] back out as pipeline Markdown.
//!
//! The output compiles to a structurally equal pipeline. Header model defaults
//! are not kept in the compiled form, so every template spells out its own.

use promptbook_markdown::{Command, ExecutionType, ExpectationSign, ModelCommand, ParameterRole};

use crate::pipeline::{Pipeline, PromptTemplate};

/// A backtick fence longer than any backtick run inside `content`.
pub(crate) fn code_fence(content: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

fn push_commands(out: &mut String, commands: &[Command]) {
    if commands.is_empty() {
        return;
    }
    out.push('\n');
    for command in commands {
        out.push_str("- ");
        out.push_str(&command.to_string());
        out.push('\n');
    }
}

pub fn render(pipeline: &Pipeline) -> String {
    let mut out = format!("# {}\n", pipeline.title);
    if let Some(description) = &pipeline.description {
        out.push('\n');
        out.push_str(description);
        out.push('\n');
    }

    let mut header = Vec::new();
    if let Some(url) = &pipeline.pipeline_url {
        header.push(Command::PromptbookUrl(url.clone()));
    }
    header.push(Command::PromptbookVersion(pipeline.promptbook_version.clone()));
    for parameter in &pipeline.parameters {
        let role = match (parameter.is_input, parameter.is_output) {
            (true, _) => ParameterRole::Input,
            (false, true) => ParameterRole::Output,
            (false, false) => ParameterRole::Intermediate,
        };
        header.push(Command::Parameter {
            role,
            name: parameter.name.clone(),
            description: parameter.description.clone(),
        });
        // both flags set: keep the conflict visible to the validator
        if parameter.is_input && parameter.is_output {
            header.push(Command::Parameter {
                role: ParameterRole::Output,
                name: parameter.name.clone(),
                description: None,
            });
        }
    }
    push_commands(&mut out, &header);

    for template in &pipeline.templates {
        render_template(&mut out, template);
    }
    out
}

fn render_template(out: &mut String, template: &PromptTemplate) {
    out.push_str(&format!("\n## {}\n", template.title));
    if let Some(description) = &template.description {
        out.push('\n');
        out.push_str(description);
        out.push('\n');
    }

    let mut commands = vec![Command::ExecutionType(template.execution_type)];
    if let Some(model) = &template.model_requirements {
        if let Some(variant) = model.model_variant {
            commands.push(Command::Model(ModelCommand::Variant(variant)));
        }
        if let Some(name) = &model.model_name {
            commands.push(Command::Model(ModelCommand::Name(name.clone())));
        }
    }
    commands.extend(template.jokers.iter().cloned().map(Command::Joker));
    commands.extend(
        template
            .postprocessing
            .iter()
            .cloned()
            .map(Command::Postprocessing),
    );
    for (unit, bounds) in &template.expectations {
        match (bounds.min, bounds.max) {
            (Some(min), Some(max)) if min == max => commands.push(Command::Expect {
                sign: ExpectationSign::Exactly,
                amount: min,
                unit: *unit,
            }),
            (min, max) => {
                if let Some(min) = min {
                    commands.push(Command::Expect {
                        sign: ExpectationSign::Minimum,
                        amount: min,
                        unit: *unit,
                    });
                }
                if let Some(max) = max {
                    commands.push(Command::Expect {
                        sign: ExpectationSign::Maximum,
                        amount: max,
                        unit: *unit,
                    });
                }
            }
        }
    }
    if let Some(format) = template.expect_format {
        commands.push(Command::ExpectFormat(format));
    }
    push_commands(out, &commands);

    let fence = code_fence(&template.content);
    let language = match (template.execution_type, template.content_language) {
        (ExecutionType::Script, Some(language)) => language.as_str(),
        _ => "",
    };
    out.push_str(&format!(
        "\n{fence}{language}\n{}\n{fence}\n\n`-> {{{}}}`\n",
        template.content, template.resulting_parameter_name
    ));
}
