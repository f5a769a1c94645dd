//! Pipeline logic validation: lint rules and diagnostics.
//!
//! Rules run in a fixed priority order. [`validate_pipeline`] fails on the
//! first `Error`-severity diagnostic and otherwise wraps the pipeline in a
//! [`ValidatedPipeline`], the only form the executor accepts. [`lint`] returns
//! every diagnostic, warnings included.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;

use serde::Serialize;

use promptbook_markdown::ExecutionType;
use promptbook_types::{PromptbookError, Result};

use crate::pipeline::Pipeline;
use crate::postprocessing::BUILTIN_FUNCTIONS;

/// Upper bound of dependency resolution passes; only hit on an internal bug.
const LOOP_LIMIT: usize = 10_000;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub template: Option<String>,
    pub parameter: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic>;
}

impl Diagnostic {
    fn error(rule: &dyn LintRule, message: String) -> Self {
        Self {
            rule: rule.name().into(),
            severity: Severity::Error,
            message,
            template: None,
            parameter: None,
            fix: None,
        }
    }

    fn warning(rule: &dyn LintRule, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(rule, message)
        }
    }

    fn on_template(mut self, name: &str) -> Self {
        self.template = Some(name.to_string());
        self
    }

    fn on_parameter(mut self, name: &str) -> Self {
        self.parameter = Some(name.to_string());
        self
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct ParameterExclusivityRule;
impl LintRule for ParameterExclusivityRule {
    fn name(&self) -> &str { "parameter_exclusivity" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        pipeline
            .parameters
            .iter()
            .filter(|p| p.is_input && p.is_output)
            .map(|p| {
                Diagnostic::error(
                    self,
                    format!("Parameter {{{}}} can not be both input and output", p.name),
                )
                .on_parameter(&p.name)
                .with_fix("Declare it either as INPUT PARAMETER or as OUTPUT PARAMETER")
            })
            .collect()
    }
}

struct UnusedParameterRule;
impl LintRule for UnusedParameterRule {
    fn name(&self) -> &str { "unused_parameter" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        pipeline
            .parameters
            .iter()
            .filter(|p| !p.is_input && !p.is_output)
            .filter(|p| {
                !pipeline
                    .templates
                    .iter()
                    .any(|t| t.dependent_parameter_names.contains(&p.name))
            })
            .map(|p| {
                Diagnostic::error(
                    self,
                    format!("Parameter {{{}}} is created but not used", p.name),
                )
                .on_parameter(&p.name)
                .with_fix(format!(
                    "Use {{{}}} in a template or declare it as OUTPUT PARAMETER",
                    p.name
                ))
            })
            .collect()
    }
}

struct UndefinedParameterRule;
impl LintRule for UndefinedParameterRule {
    fn name(&self) -> &str { "undefined_parameter" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        pipeline
            .parameters
            .iter()
            .filter(|p| !p.is_input)
            .filter(|p| {
                !pipeline
                    .templates
                    .iter()
                    .any(|t| t.resulting_parameter_name == p.name)
            })
            .map(|p| {
                Diagnostic::error(
                    self,
                    format!("Parameter {{{}}} is declared but not defined", p.name),
                )
                .on_parameter(&p.name)
                .with_fix(format!(
                    "Add a template ending with `-> {{{}}}` or declare it as INPUT PARAMETER",
                    p.name
                ))
            })
            .collect()
    }
}

struct DuplicateResultRule;
impl LintRule for DuplicateResultRule {
    fn name(&self) -> &str { "duplicate_result" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut producers: BTreeMap<&str, &str> = BTreeMap::new();
        let mut diagnostics = Vec::new();

        for template in &pipeline.templates {
            let result = template.resulting_parameter_name.as_str();
            if let Some(first) = producers.insert(result, &template.name) {
                diagnostics.push(
                    Diagnostic::error(
                        self,
                        format!(
                            "Parameter {{{result}}} is defined multiple times, by templates \"{first}\" and \"{}\"",
                            template.name
                        ),
                    )
                    .on_template(&template.name)
                    .on_parameter(result),
                );
            }
            if pipeline.parameter(result).is_some_and(|p| p.is_input) {
                diagnostics.push(
                    Diagnostic::error(
                        self,
                        format!(
                            "Parameter {{{result}}} is an input parameter and can not be the result of template \"{}\"",
                            template.name
                        ),
                    )
                    .on_template(&template.name)
                    .on_parameter(result),
                );
            }
        }
        diagnostics
    }
}

struct ModelVariantRule;
impl LintRule for ModelVariantRule {
    fn name(&self) -> &str { "model_variant" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        pipeline
            .templates
            .iter()
            .filter(|t| t.execution_type == ExecutionType::PromptTemplate)
            .filter(|t| t.model_variant().is_none())
            .map(|t| {
                Diagnostic::error(
                    self,
                    format!(
                        "Template \"{}\" is a prompt template but has no model variant",
                        t.name
                    ),
                )
                .on_template(&t.name)
                .with_fix("Add `MODEL VARIANT Chat` to the template or the pipeline header")
            })
            .collect()
    }
}

struct JokerGateRule;
impl LintRule for JokerGateRule {
    fn name(&self) -> &str { "joker_gate" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        pipeline
            .templates
            .iter()
            .filter(|t| !t.jokers.is_empty() && !t.has_gate())
            .map(|t| {
                Diagnostic::error(
                    self,
                    format!(
                        "Joker parameters are used in template \"{}\" but no expectations are defined",
                        t.name
                    ),
                )
                .on_template(&t.name)
                .with_fix("Add an EXPECT command so a joker value can be checked")
            })
            .collect()
    }
}

struct JokerDependencyRule;
impl LintRule for JokerDependencyRule {
    fn name(&self) -> &str { "joker_dependency" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for template in &pipeline.templates {
            for joker in &template.jokers {
                if !template.dependent_parameter_names.contains(joker) {
                    diagnostics.push(
                        Diagnostic::error(
                            self,
                            format!(
                                "Joker parameter {{{joker}}} is not a dependency of template \"{}\"",
                                template.name
                            ),
                        )
                        .on_template(&template.name)
                        .on_parameter(joker),
                    );
                }
            }
        }
        diagnostics
    }
}

struct ExpectationSanityRule;
impl LintRule for ExpectationSanityRule {
    fn name(&self) -> &str { "expectation_sanity" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for template in &pipeline.templates {
            for (unit, bounds) in &template.expectations {
                let mut problems = Vec::new();
                if let Some(min) = bounds.min {
                    if min < 0 {
                        problems
                            .push(format!("min expectation of {unit} must be zero or positive"));
                    }
                }
                if let Some(max) = bounds.max {
                    if max <= 0 {
                        problems.push(format!("max expectation of {unit} must be positive"));
                    }
                }
                if let (Some(min), Some(max)) = (bounds.min, bounds.max) {
                    if min > max {
                        problems.push(format!(
                            "min expectation of {unit} ({min}) is higher than max ({max})"
                        ));
                    }
                }
                diagnostics.extend(problems.into_iter().map(|problem| {
                    Diagnostic::error(self, format!("Template \"{}\": {problem}", template.name))
                        .on_template(&template.name)
                }));
            }
        }
        diagnostics
    }
}

struct CircularDependencyRule;
impl LintRule for CircularDependencyRule {
    fn name(&self) -> &str { "circular_dependency" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        match resolution_order(pipeline) {
            Ok(_) => vec![],
            Err(report) => vec![Diagnostic::error(self, report)],
        }
    }
}

struct DuplicateTemplateNameRule;
impl LintRule for DuplicateTemplateNameRule {
    fn name(&self) -> &str { "duplicate_template_name" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut seen = BTreeSet::new();
        pipeline
            .templates
            .iter()
            .filter(|t| !seen.insert(t.name.as_str()))
            .map(|t| {
                Diagnostic::error(self, format!("Template name \"{}\" is not unique", t.name))
                    .on_template(&t.name)
            })
            .collect()
    }
}

struct DialogDescriptionRule;
impl LintRule for DialogDescriptionRule {
    fn name(&self) -> &str { "dialog_description" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        pipeline
            .templates
            .iter()
            .filter(|t| t.execution_type == ExecutionType::PromptDialog && t.description.is_none())
            .map(|t| {
                Diagnostic::warning(
                    self,
                    format!(
                        "Dialog template \"{}\" has no description; the user only sees its title",
                        t.name
                    ),
                )
                .on_template(&t.name)
                .with_fix("Add a paragraph below the heading explaining what to enter")
            })
            .collect()
    }
}

struct PostprocessingKnownRule;
impl LintRule for PostprocessingKnownRule {
    fn name(&self) -> &str { "postprocessing_known" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for template in &pipeline.templates {
            for function in &template.postprocessing {
                if !BUILTIN_FUNCTIONS.contains(&function.as_str()) {
                    diagnostics.push(
                        Diagnostic::warning(
                            self,
                            format!(
                                "Postprocessing function `{function}` in template \"{}\" is not built in and must be registered by the host",
                                template.name
                            ),
                        )
                        .on_template(&template.name),
                    );
                }
            }
        }
        diagnostics
    }
}

struct OutputPresentRule;
impl LintRule for OutputPresentRule {
    fn name(&self) -> &str { "output_present" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        if pipeline.output_parameters().next().is_none() {
            vec![Diagnostic::warning(self, "Pipeline declares no output parameters".into())
                .with_fix("Add an OUTPUT PARAMETER to the pipeline header")]
        } else {
            vec![]
        }
    }
}

// ---------------------------------------------------------------------------
// Dependency resolution
// ---------------------------------------------------------------------------

/// Order templates so each runs after its dependencies.
///
/// Starts from the input parameters and repeatedly moves every template whose
/// dependencies are all resolved. Returns the textual report on a deadlock.
pub fn resolution_order(pipeline: &Pipeline) -> std::result::Result<Vec<&str>, String> {
    let mut resolved: BTreeSet<&str> = pipeline
        .input_parameters()
        .map(|p| p.name.as_str())
        .collect();
    let mut pending: Vec<_> = pipeline.templates.iter().collect();
    let mut order = Vec::with_capacity(pending.len());
    let mut passes = 0usize;

    while !pending.is_empty() {
        passes += 1;
        if passes > LOOP_LIMIT {
            return Err(format!(
                "Loop limit of {LOOP_LIMIT} reached while resolving template dependencies"
            ));
        }

        let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|t| {
            t.dependent_parameter_names
                .iter()
                .all(|name| resolved.contains(name.as_str()))
        });

        if ready.is_empty() {
            let mut report = String::from(
                "Can not resolve some parameters, it may be caused by circular dependencies\n\nCan not resolve:",
            );
            for template in &waiting {
                let missing = template
                    .dependent_parameter_names
                    .iter()
                    .filter(|name| !resolved.contains(name.as_str()))
                    .map(|name| format!("{{{name}}}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                report.push_str(&format!(
                    "\n- Template \"{}\" producing {{{}}} is waiting for {missing}",
                    template.name, template.resulting_parameter_name
                ));
            }
            let resolved_list = if resolved.is_empty() {
                "(nothing)".to_string()
            } else {
                resolved
                    .iter()
                    .map(|name| format!("{{{name}}}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            report.push_str(&format!("\n\nResolved: {resolved_list}"));
            return Err(report);
        }

        tracing::debug!(
            pass = passes,
            ready = ready.len(),
            waiting = waiting.len(),
            "dependency pass"
        );
        for template in ready {
            resolved.insert(template.resulting_parameter_name.as_str());
            order.push(template.name.as_str());
        }
        pending = waiting;
    }

    Ok(order)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(ParameterExclusivityRule),
        Box::new(UnusedParameterRule),
        Box::new(UndefinedParameterRule),
        Box::new(DuplicateResultRule),
        Box::new(ModelVariantRule),
        Box::new(JokerGateRule),
        Box::new(JokerDependencyRule),
        Box::new(ExpectationSanityRule),
        Box::new(CircularDependencyRule),
        Box::new(DuplicateTemplateNameRule),
        Box::new(DialogDescriptionRule),
        Box::new(PostprocessingKnownRule),
        Box::new(OutputPresentRule),
    ]
}

/// Run every rule and return all diagnostics, warnings included.
pub fn lint(pipeline: &Pipeline) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for rule in rules() {
        diagnostics.extend(rule.apply(pipeline));
    }
    diagnostics
}

/// A pipeline that passed every error-level rule.
///
/// Only [`validate_pipeline`] constructs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPipeline(Pipeline);

impl ValidatedPipeline {
    pub fn pipeline(&self) -> &Pipeline {
        &self.0
    }

    pub fn into_inner(self) -> Pipeline {
        self.0
    }
}

impl Deref for ValidatedPipeline {
    type Target = Pipeline;

    fn deref(&self) -> &Pipeline {
        &self.0
    }
}

/// Validate `pipeline`, failing with the first violation in priority order.
pub fn validate_pipeline(pipeline: Pipeline) -> Result<ValidatedPipeline> {
    for rule in rules() {
        let first_error = rule
            .apply(&pipeline)
            .into_iter()
            .find(|d| d.severity == Severity::Error);
        if let Some(diagnostic) = first_error {
            tracing::debug!(rule = %diagnostic.rule, title = %pipeline.title, "pipeline rejected");
            return Err(PromptbookError::Logic(diagnostic.message));
        }
    }
    tracing::debug!(
        title = %pipeline.title,
        templates = pipeline.templates.len(),
        "pipeline validated"
    );
    Ok(ValidatedPipeline(pipeline))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
