//! Pipeline execution engine.
//!
//! Walks the templates of a [`ValidatedPipeline`] in dependency order, one at
//! a time, and records every step in an [`ExecutionReport`]. Execution never
//! returns `Err`; failures are collected in [`PipelineExecutorResult`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use promptbook_markdown::ExecutionType;
use promptbook_types::{Parameters, PromptbookError, Result, Usage};

use crate::events::{EventEmitter, ExecutionEvent};
use crate::expectations::check_template;
use crate::parameters::replace_parameters;
use crate::pipeline::PromptTemplate;
use crate::postprocessing::PostprocessingRegistry;
use crate::report::{ExecutionReport, PromptExecution};
use crate::retry::BackoffPolicy;
use crate::tools::{DialogRequest, ExecutionTools, Prompt, ScriptRequest};
use crate::validation::ValidatedPipeline;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Run settings, loadable from JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Attempts per template, including the first one.
    pub max_execution_attempts: usize,
    pub backoff: BackoffPolicy,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_execution_attempts: 3,
            backoff: BackoffPolicy::None,
        }
    }
}

/// Outcome of one run.
#[derive(Debug)]
pub struct PipelineExecutorResult {
    pub run_id: Uuid,
    pub is_successful: bool,
    pub errors: Vec<PromptbookError>,
    /// Sum over every tool call of the run, failed attempts included.
    pub usage: Usage,
    pub execution_report: ExecutionReport,
    /// Values of the declared output parameters only.
    pub output_parameters: Parameters,
}

impl PipelineExecutorResult {
    /// Output parameters on success, the first error otherwise.
    pub fn into_result(self) -> Result<Parameters> {
        if self.is_successful {
            return Ok(self.output_parameters);
        }
        Err(self
            .errors
            .into_iter()
            .next()
            .unwrap_or_else(|| PromptbookError::Execution("Pipeline execution failed".into())))
    }
}

/// Executes one validated pipeline; shareable across concurrent runs.
pub struct PipelineExecutor {
    pipeline: Arc<ValidatedPipeline>,
    tools: ExecutionTools,
    settings: ExecutionSettings,
    postprocessing: Arc<PostprocessingRegistry>,
    events: Option<EventEmitter>,
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

impl PipelineExecutor {
    pub fn new(pipeline: Arc<ValidatedPipeline>, tools: ExecutionTools) -> Self {
        Self {
            pipeline,
            tools,
            settings: ExecutionSettings::default(),
            postprocessing: Arc::new(PostprocessingRegistry::with_builtins()),
            events: None,
        }
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_postprocessing(mut self, registry: Arc<PostprocessingRegistry>) -> Self {
        self.postprocessing = registry;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn pipeline(&self) -> &ValidatedPipeline {
        &self.pipeline
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Run the pipeline with the given input parameters.
    pub async fn execute(&self, input: Parameters) -> PipelineExecutorResult {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let pipeline = self.pipeline.pipeline();

        self.emit(ExecutionEvent::RunStarted {
            run_id,
            pipeline_title: pipeline.title.clone(),
            template_count: pipeline.templates.len(),
        });
        tracing::info!(%run_id, pipeline = %pipeline.title, "Pipeline run started");

        let mut report = ExecutionReport {
            title: pipeline.title.clone(),
            description: pipeline.description.clone(),
            pipeline_url: pipeline.pipeline_url.clone(),
            promptbook_used_version: crate::PROMPTBOOK_VERSION.to_string(),
            promptbook_requested_version: pipeline.promptbook_version.clone(),
            prompt_executions: Vec::new(),
            usage: Usage::zero(),
        };
        let mut errors = Vec::new();
        let mut usage = Usage::zero();

        // Phase 1: seed the bag
        let missing = pipeline
            .input_parameters()
            .find(|p| !input.contains_key(&p.name));
        let mut bag = input;
        if let Some(parameter) = missing {
            errors.push(PromptbookError::Execution(format!(
                "Parameter {{{}}} is not defined",
                parameter.name
            )));
        }

        // Phase 2: templates in dependency order
        if errors.is_empty() {
            let mut resolved: BTreeSet<&str> = pipeline
                .input_parameters()
                .map(|p| p.name.as_str())
                .collect();
            let mut pending: Vec<&PromptTemplate> = pipeline.templates.iter().collect();

            while !pending.is_empty() {
                let next = pending.iter().position(|t| {
                    t.dependent_parameter_names
                        .iter()
                        .all(|name| resolved.contains(name.as_str()))
                });
                let Some(index) = next else {
                    let waiting = pending
                        .iter()
                        .map(|t| t.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    errors.push(PromptbookError::Execution(format!(
                        "Can not resolve dependencies of templates: {waiting}"
                    )));
                    break;
                };
                let template = pending.remove(index);

                let (execution, outcome) = self.execute_template(run_id, template, &bag).await;
                usage += execution.usage;
                report.prompt_executions.push(execution);

                match outcome {
                    Ok(value) => {
                        bag.insert(template.resulting_parameter_name.clone(), value);
                        resolved.insert(template.resulting_parameter_name.as_str());
                    }
                    Err(e) => {
                        errors.push(e);
                        break;
                    }
                }
            }
        }

        // Phase 3: finalize
        let is_successful = errors.is_empty();
        let output_parameters: Parameters = pipeline
            .output_parameters()
            .filter_map(|p| bag.get(&p.name).map(|v| (p.name.clone(), v.clone())))
            .collect();
        report.usage = usage;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.emit(ExecutionEvent::RunCompleted {
            run_id,
            is_successful,
            duration_ms,
        });
        if is_successful {
            tracing::info!(%run_id, duration_ms, price = usage.price, "Pipeline run succeeded");
        } else {
            tracing::warn!(%run_id, duration_ms, errors = errors.len(), "Pipeline run failed");
        }

        PipelineExecutorResult {
            run_id,
            is_successful,
            errors,
            usage,
            execution_report: report,
            output_parameters,
        }
    }

    /// Execute one template; the report entry is returned even on failure.
    async fn execute_template(
        &self,
        run_id: Uuid,
        template: &PromptTemplate,
        bag: &Parameters,
    ) -> (PromptExecution, Result<String>) {
        let started = Instant::now();
        self.emit(ExecutionEvent::TemplateStarted {
            run_id,
            template: template.name.clone(),
            execution_type: template.execution_type.to_string(),
        });
        tracing::info!(
            template = %template.name,
            execution_type = %template.execution_type,
            "Executing template"
        );

        let mut execution = PromptExecution {
            template_name: template.name.clone(),
            title: template.title.clone(),
            execution_type: template.execution_type,
            resulting_parameter_name: template.resulting_parameter_name.clone(),
            content: None,
            result: None,
            model_name: None,
            attempts: 0,
            joker: None,
            usage: Usage::zero(),
            error: None,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        };

        let outcome = match self.try_jokers(run_id, template, bag) {
            Some((joker, value)) => {
                execution.joker = Some(joker);
                Ok(value)
            }
            None => self.run_attempts(run_id, template, bag, &mut execution).await,
        };

        execution.completed_at = Utc::now();
        let duration_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(value) => {
                execution.result = Some(value.clone());
                self.emit(ExecutionEvent::TemplateCompleted {
                    run_id,
                    template: template.name.clone(),
                    attempts: execution.attempts,
                    duration_ms,
                });
                tracing::info!(
                    template = %template.name,
                    attempts = execution.attempts,
                    duration_ms,
                    "Template completed"
                );
            }
            Err(e) => {
                execution.error = Some(e.to_string());
                self.emit(ExecutionEvent::TemplateFailed {
                    run_id,
                    template: template.name.clone(),
                    error: e.to_string(),
                });
                tracing::warn!(template = %template.name, error = %e, "Template failed");
            }
        }
        (execution, outcome)
    }

    /// First joker whose value is non-empty and passes the template's gates.
    fn try_jokers(
        &self,
        run_id: Uuid,
        template: &PromptTemplate,
        bag: &Parameters,
    ) -> Option<(String, String)> {
        for joker in &template.jokers {
            let Some(value) = bag.get(joker) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }
            match check_template(template, value) {
                Ok(()) => {
                    self.emit(ExecutionEvent::JokerUsed {
                        run_id,
                        template: template.name.clone(),
                        joker: joker.clone(),
                    });
                    tracing::info!(template = %template.name, joker = %joker, "Joker used");
                    return Some((joker.clone(), value.clone()));
                }
                Err(e) => {
                    tracing::debug!(
                        template = %template.name,
                        joker = %joker,
                        reason = %e,
                        "Joker rejected"
                    );
                }
            }
        }
        None
    }

    /// Call the tool until the result passes postprocessing and expectations.
    async fn run_attempts(
        &self,
        run_id: Uuid,
        template: &PromptTemplate,
        bag: &Parameters,
        execution: &mut PromptExecution,
    ) -> Result<String> {
        let parameters: Parameters = template
            .dependent_parameter_names
            .iter()
            .filter_map(|name| bag.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        let content = replace_parameters(&template.content, bag)?;
        execution.content = Some(content.clone());

        let max_attempts = self.settings.max_execution_attempts.max(1);
        let mut last_error: Option<PromptbookError> = None;

        for attempt in 0..max_attempts {
            execution.attempts = attempt + 1;
            let raw = self
                .call_tool(template, &content, &parameters, execution)
                .await?;

            let checked = self
                .postprocessing
                .apply_all(&template.postprocessing, &raw)
                .and_then(|text| check_template(template, &text).map(|()| text));

            match checked {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        template = %template.name,
                        attempt = attempt + 1,
                        error = %e,
                        "Expectations not met"
                    );
                    self.emit(ExecutionEvent::AttemptFailed {
                        run_id,
                        template: template.name.clone(),
                        attempt: attempt + 1,
                        error: e.to_string(),
                    });
                    last_error = Some(e);
                    if attempt + 1 < max_attempts {
                        let delay = self.settings.backoff.delay_for_attempt(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(PromptbookError::RetriesExhausted {
            template: template.name.clone(),
            attempts: max_attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Dispatch one attempt to the tool matching the execution type.
    async fn call_tool(
        &self,
        template: &PromptTemplate,
        content: &str,
        parameters: &Parameters,
        execution: &mut PromptExecution,
    ) -> Result<String> {
        match template.execution_type {
            ExecutionType::SimpleTemplate => Ok(content.to_string()),

            ExecutionType::PromptTemplate => {
                let llm = self.tools.llm.as_ref().ok_or_else(|| PromptbookError::MissingTool {
                    template: template.name.clone(),
                    capability: "language model tools".into(),
                })?;
                let prompt = Prompt {
                    title: template.title.clone(),
                    content: content.to_string(),
                    model_requirements: template.model_requirements.clone().unwrap_or_default(),
                    expectations: template.expectations.clone(),
                    expect_format: template.expect_format,
                    parameters: parameters.clone(),
                    pipeline_url: self.pipeline.pipeline_url.clone(),
                };
                let result = llm
                    .call_model(&prompt)
                    .await
                    .map_err(|e| PromptbookError::ToolFailed {
                        tool: llm.title().to_string(),
                        template: template.name.clone(),
                        message: e.to_string(),
                    })?;
                execution.usage += result.usage;
                execution.model_name = Some(result.model_name);
                Ok(result.content)
            }

            ExecutionType::Script => {
                let language = template.content_language.ok_or_else(|| {
                    PromptbookError::Execution(format!(
                        "Script template \"{}\" has no language",
                        template.name
                    ))
                })?;
                let tools = self.tools.script.get(&language).ok_or_else(|| {
                    PromptbookError::MissingTool {
                        template: template.name.clone(),
                        capability: format!("{language} script execution tools"),
                    }
                })?;
                let request = ScriptRequest {
                    language,
                    script: content.to_string(),
                    parameters: parameters.clone(),
                };
                tools.execute(&request).await.map_err(|e| {
                    let available = if parameters.is_empty() {
                        "(none)".to_string()
                    } else {
                        parameters
                            .keys()
                            .map(|name| format!("{{{name}}}"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    };
                    PromptbookError::ToolFailed {
                        tool: format!("{language} script"),
                        template: template.name.clone(),
                        message: format!("{e}\n\nParameters available to the script: {available}"),
                    }
                })
            }

            ExecutionType::PromptDialog => {
                let ui = self.tools.user_interface.as_ref().ok_or_else(|| {
                    PromptbookError::MissingTool {
                        template: template.name.clone(),
                        capability: "user interface tools".into(),
                    }
                })?;
                let question = match &template.description {
                    Some(description) => replace_parameters(description, parameters)?,
                    None => String::new(),
                };
                let request = DialogRequest {
                    title: template.title.clone(),
                    question,
                    default_value: Some(content.to_string()),
                };
                ui.prompt_dialog(&request)
                    .await
                    .map_err(|e| PromptbookError::ToolFailed {
                        tool: "user interface".into(),
                        template: template.name.clone(),
                        message: e.to_string(),
                    })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
