//! Structured record of one pipeline run.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use promptbook_markdown::ExecutionType;
use promptbook_types::Usage;

use crate::render::code_fence;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_url: Option<String>,
    pub promptbook_used_version: String,
    pub promptbook_requested_version: String,
    pub prompt_executions: Vec<PromptExecution>,
    /// Totals over every tool call of the run; zero when none was made.
    #[serde(default)]
    pub usage: Usage,
}

/// One executed (or failed) template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptExecution {
    pub template_name: String,
    pub title: String,
    pub execution_type: ExecutionType,
    pub resulting_parameter_name: String,
    /// Content after parameter substitution, as handed to the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub attempts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joker: Option<String>,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl PromptExecution {
    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }

    pub fn is_successful(&self) -> bool {
        self.error.is_none()
    }
}

impl ExecutionReport {
    /// Human-readable Markdown rendering of the report.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Execution report: {}", self.title);
        if let Some(description) = &self.description {
            let _ = write!(out, "\n{description}\n");
        }

        out.push('\n');
        if let Some(url) = &self.pipeline_url {
            let _ = writeln!(out, "- Pipeline URL: {url}");
        }
        let _ = writeln!(
            out,
            "- Promptbook version: requested {}, used {}",
            self.promptbook_requested_version, self.promptbook_used_version
        );
        let usage = &self.usage;
        let total_ms: i64 = self.prompt_executions.iter().map(|e| e.duration_ms()).sum();
        let _ = writeln!(out, "- Prompt executions: {}", self.prompt_executions.len());
        let _ = writeln!(out, "- Total duration: {total_ms} ms");
        let _ = writeln!(out, "- Total price: ${:.4}", usage.price);
        let _ = writeln!(
            out,
            "- Total tokens: {} in, {} out",
            usage.input.tokens_count, usage.output.tokens_count
        );

        for execution in &self.prompt_executions {
            let _ = write!(out, "\n## {}\n\n", execution.title);
            let _ = writeln!(out, "- Execution type: {}", execution.execution_type);
            if let Some(model) = &execution.model_name {
                let _ = writeln!(out, "- Model: {model}");
            }
            let _ = writeln!(out, "- Attempts: {}", execution.attempts);
            if let Some(joker) = &execution.joker {
                let _ = writeln!(out, "- Joker used: {{{joker}}}");
            }
            let _ = writeln!(out, "- Duration: {} ms", execution.duration_ms());
            let _ = writeln!(out, "- Price: ${:.4}", execution.usage.price);

            match (&execution.result, &execution.error) {
                (_, Some(error)) => {
                    let _ = write!(out, "\n**Error:** {error}\n");
                }
                (Some(result), None) => {
                    let fence = code_fence(result);
                    let _ = write!(
                        out,
                        "\n`{{{}}}` =\n\n{fence}\n{result}\n{fence}\n",
                        execution.resulting_parameter_name
                    );
                }
                (None, None) => {}
            }
        }
        out
    }
}
