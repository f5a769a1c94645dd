//! Pipeline compiler, logic validator, execution engine and tool contracts.
//!
//! This crate turns pipeline Markdown into a [`Pipeline`], checks it for
//! logical soundness ([`validate_pipeline`]) and runs it against pluggable
//! [`ExecutionTools`] with jokers, postprocessing, expectation checks and
//! bounded retries.
//!
//! ```
//! use promptbook_pipeline::{compile, validate_pipeline};
//!
//! let source = "# Hello\n\n- INPUT PARAMETER {name}\n- OUTPUT PARAMETER {greeting}\n\n## Greet\n\n- SIMPLE TEMPLATE\n\n```\nHello {name}\n```\n\n`-> {greeting}`\n";
//! let pipeline = validate_pipeline(compile(source).unwrap()).unwrap();
//! assert_eq!(pipeline.templates[0].name, "greet");
//! ```

pub mod compiler;
mod duration_serde;
pub mod engine;
pub mod events;
pub mod expectations;
pub mod library;
pub mod parameters;
pub mod pipeline;
pub mod postprocessing;
pub mod render;
pub mod report;
pub mod retry;
pub mod tools;
pub mod validation;

/// Version of the pipeline language this crate implements.
pub const PROMPTBOOK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use compiler::compile;
pub use engine::{ExecutionSettings, PipelineExecutor, PipelineExecutorResult};
pub use events::{EventEmitter, ExecutionEvent};
pub use expectations::{check_expectations, check_format, check_template, measure_usage};
pub use library::{PipelineLibrary, PIPELINE_FILE_SUFFIX};
pub use parameters::{extract_parameter_names, replace_parameters};
pub use pipeline::{
    ExpectationBounds, Expectations, ModelRequirements, Parameter, Pipeline, PromptTemplate,
    ScriptLanguage,
};
pub use postprocessing::{PostprocessingFunction, PostprocessingRegistry};
pub use render::render;
pub use report::{ExecutionReport, PromptExecution};
pub use retry::BackoffPolicy;
pub use tools::{
    ConsoleDialogTools, DialogRequest, ExecutionTools, LlmExecutionTools, ModelResult, Prompt,
    RecordingDialogTools, ScriptExecutionTools, ScriptRequest, SimulatedLlmTools,
    UserInterfaceTools,
};
pub use validation::{
    lint, resolution_order, validate_pipeline, Diagnostic, LintRule, Severity, ValidatedPipeline,
};
