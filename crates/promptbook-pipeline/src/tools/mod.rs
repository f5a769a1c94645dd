//! Execution tool contracts the engine calls into.
//!
//! Each capability is an async trait. [`ExecutionTools`] bundles whichever
//! implementations a host provides; a template whose capability is missing
//! fails its run with [`PromptbookError::MissingTool`](promptbook_types::PromptbookError::MissingTool).

pub mod dialog;
pub mod llm;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use promptbook_markdown::ExpectFormat;
use promptbook_types::{Parameters, Result, Usage};

use crate::pipeline::{Expectations, ModelRequirements, ScriptLanguage};

pub use dialog::{ConsoleDialogTools, RecordingDialogTools};
pub use llm::SimulatedLlmTools;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A fully substituted prompt sent to a language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub title: String,
    pub content: String,
    pub model_requirements: ModelRequirements,
    #[serde(default)]
    pub expectations: Expectations,
    #[serde(default)]
    pub expect_format: Option<ExpectFormat>,
    pub parameters: Parameters,
    #[serde(default)]
    pub pipeline_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResult {
    pub content: String,
    pub model_name: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub language: ScriptLanguage,
    pub script: String,
    pub parameters: Parameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogRequest {
    pub title: String,
    pub question: String,
    pub default_value: Option<String>,
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LlmExecutionTools: Send + Sync {
    /// Human-readable name, used in reports and errors.
    fn title(&self) -> &str;

    async fn call_model(&self, prompt: &Prompt) -> Result<ModelResult>;
}

#[async_trait]
pub trait ScriptExecutionTools: Send + Sync {
    /// Run `request.script` and return its textual result.
    async fn execute(&self, request: &ScriptRequest) -> Result<String>;
}

#[async_trait]
pub trait UserInterfaceTools: Send + Sync {
    async fn prompt_dialog(&self, request: &DialogRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// ExecutionTools
// ---------------------------------------------------------------------------

/// The capability set available to one executor.
#[derive(Clone, Default)]
pub struct ExecutionTools {
    pub llm: Option<Arc<dyn LlmExecutionTools>>,
    pub script: HashMap<ScriptLanguage, Arc<dyn ScriptExecutionTools>>,
    pub user_interface: Option<Arc<dyn UserInterfaceTools>>,
}

impl ExecutionTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, llm: impl LlmExecutionTools + 'static) -> Self {
        self.llm = Some(Arc::new(llm));
        self
    }

    pub fn with_script(
        mut self,
        language: ScriptLanguage,
        tools: impl ScriptExecutionTools + 'static,
    ) -> Self {
        self.script.insert(language, Arc::new(tools));
        self
    }

    pub fn with_user_interface(mut self, tools: impl UserInterfaceTools + 'static) -> Self {
        self.user_interface = Some(Arc::new(tools));
        self
    }
}

impl fmt::Debug for ExecutionTools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut languages: Vec<_> = self.script.keys().collect();
        languages.sort();
        f.debug_struct("ExecutionTools")
            .field("llm", &self.llm.as_ref().map(|llm| llm.title().to_string()))
            .field("script", &languages)
            .field("user_interface", &self.user_interface.is_some())
            .finish()
    }
}
