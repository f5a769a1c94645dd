//! Compiled pipeline representation.
//!
//! A [`Pipeline`] is produced once by [`crate::compile`] and never mutated
//! afterwards. Its JSON form uses camelCase keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use promptbook_markdown::{ExecutionType, ExpectFormat, ExpectationUnit, ModelVariant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_url: Option<String>,
    pub promptbook_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Vec<Parameter>,
    pub templates: Vec<PromptTemplate>,
}

impl Pipeline {
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn template(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn input_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.is_input)
    }

    pub fn output_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.is_output)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Model selection attached to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_variant: Option<ModelVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl ModelRequirements {
    pub fn is_empty(&self) -> bool {
        self.model_variant.is_none() && self.model_name.is_none()
    }
}

/// Inclusive bounds of one expectation unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

pub type Expectations = BTreeMap<ExpectationUnit, ExpectationBounds>;

/// Language of a `SCRIPT` template body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    Javascript,
    Typescript,
    Python,
}

impl ScriptLanguage {
    pub const SUPPORTED: [ScriptLanguage; 3] = [
        ScriptLanguage::Javascript,
        ScriptLanguage::Typescript,
        ScriptLanguage::Python,
    ];

    /// Match a code fence info word, case-insensitively.
    pub fn from_fence(language: &str) -> Option<Self> {
        match language.to_ascii_lowercase().as_str() {
            "javascript" => Some(ScriptLanguage::Javascript),
            "typescript" => Some(ScriptLanguage::Typescript),
            "python" => Some(ScriptLanguage::Python),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptLanguage::Javascript => "javascript",
            ScriptLanguage::Typescript => "typescript",
            ScriptLanguage::Python => "python",
        }
    }
}

impl fmt::Display for ScriptLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage of a pipeline, producing exactly one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    pub name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub dependent_parameter_names: BTreeSet<String>,
    pub execution_type: ExecutionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_requirements: Option<ModelRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jokers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postprocessing: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expectations: Expectations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_format: Option<ExpectFormat>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<ScriptLanguage>,
    pub resulting_parameter_name: String,
}

impl PromptTemplate {
    /// Whether any quality gate (expectations or format) is configured.
    pub fn has_gate(&self) -> bool {
        !self.expectations.is_empty() || self.expect_format.is_some()
    }

    pub fn model_variant(&self) -> Option<ModelVariant> {
        self.model_requirements
            .as_ref()
            .and_then(|requirements| requirements.model_variant)
    }
}
