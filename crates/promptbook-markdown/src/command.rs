use std::fmt;

use serde::{Deserialize, Serialize};

/// How a prompt template produces its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    #[default]
    PromptTemplate,
    SimpleTemplate,
    Script,
    PromptDialog,
}

impl ExecutionType {
    /// Canonical command text selecting this execution type.
    pub fn command_text(&self) -> &'static str {
        match self {
            ExecutionType::PromptTemplate => "EXECUTE PROMPT TEMPLATE",
            ExecutionType::SimpleTemplate => "EXECUTE SIMPLE TEMPLATE",
            ExecutionType::Script => "EXECUTE SCRIPT",
            ExecutionType::PromptDialog => "EXECUTE PROMPT DIALOG",
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionType::PromptTemplate => "PROMPT_TEMPLATE",
            ExecutionType::SimpleTemplate => "SIMPLE_TEMPLATE",
            ExecutionType::Script => "SCRIPT",
            ExecutionType::PromptDialog => "PROMPT_DIALOG",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelVariant {
    Chat,
    Completion,
}

impl ModelVariant {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "CHAT" => Some(ModelVariant::Chat),
            "COMPLETION" => Some(ModelVariant::Completion),
            _ => None,
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelVariant::Chat => f.write_str("CHAT"),
            ModelVariant::Completion => f.write_str("COMPLETION"),
        }
    }
}

/// Unit an expectation is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectationUnit {
    Characters,
    Words,
    Sentences,
    Lines,
    Paragraphs,
    Pages,
}

impl ExpectationUnit {
    pub const ALL: [ExpectationUnit; 6] = [
        ExpectationUnit::Characters,
        ExpectationUnit::Words,
        ExpectationUnit::Sentences,
        ExpectationUnit::Lines,
        ExpectationUnit::Paragraphs,
        ExpectationUnit::Pages,
    ];

    /// Accepts singular and plural forms in any case (`word`, `WORDS`, ...).
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let lower = keyword.to_ascii_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        match singular {
            "character" | "char" => Some(ExpectationUnit::Characters),
            "word" => Some(ExpectationUnit::Words),
            "sentence" => Some(ExpectationUnit::Sentences),
            "line" => Some(ExpectationUnit::Lines),
            "paragraph" => Some(ExpectationUnit::Paragraphs),
            "page" => Some(ExpectationUnit::Pages),
            _ => None,
        }
    }

    /// Plural lowercase name, as used in the JSON form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectationUnit::Characters => "characters",
            ExpectationUnit::Words => "words",
            ExpectationUnit::Sentences => "sentences",
            ExpectationUnit::Lines => "lines",
            ExpectationUnit::Paragraphs => "paragraphs",
            ExpectationUnit::Pages => "pages",
        }
    }
}

impl fmt::Display for ExpectationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectationSign {
    Minimum,
    Maximum,
    Exactly,
}

impl fmt::Display for ExpectationSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectationSign::Minimum => f.write_str("MIN"),
            ExpectationSign::Maximum => f.write_str("MAX"),
            ExpectationSign::Exactly => f.write_str("EXACTLY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpectFormat {
    Json,
}

impl ExpectFormat {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "JSON" => Some(ExpectFormat::Json),
            _ => None,
        }
    }
}

impl fmt::Display for ExpectFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectFormat::Json => f.write_str("JSON"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterRole {
    Input,
    Output,
    Intermediate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelCommand {
    Variant(ModelVariant),
    Name(String),
}

/// One bullet-list command of the pipeline dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    PromptbookUrl(String),
    PromptbookVersion(String),
    Model(ModelCommand),
    Parameter {
        role: ParameterRole,
        name: String,
        description: Option<String>,
    },
    ExecutionType(ExecutionType),
    Joker(String),
    Postprocessing(String),
    Expect {
        sign: ExpectationSign,
        amount: i64,
        unit: ExpectationUnit,
    },
    ExpectFormat(ExpectFormat),
}

/// Where a command appears in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandScope {
    PipelineHeader,
    Template,
}

impl fmt::Display for CommandScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandScope::PipelineHeader => f.write_str("the pipeline header"),
            CommandScope::Template => f.write_str("a prompt template"),
        }
    }
}

impl Command {
    /// Leading keyword(s) of the command, for diagnostics.
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::PromptbookUrl(_) => "PROMPTBOOK URL",
            Command::PromptbookVersion(_) => "PROMPTBOOK VERSION",
            Command::Model(ModelCommand::Variant(_)) => "MODEL VARIANT",
            Command::Model(ModelCommand::Name(_)) => "MODEL NAME",
            Command::Parameter { .. } => "PARAMETER",
            Command::ExecutionType(_) => "EXECUTE",
            Command::Joker(_) => "JOKER",
            Command::Postprocessing(_) => "POSTPROCESSING",
            Command::Expect { .. } | Command::ExpectFormat(_) => "EXPECT",
        }
    }

    pub fn is_allowed_in(&self, scope: CommandScope) -> bool {
        match self {
            Command::PromptbookUrl(_) | Command::PromptbookVersion(_) => {
                scope == CommandScope::PipelineHeader
            }
            Command::Model(_) | Command::Parameter { .. } => true,
            Command::ExecutionType(_)
            | Command::Joker(_)
            | Command::Postprocessing(_)
            | Command::Expect { .. }
            | Command::ExpectFormat(_) => scope == CommandScope::Template,
        }
    }
}

impl fmt::Display for Command {
    /// Canonical source form, without the leading list marker.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::PromptbookUrl(url) => write!(f, "PROMPTBOOK URL {url}"),
            Command::PromptbookVersion(version) => write!(f, "PROMPTBOOK VERSION {version}"),
            Command::Model(ModelCommand::Variant(variant)) => write!(f, "MODEL VARIANT {variant}"),
            Command::Model(ModelCommand::Name(name)) => write!(f, "MODEL NAME `{name}`"),
            Command::Parameter {
                role,
                name,
                description,
            } => {
                match role {
                    ParameterRole::Input => write!(f, "INPUT PARAMETER {{{name}}}")?,
                    ParameterRole::Output => write!(f, "OUTPUT PARAMETER {{{name}}}")?,
                    ParameterRole::Intermediate => write!(f, "PARAMETER {{{name}}}")?,
                }
                if let Some(description) = description {
                    write!(f, " {description}")?;
                }
                Ok(())
            }
            Command::ExecutionType(execution_type) => f.write_str(execution_type.command_text()),
            Command::Joker(name) => write!(f, "JOKER {{{name}}}"),
            Command::Postprocessing(function) => write!(f, "POSTPROCESSING `{function}`"),
            Command::Expect { sign, amount, unit } => write!(f, "EXPECT {sign} {amount} {unit}"),
            Command::ExpectFormat(format) => write!(f, "EXPECT {format}"),
        }
    }
}
