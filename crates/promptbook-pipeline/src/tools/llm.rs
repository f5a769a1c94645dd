use async_trait::async_trait;

use promptbook_markdown::ModelVariant;
use promptbook_types::{Result, Usage, UsageCounts};

use super::{LlmExecutionTools, ModelResult, Prompt};
use crate::expectations::measure_usage;

/// Dry-run model: answers every prompt with the prompt itself.
///
/// Usage is measured from the texts; tokens are estimated at four characters
/// each and the price is always zero.
#[derive(Debug, Clone, Default)]
pub struct SimulatedLlmTools;

impl SimulatedLlmTools {
    pub fn new() -> Self {
        Self
    }
}

fn estimate(text: &str) -> UsageCounts {
    let mut counts = measure_usage(text);
    counts.tokens_count = counts.characters_count.div_ceil(4);
    counts
}

#[async_trait]
impl LlmExecutionTools for SimulatedLlmTools {
    fn title(&self) -> &str {
        "Simulated"
    }

    async fn call_model(&self, prompt: &Prompt) -> Result<ModelResult> {
        let variant = prompt
            .model_requirements
            .model_variant
            .unwrap_or(ModelVariant::Chat);
        let model_name = prompt
            .model_requirements
            .model_name
            .clone()
            .unwrap_or_else(|| format!("simulated-{}", variant.to_string().to_lowercase()));

        tracing::debug!(title = %prompt.title, model = %model_name, "simulated model call");

        Ok(ModelResult {
            content: prompt.content.clone(),
            model_name,
            usage: Usage {
                price: 0.0,
                input: estimate(&prompt.content),
                output: estimate(&prompt.content),
            },
        })
    }
}
