use async_trait::async_trait;
use std::sync::Arc;

use super::{ResolveRequest, SourceId, SourcePayload, SourceStep};
use crate::error::SourceError;
use crate::llm::GenerationOracle;
use crate::prompt::build_guidance_prompt;

/// Last link: the model answers from its own knowledge. Never used for
/// intents that carry numeric fund facts.
pub struct OracleSynthesisStep {
    oracle: Arc<dyn GenerationOracle>,
    temperature: f32,
}

impl OracleSynthesisStep {
    pub fn new(oracle: Arc<dyn GenerationOracle>, temperature: f32) -> Self {
        Self { oracle, temperature }
    }
}

#[async_trait]
impl SourceStep for OracleSynthesisStep {
    fn id(&self) -> SourceId {
        SourceId::GenerationOracle
    }

    async fn fetch(&self, request: &ResolveRequest) -> Result<(SourcePayload, f32), SourceError> {
        if request.intent.is_factual() {
            return Err(SourceError::NotApplicable(format!(
                "{} needs fund data, not model knowledge",
                request.intent
            )));
        }

        let prompt = build_guidance_prompt(&request.query, request.intent);
        let text = self.oracle.generate(&prompt, self.temperature).await?;

        if text.trim().is_empty() {
            return Err(SourceError::Empty("empty model reply".to_string()));
        }
        Ok((SourcePayload::Synthesis(text), 0.60))
    }
}
