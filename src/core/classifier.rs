//! Intent classification
//!
//! One short, near-deterministic generation call followed by keyword
//! containment against the intent labels. Classification never fails: any
//! unusable answer, including a backend error, resolves to GREETING.

use std::sync::Arc;

use crate::config::prompts::render;
use crate::config::PromptBook;
use crate::conversation::Message;
use crate::providers::Generator;

use super::intent::Intent;

const CLASSIFY_MAX_TOKENS: u32 = 10;
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Intent used when the model answer matches no label
pub const FALLBACK_INTENT: Intent = Intent::Greeting;

#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: Intent,
    /// Raw model answer, kept for diagnostics
    pub raw: String,
}

pub struct IntentClassifier {
    prompts: Arc<PromptBook>,
    generator: Arc<dyn Generator>,
}

impl IntentClassifier {
    pub fn new(prompts: Arc<PromptBook>, generator: Arc<dyn Generator>) -> Self {
        Self { prompts, generator }
    }

    /// Classify the latest message of the history
    pub async fn classify(&self, messages: &[Message]) -> Classification {
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        let prompt = render(&self.prompts.router.system, &[("user_message", last)]);

        let raw = match self
            .generator
            .generate(&prompt, CLASSIFY_MAX_TOKENS, CLASSIFY_TEMPERATURE)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Classification call failed, using fallback intent");
                String::new()
            }
        };

        let intent = resolve_intent(&raw);
        tracing::info!(utterance = last, raw = raw.trim(), %intent, "Classified intent");

        Classification { intent, raw }
    }
}

/// Map a raw model answer to an intent
///
/// The first label (in declaration order) contained in the upper-cased
/// answer wins, so extra words around the label are tolerated.
pub fn resolve_intent(raw: &str) -> Intent {
    let answer = raw.trim().to_uppercase();
    Intent::ALL
        .into_iter()
        .find(|intent| answer.contains(intent.as_str()))
        .unwrap_or(FALLBACK_INTENT)
}
