//! Personas and prompt templates
//!
//! The prompt book is loaded once at startup from a TOML file and is
//! read-only afterwards. Every section is optional; missing entries fall back
//! to the built-in texts below. A missing file is a startup error.
//!
//! # Example Prompt Book
//!
//! ```toml
//! [personas.rosy]
//! name = "Rosy"
//! description = "a cheerful counter clerk"
//! style = "Friendly, upbeat, uses food emojis"
//! prefix = "Rosy here!"
//! temperature = 0.7
//!
//! [tasks.menu_qa]
//! task = "Recommend items using ONLY the menu context."
//!
//! [common]
//! base_template = """
//! You are {name}, {description}.
//! ...
//! Customer: {user_query}
//! Answer:"""
//! ```
//!
//! Templates use `{placeholder}` markers that are substituted in a single
//! pass, so text inserted from the customer is never re-expanded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

use crate::core::intent::Intent;

/// Persona used when a requested persona key is missing
pub const DEFAULT_PERSONA: &str = "rosy";

/// A named response voice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub style: String,

    /// Phrase every answer must start with
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for Persona {
    fn default() -> Self {
        builtin::rosy()
    }
}

/// Task instructions for one intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPrompt {
    pub task: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonPrompts {
    #[serde(default = "builtin::base_template")]
    pub base_template: String,
}

impl Default for CommonPrompts {
    fn default() -> Self {
        Self {
            base_template: builtin::base_template(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterPrompts {
    /// Classification prompt; `{user_message}` is the latest utterance
    #[serde(default = "builtin::router_system")]
    pub system: String,
}

impl Default for RouterPrompts {
    fn default() -> Self {
        Self {
            system: builtin::router_system(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorPrompts {
    /// Cart extraction prompt; placeholders `{context_data}`,
    /// `{previous_message}` and `{user_query}`
    #[serde(default = "builtin::extractor_system")]
    pub system: String,
}

impl Default for ExtractorPrompts {
    fn default() -> Self {
        Self {
            system: builtin::extractor_system(),
        }
    }
}

/// All personas and prompt templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptBook {
    #[serde(default)]
    pub personas: HashMap<String, Persona>,

    /// Task instructions keyed by lowercase intent label, plus
    /// `complaint_clarify` for early complaints
    #[serde(default)]
    pub tasks: HashMap<String, TaskPrompt>,

    #[serde(default)]
    pub common: CommonPrompts,

    #[serde(default)]
    pub router: RouterPrompts,

    #[serde(default)]
    pub extractor: ExtractorPrompts,

    #[serde(skip)]
    fallback_persona: Persona,
}

impl PromptBook {
    /// Load the prompt book from a TOML file
    pub async fn load_from_file(path: &Path) -> Result<Self, PromptError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PromptError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PromptError> {
        toml::from_str(content).map_err(|e| PromptError::ParseError(e.to_string()))
    }

    /// Look up a persona, falling back to the default persona
    pub fn persona(&self, key: &str) -> &Persona {
        self.personas
            .get(key)
            .or_else(|| {
                tracing::warn!(persona = key, "Unknown persona, using default");
                self.personas.get(DEFAULT_PERSONA)
            })
            .unwrap_or(&self.fallback_persona)
    }

    /// Task instructions by key, falling back to a generic instruction
    pub fn task(&self, key: &str) -> &str {
        self.tasks
            .get(key)
            .map(|t| t.task.as_str())
            .unwrap_or(builtin::GENERIC_TASK)
    }

    pub fn intent_task(&self, intent: Intent) -> &str {
        self.task(&intent.task_key())
    }

    /// Fill the shared base template for a persona
    pub fn build_prompt(
        &self,
        persona_key: &str,
        task_instruction: &str,
        context_data: &str,
        user_query: &str,
    ) -> String {
        let p = self.persona(persona_key);
        render(
            &self.common.base_template,
            &[
                ("name", p.name.as_str()),
                ("description", p.description.as_str()),
                ("task_instruction", task_instruction),
                ("context_data", context_data),
                ("style", p.style.as_str()),
                ("prefix", p.prefix.as_str()),
                ("user_query", user_query),
            ],
        )
    }
}

/// Substitute `{key}` markers in one pass; unknown markers are kept verbatim
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let value = after.find('}').and_then(|end| {
            let key = &after[..end];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, end))
        });

        match value {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Errors from prompt loading
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Built-in prompts used when the prompt book leaves a section out
pub mod builtin {
    use super::Persona;

    pub const GENERIC_TASK: &str =
        "Answer the customer's message helpfully and briefly, using only the context provided.";

    pub fn rosy() -> Persona {
        Persona {
            name: "Rosy".to_string(),
            description: "a cheerful clerk at the burger counter".to_string(),
            style: "Friendly and upbeat. Short sentences. Food emojis are welcome.".to_string(),
            prefix: "Rosy here!".to_string(),
            temperature: 0.7,
        }
    }

    pub fn base_template() -> String {
        r#"You are {name}, {description}.

[Task]
{task_instruction}

[Context]
{context_data}

[Style]
{style}
Always start your answer with "{prefix}".

Customer: {user_query}
Answer:"#
            .to_string()
    }

    pub fn router_system() -> String {
        r#"You are an intent classifier for a burger shop chatbot.
Classify the User Message into exactly ONE category:

ORDER - The customer has decided and wants an item added NOW ("I'll take the classic one", "One shake please", "Yes, add it").
HISTORY - The customer asks about what they already ordered, the bill or a receipt ("What did I order?").
COMPLAINT - The customer is unhappy with food or service, or asks for a refund or a manager.
GREETING - Social talk only: hello, thanks, goodbye. No question about food or the store.
MENU_QA - The customer is still deciding or asks about items, prices, ingredients or recommendations ("I want something cheesy", "Do you have vegan food?").
STORE_INFO - Questions about the store itself: opening hours, location, wifi, parking, restrooms.
CANCEL - The customer wants to cancel the whole order and start over.
REMOVE - The customer wants to take a specific item out of the order.

Rules:
- Deciding on a specific item is ORDER; still weighing options is MENU_QA.
- Questions about past orders are HISTORY, even if an item is named.
- A greeting combined with a question is classified by the question.

User Message: "{user_message}"

Respond with the category name only:"#
            .to_string()
    }

    pub fn extractor_system() -> String {
        r#"You update the cart of a burger shop customer.
Read the conversation below and list the cart changes the customer just asked for.

[Official Menu]
{context_data}

[Conversation]
CLERK: {previous_message}
CUSTOMER: {user_query}

Rules:
1. Output ONLY a JSON array of objects with keys "name", "price", "quantity".
2. Use the exact item name and price from the Official Menu. Skip items that are not on it.
3. To remove items, use a negative quantity.
4. If nothing should change, output [].

JSON:"#
            .to_string()
    }
}
