//! Cart extraction
//!
//! Turns "I'll also take a shake" into structured cart updates with a second,
//! context-aware generation pass restricted to official menu entries.
//! Extraction is best effort: every failure yields an empty update list.

use std::sync::Arc;

use crate::config::prompts::render;
use crate::config::PromptBook;
use crate::conversation::ConversationState;
use crate::knowledge::{menu_filter, Retriever};
use crate::providers::Generator;

use super::cart::CartUpdate;

const EXTRACT_MAX_TOKENS: u32 = 256;
const EXTRACT_TEMPERATURE: f32 = 0.0;

pub struct CartExtractor {
    prompts: Arc<PromptBook>,
    generator: Arc<dyn Generator>,
    retriever: Arc<dyn Retriever>,
    top_k: usize,
}

impl CartExtractor {
    pub fn new(
        prompts: Arc<PromptBook>,
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        top_k: usize,
    ) -> Self {
        Self {
            prompts,
            generator,
            retriever,
            top_k,
        }
    }

    /// Extract the cart updates requested by the latest message
    pub async fn extract(&self, state: &ConversationState) -> Vec<CartUpdate> {
        let current = state.last_message();
        let previous = state.previous_assistant_message().unwrap_or_default();
        let query = search_query(previous, current);

        let menu = match self
            .retriever
            .search(&query, self.top_k, Some(&menu_filter()))
            .await
        {
            Ok(passages) => passages.join("\n"),
            Err(e) => {
                tracing::warn!(error = %e, "Menu lookup for cart extraction failed");
                return Vec::new();
            }
        };

        let prompt = render(
            &self.prompts.extractor.system,
            &[
                ("context_data", menu.as_str()),
                ("previous_message", previous),
                ("user_query", current),
            ],
        );

        let raw = match self
            .generator
            .generate(&prompt, EXTRACT_MAX_TOKENS, EXTRACT_TEMPERATURE)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Cart extraction call failed");
                return Vec::new();
            }
        };

        let updates = parse_cart_updates(&raw);
        tracing::info!(count = updates.len(), ?updates, "Extracted cart updates");
        updates
    }
}

/// Retrieval query that carries the previous assistant turn, so elliptical
/// replies ("the cheese one") still find the right menu entries
pub fn search_query(previous_assistant: &str, current: &str) -> String {
    format!("{} {}", previous_assistant, current).trim().to_string()
}

/// Parse the JSON array embedded in a model answer
///
/// Takes the text between the first `[` and the last `]`. Returns an empty
/// list when there is no such span or it is not a JSON array; elements that
/// are not cart updates are dropped one by one.
pub fn parse_cart_updates(raw: &str) -> Vec<CartUpdate> {
    let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) else {
        tracing::debug!(raw, "No JSON array in extraction output");
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }

    let elements = match serde_json::from_str::<Vec<serde_json::Value>>(&raw[start..=end]) {
        Ok(elements) => elements,
        Err(e) => {
            tracing::debug!(error = %e, raw, "Discarding malformed extraction output");
            return Vec::new();
        }
    };

    elements
        .into_iter()
        .filter_map(|element| match serde_json::from_value::<CartUpdate>(element) {
            Ok(update) => Some(update),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed cart update");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;
    use crate::test_support::{RecordingRetriever, Scripted, ScriptedGenerator};

    fn state(messages: Vec<Message>) -> ConversationState {
        let mut state = ConversationState::new();
        state.push_messages(messages);
        state
    }

    fn extractor(generator: Arc<ScriptedGenerator>, retriever: Arc<RecordingRetriever>) -> CartExtractor {
        CartExtractor::new(Arc::new(PromptBook::default()), generator, retriever, 3)
    }

    #[test]
    fn test_parse_array_inside_prose() {
        let raw = r#"Sure! Here you go:
```json
[{"name": "Classic Burger", "price": 8.99, "quantity": 2}]
```"#;
        assert_eq!(parse_cart_updates(raw), vec![CartUpdate::item("Classic Burger", 8.99, 2)]);
    }

    #[test]
    fn test_parse_removal_and_empty() {
        let raw = r#"[{"name": "Fries", "price": 3.5, "quantity": -1}]"#;
        assert_eq!(parse_cart_updates(raw)[0].quantity, -1);
        assert!(parse_cart_updates("[]").is_empty());
    }

    #[test]
    fn test_parse_failures_yield_empty() {
        for raw in [
            "",
            "no array here",
            "] backwards [",
            r#"[{"name": "Fries", "quantity": "two"}]"#,
            r#"{"name": "Fries"}"#,
            "[1, 2, 3]",
            "[unclosed",
        ] {
            assert!(parse_cart_updates(raw).is_empty(), "expected empty for {:?}", raw);
        }
    }

    #[test]
    fn test_parse_keeps_valid_elements() {
        let raw = r#"[{"name": "Fries", "price": null, "quantity": -1}]"#;
        assert_eq!(parse_cart_updates(raw), vec![CartUpdate::item("Fries", 0.0, -1)]);

        let raw = r#"[{"name": "Cola", "price": 1.99, "quantity": 2.0}]"#;
        assert_eq!(parse_cart_updates(raw), vec![CartUpdate::item("Cola", 1.99, 2)]);

        let raw = r#"[
            {"name": "Classic Burger", "price": 8.99, "quantity": 1},
            {"name": "Fries", "price": "cheap", "quantity": 1},
            {"name": "Vanilla Shake", "price": 4.5, "quantity": -1}
        ]"#;
        assert_eq!(
            parse_cart_updates(raw),
            vec![
                CartUpdate::item("Classic Burger", 8.99, 1),
                CartUpdate::item("Vanilla Shake", 4.5, -1),
            ]
        );
    }

    #[test]
    fn test_search_query_joins_previous_turn() {
        assert_eq!(
            search_query("We have Classic and Cheese burgers.", "the cheese one"),
            "We have Classic and Cheese burgers. the cheese one"
        );
        assert_eq!(search_query("", "one shake"), "one shake");
    }

    #[tokio::test]
    async fn test_extract_with_menu_context() {
        let generator = Arc::new(ScriptedGenerator::texts(&[
            r#"[{"name": "Cheese Burger", "price": 9.99, "quantity": 1}]"#,
        ]));
        let retriever = Arc::new(RecordingRetriever::new(&["Cheese Burger - $9.99"]));
        let state = state(vec![
            Message::user("What burgers do you have?"),
            Message::assistant("Classic or Cheese?"),
            Message::user("the cheese one"),
        ]);

        let updates = extractor(generator.clone(), retriever.clone()).extract(&state).await;
        assert_eq!(updates, vec![CartUpdate::item("Cheese Burger", 9.99, 1)]);

        let searches = retriever.calls();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].query, "Classic or Cheese? the cheese one");
        assert_eq!(searches[0].filter, Some(menu_filter()));

        let calls = generator.calls();
        assert_eq!(calls[0].temperature, 0.0);
        assert!(calls[0].prompt.contains("Cheese Burger - $9.99"));
        assert!(calls[0].prompt.contains("CUSTOMER: the cheese one"));
    }

    #[tokio::test]
    async fn test_extract_absorbs_failures() {
        let state = state(vec![Message::user("one shake")]);

        let failing_gen = Arc::new(ScriptedGenerator::new([Scripted::Fail]));
        let retriever = Arc::new(RecordingRetriever::new(&["Vanilla Shake - $4.50"]));
        assert!(extractor(failing_gen, retriever).extract(&state).await.is_empty());

        let generator = Arc::new(ScriptedGenerator::texts(&["[]"]));
        let offline = Arc::new(RecordingRetriever::failing());
        assert!(extractor(generator.clone(), offline).extract(&state).await.is_empty());
        assert!(generator.calls().is_empty());
    }
}
