//! Turn pipeline
//!
//! The ChatEngine runs one customer turn end to end:
//! 1. Loads the session (one turn at a time per session)
//! 2. Appends the user message
//! 3. Classifies the intent and routes it, extracting cart updates for
//!    ORDER and REMOVE
//! 4. Runs the handler, folds its cart updates into the session cart and
//!    stores the user message together with the cart
//! 5. Streams the generated (or direct) reply
//! 6. Commits the assistant message once the full text is known
//!
//! Generation runs in its own task, so the reply is committed even if the
//! caller stops reading the stream early.

use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{AgentConfig, PromptBook};
use crate::conversation::Message;
use crate::knowledge::Retriever;
use crate::providers::Generator;

use super::cart::{self, Cart};
use super::classifier::IntentClassifier;
use super::extractor::CartExtractor;
use super::handlers::{Handlers, Reply, INIT_SENTINEL};
use super::intent::Intent;
use super::memory::{MemoryError, MemoryStore, SessionGuard, SessionLocks, StoredMessage};
use super::router::{resolve_label, route, Route};

/// Appended to the reply when generation breaks off
pub const GENERATION_FAILED_NOTICE: &str =
    "\n[Sorry, the kitchen is having trouble right now. Please try again.]";

const MAX_MESSAGE_CHARS: usize = 2000;

/// Text fragments of one reply
pub type TurnStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Errors from the turn pipeline
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// The request itself is unusable
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// A started turn
pub struct Turn {
    pub intent: Intent,
    pub stream: TurnStream,
}

/// Cart view for clients
#[derive(Debug, Clone, Serialize)]
pub struct CartSummary {
    pub items: Vec<cart::CartLine>,
    pub total: f64,
}

impl From<&Cart> for CartSummary {
    fn from(cart: &Cart) -> Self {
        Self {
            items: cart.values().cloned().collect(),
            total: (cart::cart_total(cart) * 100.0).round() / 100.0,
        }
    }
}

pub struct ChatEngine {
    classifier: IntentClassifier,
    extractor: CartExtractor,
    handlers: Handlers,
    generator: Arc<dyn Generator>,
    memory: Arc<MemoryStore>,
    locks: SessionLocks,
    max_tokens: u32,
}

impl ChatEngine {
    pub fn new(
        config: &AgentConfig,
        prompts: Arc<PromptBook>,
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        let top_k = config.knowledge.top_k;
        Self {
            classifier: IntentClassifier::new(prompts.clone(), generator.clone()),
            extractor: CartExtractor::new(
                prompts.clone(),
                generator.clone(),
                retriever.clone(),
                top_k,
            ),
            handlers: Handlers::new(
                prompts,
                retriever,
                top_k,
                config.conversation.complaint_clarify_turns,
            ),
            generator,
            memory,
            locks: SessionLocks::new(),
            max_tokens: config.llm.max_tokens,
        }
    }

    /// Run one turn for a session
    ///
    /// `intent_hint` skips classification (quick-action buttons); labels
    /// outside the known set are routed to GREETING.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        user_message: &str,
        intent_hint: Option<&str>,
    ) -> Result<Turn, TurnError> {
        validate(session_id, user_message)?;

        let guard = self.locks.acquire(session_id).await;
        let mut state = self.memory.load_state(session_id).await?;
        let prior_cart = state.cart.clone();

        let is_init = user_message.trim() == INIT_SENTINEL;
        let user = Message::user(user_message);
        state.push_messages(vec![user.clone()]);

        state.current_intent = match intent_hint {
            Some(label) => resolve_label(label),
            None if is_init => Intent::Greeting,
            None => {
                let classification = self.classifier.classify(&state.messages).await;
                if classification.raw.trim().is_empty() {
                    tracing::debug!(session_id, "Classifier gave no answer");
                }
                classification.intent
            }
        };
        let route = route(state.current_intent);

        if route == Route::ExtractThenOrder {
            let updates = self.extractor.extract(&state).await;
            state.apply_cart_updates(Some(&updates));
        }

        let output = self.handlers.handle(route.handler(), &state).await;
        state.apply_cart_updates(output.cart_updates.as_deref());
        state.final_response = output.reply.text().to_string();
        state.temperature = output.temperature;

        let changed_cart = (state.cart != prior_cart).then_some(&state.cart);
        let stored_user = (!is_init).then_some(&user);
        self.memory
            .record_user_turn(session_id, stored_user, changed_cart)
            .await?;

        tracing::debug!(session_id, output = %state.final_response, "Handler output");
        tracing::info!(
            session_id,
            intent = %state.current_intent,
            ?route,
            cart_lines = state.cart.len(),
            temperature = state.temperature,
            active_sessions = self.locks.active(),
            "Turn routed"
        );

        let stream = self.spawn_reply(
            session_id.to_string(),
            output.reply,
            state.temperature,
            guard,
        );
        Ok(Turn {
            intent: state.current_intent,
            stream,
        })
    }

    /// Produce the reply in a background task that also commits it
    fn spawn_reply(
        &self,
        session_id: String,
        reply: Reply,
        temperature: f32,
        guard: SessionGuard,
    ) -> TurnStream {
        let (tx, mut rx) = mpsc::channel::<String>(32);
        let generator = self.generator.clone();
        let memory = self.memory.clone();
        let max_tokens = self.max_tokens;

        tokio::spawn(async move {
            let full_text = match reply {
                Reply::Direct(text) => {
                    let _ = tx.send(text.clone()).await;
                    Some(text)
                }
                Reply::Prompt(prompt) => {
                    generate_reply(generator.as_ref(), &prompt, max_tokens, temperature, &tx).await
                }
            };

            if let Some(text) = full_text {
                if let Err(e) = memory.save_message(&session_id, &Message::assistant(text)).await {
                    tracing::error!(session_id = %session_id, error = %e, "Failed to commit assistant message");
                }
            }

            // Close the stream only after the commit, then release the session
            drop(tx);
            drop(guard);
        });

        Box::pin(async_stream::stream! {
            while let Some(chunk) = rx.recv().await {
                yield chunk;
            }
        })
    }

    /// Current cart of a session
    pub async fn cart(&self, session_id: &str) -> Result<CartSummary, TurnError> {
        let cart = self.memory.get_cart(session_id).await?;
        Ok(CartSummary::from(&cart))
    }

    /// Stored history of a session
    pub async fn transcript(&self, session_id: &str) -> Result<Vec<StoredMessage>, TurnError> {
        Ok(self.memory.get_transcript(session_id).await?)
    }

    /// Known sessions, most recently active first
    pub async fn sessions(&self) -> Result<Vec<String>, TurnError> {
        Ok(self.memory.list_sessions().await?)
    }
}

fn validate(session_id: &str, user_message: &str) -> Result<(), TurnError> {
    if session_id.trim().is_empty() {
        return Err(TurnError::InvalidInput("session_id must not be empty".into()));
    }
    if user_message.trim().is_empty() {
        return Err(TurnError::InvalidInput("message must not be empty".into()));
    }
    if user_message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(TurnError::InvalidInput(format!(
            "message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

/// Stream a generated reply into `tx`; `None` if generation failed
///
/// Sending continues to succeed-or-ignore after the receiver is gone, so the
/// full text is still collected for the commit.
async fn generate_reply(
    generator: &dyn Generator,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
    tx: &mpsc::Sender<String>,
) -> Option<String> {
    let mut stream = match generator.generate_stream(prompt, max_tokens, temperature).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "Generation failed to start");
            let _ = tx.send(GENERATION_FAILED_NOTICE.trim_start().to_string()).await;
            return None;
        }
    };

    let mut full = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(text) => {
                full.push_str(&text);
                let _ = tx.send(text).await;
            }
            Err(e) => {
                tracing::error!(error = %e, partial_len = full.len(), "Generation failed mid-stream");
                let _ = tx.send(GENERATION_FAILED_NOTICE.to_string()).await;
                return None;
            }
        }
    }
    Some(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::core::cart::CartUpdate;
    use crate::test_support::{RecordingRetriever, Scripted, ScriptedGenerator};

    struct Harness {
        engine: ChatEngine,
        generator: Arc<ScriptedGenerator>,
        retriever: Arc<RecordingRetriever>,
        memory: Arc<MemoryStore>,
    }

    async fn harness(script: Vec<Scripted>) -> Harness {
        let generator = Arc::new(ScriptedGenerator::new(script));
        let retriever = Arc::new(RecordingRetriever::new(&[
            "Menu Item: Classic Burger\nPrice: $8.99",
            "Menu Item: Vanilla Shake\nPrice: $4.50",
        ]));
        let memory = Arc::new(MemoryStore::new_in_memory().await.unwrap());
        let engine = ChatEngine::new(
            &AgentConfig::default(),
            Arc::new(PromptBook::default()),
            generator.clone(),
            retriever.clone(),
            memory.clone(),
        );
        Harness {
            engine,
            generator,
            retriever,
            memory,
        }
    }

    fn text(s: &str) -> Scripted {
        Scripted::Text(s.to_string())
    }

    async fn run(engine: &ChatEngine, session: &str, message: &str) -> (Intent, String) {
        let turn = engine.handle_turn(session, message, None).await.unwrap();
        let reply: Vec<String> = turn.stream.collect().await;
        (turn.intent, reply.concat())
    }

    #[tokio::test]
    async fn test_order_turn_updates_cart_and_commits() {
        let h = harness(vec![
            text("ORDER"),
            text(r#"[{"name": "Classic Burger", "price": 8.99, "quantity": 2}]"#),
            text("Rosy here! Two Classic Burgers, coming up!"),
        ])
        .await;

        let (intent, reply) = run(&h.engine, "s1", "Two classic burgers please").await;
        assert_eq!(intent, Intent::Order);
        assert_eq!(reply, "Rosy here! Two Classic Burgers, coming up!");

        let state = h.memory.load_state("s1").await.unwrap();
        assert_eq!(state.cart["Classic Burger"].quantity, 2);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].role, Role::Assistant);
        assert_eq!(state.messages[1].content, reply);

        let summary = h.engine.cart("s1").await.unwrap();
        assert_eq!(summary.total, 17.98);

        let calls = h.generator.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].max_tokens, 300);
        assert_eq!(calls[2].temperature, 0.3);
    }

    #[tokio::test]
    async fn test_cart_accumulates_across_turns() {
        let h = harness(vec![
            text("ORDER"),
            text(r#"[{"name": "Classic Burger", "price": 8.99, "quantity": 2}]"#),
            text("Added!"),
            text("REMOVE"),
            text(r#"[{"name": "Classic Burger", "price": 8.99, "quantity": -2}]"#),
            text("Removed!"),
            text("HISTORY"),
        ])
        .await;

        run(&h.engine, "s1", "Two classic burgers").await;
        let (intent, _) = run(&h.engine, "s1", "Actually remove the burgers").await;
        assert_eq!(intent, Intent::Remove);
        assert!(h.memory.load_state("s1").await.unwrap().cart.is_empty());

        let (intent, reply) = run(&h.engine, "s1", "What did I order?").await;
        assert_eq!(intent, Intent::History);
        assert!(reply.contains("haven't ordered anything yet"));
        // HISTORY answered without a generation call
        assert_eq!(h.generator.calls().len(), 7);
    }

    #[tokio::test]
    async fn test_store_info_turn() {
        let h = harness(vec![text("STORE_INFO"), text("We open at 10.")]).await;

        let (intent, _) = run(&h.engine, "s1", "What are your opening hours?").await;
        assert_eq!(intent, Intent::StoreInfo);

        let searches = h.retriever.calls();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].filter, Some(crate::knowledge::info_filter()));
    }

    #[tokio::test]
    async fn test_first_greeting_has_no_retrieval() {
        let h = harness(vec![text("GREETING"), text("Rosy here! Welcome!")]).await;

        let (intent, reply) = run(&h.engine, "s1", "Hi there!").await;
        assert_eq!(intent, Intent::Greeting);
        assert_eq!(reply, "Rosy here! Welcome!");
        assert!(h.retriever.calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_sentinel_skips_classifier_and_history() {
        let h = harness(vec![text("Rosy here! Come on in!")]).await;

        let (intent, _) = run(&h.engine, "s1", INIT_SENTINEL).await;
        assert_eq!(intent, Intent::Greeting);

        let calls = h.generator.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].prompt.contains(INIT_SENTINEL));

        let state = h.memory.load_state("s1").await.unwrap();
        assert_eq!(state.messages, vec![Message::assistant("Rosy here! Come on in!")]);
    }

    #[tokio::test]
    async fn test_cancel_resets_cart() {
        let h = harness(vec![
            text("ORDER"),
            text(r#"[{"name": "Vanilla Shake", "price": 4.5, "quantity": 1}]"#),
            text("One shake!"),
            text("CANCEL"),
            text("Your order has been cancelled."),
        ])
        .await;

        run(&h.engine, "s1", "One vanilla shake").await;
        assert_eq!(h.engine.cart("s1").await.unwrap().items.len(), 1);

        let (intent, _) = run(&h.engine, "s1", "Cancel my order").await;
        assert_eq!(intent, Intent::Cancel);
        assert!(h.engine.cart("s1").await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_ends_with_notice_and_skips_commit() {
        let h = harness(vec![text("MENU_QA"), Scripted::FailMidStream("We have ".into())]).await;

        let (_, reply) = run(&h.engine, "s1", "What burgers do you have?").await;
        assert!(reply.starts_with("We have "));
        assert!(reply.ends_with(GENERATION_FAILED_NOTICE));

        let state = h.memory.load_state("s1").await.unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_generation_start_failure_is_inline() {
        let h = harness(vec![text("GREETING"), Scripted::Fail]).await;
        let (_, reply) = run(&h.engine, "s1", "Hello").await;
        assert_eq!(reply, GENERATION_FAILED_NOTICE.trim_start());
    }

    #[tokio::test]
    async fn test_commit_survives_dropped_stream() {
        let h = harness(vec![text("GREETING"), text("Rosy here! Hello there friend")]).await;

        let turn = h.engine.handle_turn("s1", "Hello", None).await.unwrap();
        drop(turn.stream);

        // The next turn waits for the session lock, which is held until the commit
        let turn = h.engine.handle_turn("s1", INIT_SENTINEL, None).await.unwrap();
        drop(turn.stream);
        let state = h.memory.load_state("s1").await.unwrap();
        assert_eq!(state.messages[1].content, "Rosy here! Hello there friend");
    }

    #[tokio::test]
    async fn test_intent_hint_bypasses_classifier() {
        let h = harness(vec![text("Cleared!")]).await;
        let turn = h.engine.handle_turn("s1", "cancel", Some("cancel")).await.unwrap();
        assert_eq!(turn.intent, Intent::Cancel);

        let turn = h.engine.handle_turn("s2", "hmm", Some("dance")).await.unwrap();
        assert_eq!(turn.intent, Intent::Greeting);
    }

    #[tokio::test]
    async fn test_remove_hint_reports_remove() {
        let h = harness(vec![
            text(r#"[{"name": "Classic Burger", "price": 8.99, "quantity": -1}]"#),
            text("Taken off!"),
        ])
        .await;
        let turn = h.engine.handle_turn("s1", "drop a burger", Some("remove")).await.unwrap();
        assert_eq!(turn.intent, Intent::Remove);
        let reply: Vec<String> = turn.stream.collect().await;
        assert_eq!(reply.concat(), "Taken off!");
    }

    #[tokio::test]
    async fn test_session_lock_released_after_turn() {
        let h = harness(vec![text("GREETING"), text("Hi!")]).await;
        run(&h.engine, "s1", "Hello").await;
        // The reply task drops its guard right after the commit
        for _ in 0..50 {
            if h.engine.locks.active() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(h.engine.locks.active(), 0);
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let h = harness(vec![]).await;

        for (session, message) in [("", "hi"), ("s1", "   "), ("s1", &"x".repeat(2001)[..])] {
            let err = h.engine.handle_turn(session, message, None).await.err().unwrap();
            assert!(matches!(err, TurnError::InvalidInput(_)));
        }
        assert!(h.generator.calls().is_empty());
    }

    #[test]
    fn test_cart_summary_rounds_total() {
        let cart = cart::reduce(
            &Cart::new(),
            Some(&[
                CartUpdate::item("Classic Burger", 8.99, 2),
                CartUpdate::item("Vanilla Shake", 4.5, 1),
            ]),
        );
        let summary = CartSummary::from(&cart);
        assert_eq!(summary.items.len(), 2);
        assert_eq!(summary.total, 22.48);
    }
}
