//! Per-intent response handlers
//!
//! A handler reads the conversation state and decides what to say: either a
//! persona prompt for the generator or a deterministic reply. Handlers never
//! write state; cart changes are returned as updates for the reducer.

use std::sync::Arc;

use crate::config::PromptBook;
use crate::conversation::ConversationState;
use crate::knowledge::{info_filter, menu_filter, Filter, Retriever};

use super::cart::{render_receipt, CartUpdate};
use super::intent::Intent;

/// First message a client sends when a chat window opens
pub const INIT_SENTINEL: &str = "___INIT_GREETING___";

const WALK_IN_QUERY: &str = "(A customer just walked in. Welcome them to the store.)";
const NO_CONTEXT: &str = "No relevant information found.";

const ORDER_TEMPERATURE: f32 = 0.3;
const HISTORY_TEMPERATURE: f32 = 0.0;
const COMPLAINT_TEMPERATURE: f32 = 0.2;
const MENU_QA_TEMPERATURE: f32 = 0.5;
const STORE_INFO_TEMPERATURE: f32 = 0.2;
const CANCEL_TEMPERATURE: f32 = 0.0;
const REMOVE_TEMPERATURE: f32 = 0.3;

const STAFF: &str = "rosy";
const MANAGER: &str = "gordon";

/// What the turn should answer with
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Prompt to send to the generator
    Prompt(String),
    /// Final text, no generation needed
    Direct(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Prompt(text) | Reply::Direct(text) => text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandlerOutput {
    pub reply: Reply,
    pub temperature: f32,
    /// Cart updates to fold into the session cart
    pub cart_updates: Option<Vec<CartUpdate>>,
}

impl HandlerOutput {
    fn prompt(prompt: String, temperature: f32) -> Self {
        Self {
            reply: Reply::Prompt(prompt),
            temperature,
            cart_updates: None,
        }
    }
}

pub struct Handlers {
    prompts: Arc<PromptBook>,
    retriever: Arc<dyn Retriever>,
    top_k: usize,
    complaint_clarify_turns: usize,
}

impl Handlers {
    pub fn new(
        prompts: Arc<PromptBook>,
        retriever: Arc<dyn Retriever>,
        top_k: usize,
        complaint_clarify_turns: usize,
    ) -> Self {
        Self {
            prompts,
            retriever,
            top_k,
            complaint_clarify_turns,
        }
    }

    pub async fn handle(&self, intent: Intent, state: &ConversationState) -> HandlerOutput {
        match intent {
            Intent::Order => self.order(state).await,
            Intent::History => self.history(state),
            Intent::Complaint => self.complaint(state).await,
            Intent::Greeting => self.greeting(state),
            Intent::MenuQa => self.menu_qa(state).await,
            Intent::StoreInfo => self.store_info(state).await,
            Intent::Cancel => self.cancel(state),
            Intent::Remove => self.remove(state),
        }
    }

    /// Retrieved passages joined in rank order; failures read as no context
    async fn context(&self, query: &str, filter: Filter) -> String {
        match self.retriever.search(query, self.top_k, Some(&filter)).await {
            Ok(passages) => passages.join("\n"),
            Err(e) => {
                tracing::warn!(error = %e, ?filter, "Retrieval failed, answering without context");
                String::new()
            }
        }
    }

    async fn order(&self, state: &ConversationState) -> HandlerOutput {
        let query = state.last_message();
        let mut context = or_no_context(self.context(query, menu_filter()).await);
        if !state.cart.is_empty() {
            context.push_str("\n\n[Current Order]\n");
            context.push_str(&render_receipt(&state.cart));
        }

        let task = self.prompts.intent_task(Intent::Order);
        let prompt = self.prompts.build_prompt(STAFF, task, &context, query);
        HandlerOutput::prompt(prompt, ORDER_TEMPERATURE)
    }

    fn history(&self, state: &ConversationState) -> HandlerOutput {
        let text = if state.cart.is_empty() {
            "You haven't ordered anything yet! 📝 How about trying our Classic Burger? 🍔".to_string()
        } else {
            format!(
                "Here is your order so far! 🧾\n{}\nIs this correct? 😊",
                render_receipt(&state.cart)
            )
        };

        HandlerOutput {
            reply: Reply::Direct(text),
            temperature: HISTORY_TEMPERATURE,
            cart_updates: None,
        }
    }

    async fn complaint(&self, state: &ConversationState) -> HandlerOutput {
        let query = state.last_message();

        if state.user_turns() < self.complaint_clarify_turns {
            tracing::info!(turns = state.user_turns(), "Early complaint, asking for details");
            let task = self.prompts.task("complaint_clarify");
            let prompt = self.prompts.build_prompt(MANAGER, task, NO_CONTEXT, query);
            return HandlerOutput::prompt(prompt, COMPLAINT_TEMPERATURE);
        }

        tracing::info!("Complaint escalated to manager with store policy");
        let context = or_no_context(self.context(query, info_filter()).await);
        let task = self.prompts.intent_task(Intent::Complaint);
        let prompt = self.prompts.build_prompt(MANAGER, task, &context, query);
        HandlerOutput::prompt(prompt, COMPLAINT_TEMPERATURE)
    }

    fn greeting(&self, state: &ConversationState) -> HandlerOutput {
        let last = state.last_message();
        let query = if last.trim() == INIT_SENTINEL {
            WALK_IN_QUERY
        } else {
            last
        };

        let task = self.prompts.intent_task(Intent::Greeting);
        let prompt = self.prompts.build_prompt(STAFF, task, "", query);
        HandlerOutput::prompt(prompt, self.prompts.persona(STAFF).temperature)
    }

    async fn menu_qa(&self, state: &ConversationState) -> HandlerOutput {
        let query = state.last_message();
        let context = or_no_context(self.context(query, menu_filter()).await);
        let task = self.prompts.intent_task(Intent::MenuQa);
        let prompt = self.prompts.build_prompt(STAFF, task, &context, query);
        HandlerOutput::prompt(prompt, MENU_QA_TEMPERATURE)
    }

    async fn store_info(&self, state: &ConversationState) -> HandlerOutput {
        let query = state.last_message();
        let context = or_no_context(self.context(query, info_filter()).await);
        let task = self.prompts.intent_task(Intent::StoreInfo);
        let prompt = self.prompts.build_prompt(STAFF, task, &context, query);
        HandlerOutput::prompt(prompt, STORE_INFO_TEMPERATURE)
    }

    fn cancel(&self, state: &ConversationState) -> HandlerOutput {
        let task = self.prompts.intent_task(Intent::Cancel);
        let prompt = self
            .prompts
            .build_prompt(STAFF, task, "The order has been cleared.", state.last_message());

        HandlerOutput {
            reply: Reply::Prompt(prompt),
            temperature: CANCEL_TEMPERATURE,
            cart_updates: Some(vec![CartUpdate::reset()]),
        }
    }

    /// Describes the removal only; the cart change itself comes from extraction
    fn remove(&self, state: &ConversationState) -> HandlerOutput {
        let context = if state.cart.is_empty() {
            "The order is empty.".to_string()
        } else {
            render_receipt(&state.cart)
        };
        let task = self.prompts.intent_task(Intent::Remove);
        let prompt = self
            .prompts
            .build_prompt(STAFF, task, &context, state.last_message());
        HandlerOutput::prompt(prompt, REMOVE_TEMPERATURE)
    }
}

fn or_no_context(context: String) -> String {
    if context.trim().is_empty() {
        NO_CONTEXT.to_string()
    } else {
        context
    }
}
