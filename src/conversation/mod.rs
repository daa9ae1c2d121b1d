//! Conversation types and state management
//!
//! A session's state is threaded through every step of a turn. The two
//! accumulating fields (messages and cart) are only ever changed through
//! named fold functions so the merge policy stays visible.

use serde::{Deserialize, Serialize};

use crate::core::cart::{self, Cart, CartUpdate};
use crate::core::intent::Intent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a stored role, treating anything unrecognised as a user message
    pub fn from_stored(role: &str) -> Self {
        match role {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// Per-session state carried through the turn pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    /// Append-only message history, oldest first
    pub messages: Vec<Message>,

    /// Running cart, always the fold of every update seen so far
    pub cart: Cart,

    /// Intent computed for the current turn
    pub current_intent: Intent,

    /// Prompt (or direct reply) produced by the handler for this turn
    pub final_response: String,

    /// Sampling temperature chosen by the handler
    pub temperature: f32,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            cart: Cart::new(),
            current_intent: Intent::Greeting,
            final_response: String::new(),
            temperature: 0.7,
        }
    }

    /// Restore a state from persisted history and cart
    pub fn restore(messages: Vec<Message>, cart: Cart) -> Self {
        Self {
            messages,
            cart,
            ..Self::new()
        }
    }

    /// Fold new messages into the history
    pub fn push_messages(&mut self, delta: Vec<Message>) {
        let prior = std::mem::take(&mut self.messages);
        self.messages = append_messages(prior, delta);
    }

    /// Fold cart updates into the running cart
    pub fn apply_cart_updates(&mut self, updates: Option<&[CartUpdate]>) {
        self.cart = cart::reduce(&self.cart, updates);
    }

    /// Content of the most recent message, empty if there is none
    pub fn last_message(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// The assistant message immediately preceding the latest message
    pub fn previous_assistant_message(&self) -> Option<&str> {
        let len = self.messages.len();
        if len < 2 {
            return None;
        }
        let prev = &self.messages[len - 2];
        (prev.role == Role::Assistant).then_some(prev.content.as_str())
    }

    /// Number of user messages in the session so far
    pub fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .count()
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge rule for the message history: append, never reorder or truncate
pub fn append_messages(mut prior: Vec<Message>, delta: Vec<Message>) -> Vec<Message> {
    prior.extend(delta);
    prior
}
