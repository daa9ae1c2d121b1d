//! Scripted collaborators for pipeline tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::knowledge::{Filter, KnowledgeError, Retriever};
use crate::providers::{Generator, ProviderError, TextStream};

/// What the scripted generator does for one call
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Text(String),
    /// Fail before producing anything
    Fail,
    /// Stream the text, then fail
    FailMidStream(String),
}

#[derive(Debug, Clone)]
pub(crate) struct GenerationCall {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Generator that replays scripted replies in order; exhausted scripts
/// reply with an empty string
#[derive(Default)]
pub(crate) struct ScriptedGenerator {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<GenerationCall>>,
}

impl ScriptedGenerator {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Scripted::Text(r.to_string())))
    }

    pub fn calls(&self) -> Vec<GenerationCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Scripted {
        self.calls.lock().unwrap().push(GenerationCall {
            prompt: prompt.to_string(),
            max_tokens,
            temperature,
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Scripted::Text(String::new()))
    }
}

fn backend_down() -> ProviderError {
    ProviderError::InvalidResponse("backend unavailable".into())
}

fn words(text: &str) -> Vec<Result<String, ProviderError>> {
    text.split_inclusive(' ').map(|w| Ok(w.to_string())).collect()
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        match self.next(prompt, max_tokens, temperature) {
            Scripted::Text(text) => Ok(text),
            Scripted::Fail | Scripted::FailMidStream(_) => Err(backend_down()),
        }
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<TextStream, ProviderError> {
        let items = match self.next(prompt, max_tokens, temperature) {
            Scripted::Text(text) => words(&text),
            Scripted::Fail => return Err(backend_down()),
            Scripted::FailMidStream(text) => {
                let mut items = words(&text);
                items.push(Err(backend_down()));
                items
            }
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SearchCall {
    pub query: String,
    pub k: usize,
    pub filter: Option<Filter>,
}

/// Retriever returning fixed passages and recording every query
pub(crate) struct RecordingRetriever {
    passages: Vec<String>,
    fail: bool,
    calls: Mutex<Vec<SearchCall>>,
}

impl RecordingRetriever {
    pub fn new(passages: &[&str]) -> Self {
        Self {
            passages: passages.iter().map(|p| p.to_string()).collect(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[])
        }
    }

    pub fn calls(&self) -> Vec<SearchCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for RecordingRetriever {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<String>, KnowledgeError> {
        self.calls.lock().unwrap().push(SearchCall {
            query: query.to_string(),
            k,
            filter: filter.cloned(),
        });
        if self.fail {
            return Err(KnowledgeError::SearchFailed("index offline".into()));
        }
        Ok(self.passages.iter().take(k).cloned().collect())
    }
}
