//! Token-budget estimation and context trimming
//!
//! Synthesis conversations are fed everything the sub-task conversations
//! produced; before that payload goes anywhere near the completion
//! endpoint, it is counted against the flow's ceiling and trimmed from the
//! oldest end until it fits. Counting uses tiktoken's cl100k_base encoding
//! with the chat-format framing overhead included, so the estimate tracks
//! what the provider will actually bill.

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::core::llm::ChatMessage;
use crate::error::{Error, Result};

static TOKENIZER: Lazy<CoreBPE> =
    Lazy::new(|| cl100k_base().expect("cl100k_base is bundled with tiktoken-rs"));

// Chat-format framing: role and separator tokens per message, plus the
// fixed priming tokens per request.
const MESSAGE_OVERHEAD: usize = 6;
const CONVERSATION_OVERHEAD: usize = 3;

pub fn count_text(text: &str) -> usize {
    TOKENIZER.encode_with_special_tokens(text).len()
}

pub fn count_message(message: &ChatMessage) -> usize {
    let name_tokens = message
        .name
        .as_deref()
        .map(count_text)
        .unwrap_or(0);
    count_text(&message.content) + name_tokens + MESSAGE_OVERHEAD
}

/// Estimated token cost of a message sequence as one request to `model`.
///
/// cl100k_base covers the gpt-3.5/gpt-4 family this system targets; other
/// model ids are counted with the same encoding and noted at debug level.
pub fn count_messages(messages: &[ChatMessage], model: &str) -> usize {
    if !model.starts_with("gpt-") {
        tracing::debug!("[budget] counting '{model}' with cl100k_base");
    }
    messages.iter().map(count_message).sum::<usize>() + CONVERSATION_OVERHEAD
}

pub fn fits_budget(history: &[ChatMessage], ceiling: usize, model: &str) -> bool {
    count_messages(history, model) < ceiling
}

/// Ordered sub-conversation outputs awaiting synthesis, with eviction from
/// the oldest end. Entries arrive in sub-task order, so "oldest" is always
/// the earliest sub-task — trimming is reproducible run to run.
#[derive(Debug, Clone)]
pub struct AccumulatedContext {
    entries: Vec<ChatMessage>,
    ceiling: usize,
    model: String,
}

impl AccumulatedContext {
    pub fn new(ceiling: usize, model: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            ceiling,
            model: model.into(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn estimated_tokens(&self) -> usize {
        count_messages(&self.entries, &self.model)
    }

    pub fn fits(&self) -> bool {
        fits_budget(&self.entries, self.ceiling, &self.model)
    }

    pub fn evict_oldest(&mut self) -> Option<ChatMessage> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Evict oldest entries until the estimate fits the ceiling. Returns
    /// how many entries were dropped; if the sequence empties without
    /// fitting, the operation cannot proceed.
    pub fn trim_to_fit(&mut self) -> Result<usize> {
        let mut evicted = 0;
        while !self.fits() {
            match self.evict_oldest() {
                Some(dropped) => {
                    evicted += 1;
                    tracing::debug!(
                        "[budget] evicted oldest entry ({} tokens), {} remain",
                        count_message(&dropped),
                        self.entries.len()
                    );
                }
                None => {
                    return Err(Error::InsufficientBudget {
                        ceiling: self.ceiling,
                    })
                }
            }
        }
        Ok(evicted)
    }

    /// Render the surviving entries for embedding in a synthesis prompt.
    pub fn rendered(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_default()
    }
}
