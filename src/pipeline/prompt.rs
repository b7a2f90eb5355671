//! Grounded prompt construction.
//!
//! Formats retrieved chunks plus the user's query into either a single
//! plain-text prompt or the chat-message form consumed by the completion
//! client. Both fail fast on empty input, before anything external runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::PipelineError;

const CONTEXT_HEADER: &str = "Context from previous messages:";
const INSTRUCTION_LINE: &str = "Using only the context above, answer the following question.";
const SYSTEM_PERSONA: &str = "You are a helpful assistant. Answer the user's question using the \
conversation context included in their message. If the context does not contain the answer, say so.";

/// A retrieved chunk with the attribution fields the prompt shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChunk {
    pub content: String,
    pub sender: String,
    pub created_at: String,
}

impl ContextChunk {
    /// Pulls attribution out of index-entry metadata, tolerating missing
    /// fields with neutral placeholders.
    pub fn from_metadata(content: &str, metadata: &Value) -> Self {
        let sender = metadata
            .get("sender")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let created_at = metadata
            .get("created_at")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown time")
            .to_string();
        Self {
            content: content.to_string(),
            sender,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

fn validate(chunks: &[ContextChunk], query: &str) -> Result<(), PipelineError> {
    if chunks.is_empty() {
        return Err(PipelineError::MissingContext);
    }
    if query.trim().is_empty() {
        return Err(PipelineError::MissingQuery);
    }
    Ok(())
}

fn context_block(chunks: &[ContextChunk]) -> String {
    let mut block = String::from(CONTEXT_HEADER);
    block.push('\n');
    for chunk in chunks {
        block.push_str(&format!(
            "\n[{} at {}]\n{}\n",
            chunk.sender, chunk.created_at, chunk.content
        ));
    }
    block
}

/// Single-string form: header, attributed chunks, instruction line, then
/// the verbatim query.
pub fn build_plain(chunks: &[ContextChunk], query: &str) -> Result<String, PipelineError> {
    validate(chunks, query)?;

    let mut prompt = context_block(chunks);
    prompt.push('\n');
    prompt.push_str(INSTRUCTION_LINE);
    prompt.push('\n');
    prompt.push_str(query);
    Ok(prompt)
}

/// Chat form: a system persona message plus a user message carrying the
/// same context block and the query.
pub fn build_chat(chunks: &[ContextChunk], query: &str) -> Result<Vec<ChatMessage>, PipelineError> {
    validate(chunks, query)?;

    let user_content = format!("{}\n{}\n{}", context_block(chunks), INSTRUCTION_LINE, query);
    Ok(vec![
        ChatMessage {
            role: "system".to_string(),
            content: SYSTEM_PERSONA.to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: user_content,
        },
    ])
}
