//! Named per-chat system instructions.
//!
//! Activation only stores the prompt's name in the chat settings, so editing an
//! active prompt takes effect on the next request.

use tracing::info;

use crate::chatbot::database::{Database, PromptRecord, StoreError};

/// Sentence prepended to every stored prompt so the model self-identifies.
pub fn naming_sentence(name: &str) -> String {
    format!("Your name is {name}.")
}

/// Create or replace a prompt. The stored text starts with the naming sentence.
pub fn set(db: &Database, chat_id: i64, name: &str, text: &str) -> Result<PromptRecord, StoreError> {
    let text = format!("{} {}", naming_sentence(name), text.trim());
    db.upsert_prompt(chat_id, name, &text)?;
    info!("Prompt \"{}\" saved for chat {}", name, chat_id);
    Ok(PromptRecord {
        chat_id,
        name: name.to_string(),
        text,
    })
}

pub fn get(db: &Database, chat_id: i64, name: &str) -> Result<Option<PromptRecord>, StoreError> {
    db.get_prompt(chat_id, name)
}

pub fn list(db: &Database, chat_id: i64) -> Result<Vec<PromptRecord>, StoreError> {
    db.list_prompts(chat_id)
}

/// Point the chat at an existing prompt. Returns false if no prompt has that name.
pub fn activate(db: &Database, chat_id: i64, name: &str) -> Result<bool, StoreError> {
    if db.get_prompt(chat_id, name)?.is_none() {
        return Ok(false);
    }
    db.set_active_prompt(chat_id, Some(name))?;
    info!("Prompt \"{}\" activated for chat {}", name, chat_id);
    Ok(true)
}

pub fn deactivate(db: &Database, chat_id: i64) -> Result<(), StoreError> {
    db.set_active_prompt(chat_id, None)
}
