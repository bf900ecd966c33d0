//! Chatbot module - relays Telegram messages to Gemini.

pub mod commands;
pub mod database;
pub mod engine;
pub mod gemini;
pub mod inactivity;
pub mod message;
pub mod prompts;
pub mod reply;
pub mod settings;
pub mod telegram;


pub use database::{Database, StoreError};
pub use engine::{ChatbotConfig, ChatbotEngine, EngineError};
pub use gemini::{GeminiClient, GenerationError, GenerationRequest, Generator};
pub use message::{InboundEvent, Media, MediaKind, Mention, ReplyTo, Role};
pub use settings::{EffectiveConfig, GenerationParams};
pub use telegram::{to_inbound_event, TelegramClient, Transport};
