//! Message routing: gating, command dispatch, text and media handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::chatbot::commands::{self, Command, CommandContext};
use crate::chatbot::database::{Database, StoreError};
use crate::chatbot::gemini::{GenerationError, GenerationRequest, Generator};
use crate::chatbot::inactivity::InactivityTimers;
use crate::chatbot::message::{InboundEvent, Media, MediaKind, Mention, Role};
use crate::chatbot::reply;
use crate::chatbot::settings::{self, EffectiveConfig, GenerationParams};
use crate::chatbot::telegram::Transport;

/// Chatbot configuration.
#[derive(Debug, Clone)]
pub struct ChatbotConfig {
    pub bot_user_id: i64,
    pub bot_username: Option<String>,
    /// Display name used when no active prompt names the bot.
    pub default_bot_name: String,
    pub defaults: GenerationParams,
    /// Idle period after which a chat's session expires. `None` disables the timers.
    pub inactivity: Option<Duration>,
    pub reset_history_on_inactivity: bool,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            bot_user_id: 0,
            bot_username: None,
            default_bot_name: crate::config::DEFAULT_BOT_NAME.to_string(),
            defaults: GenerationParams::default(),
            inactivity: None,
            reset_history_on_inactivity: false,
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Store(StoreError),
    Transport(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Store(e) => write!(f, "store error: {e}"),
            EngineError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

/// The chatbot engine.
pub struct ChatbotEngine {
    config: ChatbotConfig,
    database: Arc<Database>,
    transport: Arc<dyn Transport>,
    generator: Arc<dyn Generator>,
    inactivity: Option<InactivityTimers>,
    /// Last response sent per chat, for the repeated-response check.
    last_responses: Arc<Mutex<HashMap<i64, String>>>,
}

impl ChatbotEngine {
    pub fn new(
        config: ChatbotConfig,
        database: Arc<Database>,
        transport: Arc<dyn Transport>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let last_responses = Arc::new(Mutex::new(HashMap::new()));

        let inactivity = config.inactivity.filter(|p| !p.is_zero()).map(|period| {
            let db = database.clone();
            let last = last_responses.clone();
            let reset = config.reset_history_on_inactivity;
            InactivityTimers::new(period, move |chat_id| {
                info!("💤 Chat {} idle for {:?}", chat_id, period);
                forget_response(&last, chat_id);
                if !reset {
                    return;
                }
                match db.reset_history(chat_id) {
                    Ok(removed) => info!("🧹 Cleared {} idle message(s) in chat {}", removed, chat_id),
                    Err(e) => error!("Failed to clear idle chat {}: {}", chat_id, e),
                }
            })
        });

        Self {
            config,
            database,
            transport,
            generator,
            inactivity,
            last_responses,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    #[cfg(test)]
    pub(crate) fn last_response(&self, chat_id: i64) -> Option<String> {
        self.last_responses.lock().ok()?.get(&chat_id).cloned()
    }

    /// Route one inbound event. Never fails; errors become an apology reply.
    pub async fn handle_event(&self, event: InboundEvent) {
        if event.from_me {
            debug!("Ignoring own message {} in chat {}", event.message_id, event.chat_id);
            return;
        }
        if event.body.trim().is_empty() && event.media.is_none() {
            return;
        }

        info!(
            "📨 {} ({}) in chat {}: \"{}\"",
            event.sender,
            event.sender_id,
            event.chat_id,
            event.body.chars().take(50).collect::<String>()
        );

        match self.process(&event).await {
            Ok(()) => {}
            Err(EngineError::Transport(e)) => error!("Giving up on chat {}: {}", event.chat_id, e),
            Err(e) => {
                error!("Failed to handle message {} in chat {}: {}", event.message_id, event.chat_id, e);
                if let Err(e) = self.send(&event, reply::UNEXPECTED_ERROR).await {
                    error!("Failed to send apology to chat {}: {}", event.chat_id, e);
                }
            }
        }

        if let Some(ref timers) = self.inactivity {
            timers.touch(event.chat_id);
        }
    }

    async fn process(&self, event: &InboundEvent) -> Result<(), EngineError> {
        let is_command = commands::is_command(&event.body);

        // Everything except commands is recorded, even when the bot stays silent
        if !is_command {
            self.database
                .append_message(event.chat_id, &event.sender, &event.history_content(), Role::User)?;
        }

        let effective = settings::resolve(
            &self.database,
            event.chat_id,
            &self.config.defaults,
            &self.config.default_bot_name,
        )?;

        if !self.should_respond(event, &effective.bot_name) {
            debug!("Not addressed in group {}, staying silent", event.chat_id);
            return Ok(());
        }

        if is_command {
            let ctx = CommandContext {
                db: &self.database,
                chat_id: event.chat_id,
                defaults: &self.config.defaults,
                default_bot_name: &self.config.default_bot_name,
            };
            let command = commands::parse(&event.body);
            if command == Command::Reset {
                forget_response(&self.last_responses, event.chat_id);
            }
            let response = commands::handle_command(&ctx, command);
            return self.send(event, &response).await;
        }

        match event.media {
            Some(ref media) => self.handle_media(event, media, effective).await,
            None => self.handle_text(event, effective).await,
        }
    }

    /// Direct chats always get a reply. In groups the bot must be mentioned,
    /// named, or quoted.
    pub fn should_respond(&self, event: &InboundEvent, bot_name: &str) -> bool {
        if !event.is_group {
            return true;
        }

        let mentioned = event.mentions.iter().any(|mention| match mention {
            Mention::Username(name) => self
                .config
                .bot_username
                .as_deref()
                .is_some_and(|own| own.eq_ignore_ascii_case(name)),
            Mention::UserId(id) => *id == self.config.bot_user_id,
        });
        if mentioned {
            return true;
        }

        if event
            .reply_to
            .as_ref()
            .is_some_and(|r| r.user_id == self.config.bot_user_id)
        {
            return true;
        }

        let name = bot_name.trim().to_lowercase();
        !name.is_empty() && event.body.to_lowercase().contains(&name)
    }

    async fn handle_text(&self, event: &InboundEvent, effective: EffectiveConfig) -> Result<(), EngineError> {
        let history = self.database.history(event.chat_id)?;
        let prompt = format!("{}\n{}:", history.join("\n"), effective.bot_name);
        debug!("Prompt for chat {}: {} line(s), {} chars", event.chat_id, history.len(), prompt.len());

        let bot_name = effective.bot_name.clone();
        let result = self.generator.generate(GenerationRequest::text(effective, prompt)).await;
        self.deliver(event, &bot_name, result).await
    }

    async fn handle_media(
        &self,
        event: &InboundEvent,
        media: &Media,
        effective: EffectiveConfig,
    ) -> Result<(), EngineError> {
        let download_failed = match media.kind {
            MediaKind::Unsupported => {
                info!("Unsupported attachment in chat {}", event.chat_id);
                return self.send(event, reply::UNSUPPORTED_MEDIA).await;
            }
            MediaKind::Image => reply::IMAGE_FAILED,
            MediaKind::Audio => reply::AUDIO_FAILED,
        };

        let data = match self.transport.download(&media.file_id).await {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to download {} in chat {}: {}", media.file_id, event.chat_id, e);
                return self.send(event, download_failed).await;
            }
        };

        let bot_name = effective.bot_name.clone();
        let request = match media.kind {
            MediaKind::Audio => GenerationRequest::transcription(effective, media.mime_type.clone(), data),
            _ => GenerationRequest::image(effective, &event.body, media.mime_type.clone(), data),
        };
        let result = self.generator.generate(request).await;
        self.deliver(event, &bot_name, result).await
    }

    /// Record and send a generation result, or its fallback apology.
    async fn deliver(
        &self,
        event: &InboundEvent,
        bot_name: &str,
        result: Result<String, GenerationError>,
    ) -> Result<(), EngineError> {
        let text = match result {
            Ok(text) if !text.trim().is_empty() => reply::normalize(&text),
            Ok(_) => {
                warn!("Empty response for chat {}", event.chat_id);
                return self.send(event, GenerationError::Empty.fallback_reply()).await;
            }
            Err(e) => {
                match e {
                    GenerationError::Transport(_) => error!("Generation failed for chat {}: {}", event.chat_id, e),
                    _ => warn!("Generation failed for chat {}: {}", event.chat_id, e),
                }
                return self.send(event, e.fallback_reply()).await;
            }
        };

        let repeated = match self.last_responses.lock() {
            Ok(last) => last
                .get(&event.chat_id)
                .is_some_and(|previous| reply::responses_similar(previous, &text)),
            Err(_) => false,
        };
        if repeated {
            info!("Suppressing repeated response in chat {}", event.chat_id);
            return self.send(event, reply::REPEATED_RESPONSE).await;
        }

        self.database.append_message(event.chat_id, bot_name, &text, Role::Bot)?;
        if let Ok(mut last) = self.last_responses.lock() {
            last.insert(event.chat_id, text.clone());
        }
        self.send(event, &text).await
    }

    /// Normalize and send as a reply to the event. One retry with an apology on failure.
    async fn send(&self, event: &InboundEvent, text: &str) -> Result<(), EngineError> {
        let text = reply::normalize(text);
        match self
            .transport
            .send_reply(event.chat_id, Some(event.message_id), &text)
            .await
        {
            Ok(msg_id) => {
                info!("📤 Replied in chat {} (msg_id: {})", event.chat_id, msg_id);
                Ok(())
            }
            Err(e) => {
                warn!("Send failed in chat {}: {}", event.chat_id, e);
                self.transport
                    .send_reply(event.chat_id, Some(event.message_id), reply::SEND_FAILED)
                    .await
                    .map(|_| ())
                    .map_err(EngineError::Transport)
            }
        }
    }
}

fn forget_response(last_responses: &Mutex<HashMap<i64, String>>, chat_id: i64) {
    if let Ok(mut last) = last_responses.lock() {
        last.remove(&chat_id);
    }
}
