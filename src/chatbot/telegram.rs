//! Telegram transport using teloxide.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatKind, FileId, MessageEntityKind, MessageId, ReplyParameters};
use tracing::{info, warn};

use crate::chatbot::message::{InboundEvent, Media, MediaKind, Mention, ReplyTo};

const DEFAULT_AUDIO_MIME: &str = "audio/ogg";
const PHOTO_MIME: &str = "image/jpeg";

/// Outbound side of the chat platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send plain text, optionally as a reply. Returns the new message ID.
    async fn send_reply(&self, chat_id: i64, reply_to: Option<i64>, text: &str) -> Result<i64, String>;

    /// Fetch an attachment's bytes.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>, String>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_reply(&self, chat_id: i64, reply_to: Option<i64>, text: &str) -> Result<i64, String> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);

        if let Some(msg_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;

        info!("📥 Downloaded {} ({} bytes)", file.path, data.len());
        Ok(data)
    }
}

fn display_name(user: &teloxide::types::User) -> String {
    user.username.clone().unwrap_or_else(|| user.first_name.clone())
}

fn media_of(msg: &Message) -> Option<Media> {
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(Media {
            kind: MediaKind::Image,
            file_id: photo.file.id.0.clone(),
            mime_type: PHOTO_MIME.to_string(),
        });
    }

    let audio = msg
        .voice()
        .map(|v| (&v.file.id, v.mime_type.as_ref()))
        .or_else(|| msg.audio().map(|a| (&a.file.id, a.mime_type.as_ref())));
    if let Some((file_id, mime)) = audio {
        return Some(Media {
            kind: MediaKind::Audio,
            file_id: file_id.0.clone(),
            mime_type: mime.map(|m| m.to_string()).unwrap_or_else(|| DEFAULT_AUDIO_MIME.to_string()),
        });
    }

    let other = msg
        .document()
        .map(|d| &d.file.id)
        .or_else(|| msg.video().map(|v| &v.file.id))
        .or_else(|| msg.animation().map(|a| &a.file.id))
        .or_else(|| msg.sticker().map(|s| &s.file.id))
        .or_else(|| msg.video_note().map(|v| &v.file.id));
    other.map(|file_id| Media {
        kind: MediaKind::Unsupported,
        file_id: file_id.0.clone(),
        mime_type: "application/octet-stream".to_string(),
    })
}

fn mentions_of(msg: &Message) -> Vec<Mention> {
    let entities = msg.parse_entities().or_else(|| msg.parse_caption_entities());
    let Some(entities) = entities else {
        return Vec::new();
    };

    entities
        .iter()
        .filter_map(|entity| match entity.kind() {
            MessageEntityKind::Mention => {
                Some(Mention::Username(entity.text().trim_start_matches('@').to_string()))
            }
            MessageEntityKind::TextMention { user } => Some(Mention::UserId(user.id.0 as i64)),
            _ => None,
        })
        .collect()
}

/// Convert a teloxide message into a platform-neutral event.
pub fn to_inbound_event(msg: &Message, bot_user_id: i64) -> InboundEvent {
    let user = msg.from.as_ref();
    let sender_id = user.map(|u| u.id.0 as i64).unwrap_or(0);
    let sender = user.map(display_name).unwrap_or_else(|| "unknown".to_string());

    let body = msg.text().or_else(|| msg.caption()).unwrap_or("").to_string();

    let reply_to = msg.reply_to_message().map(|reply| {
        let reply_user = reply.from.as_ref();
        ReplyTo {
            message_id: reply.id.0 as i64,
            user_id: reply_user.map(|u| u.id.0 as i64).unwrap_or(0),
            username: reply_user.map(display_name).unwrap_or_else(|| "unknown".to_string()),
        }
    });

    InboundEvent {
        message_id: msg.id.0 as i64,
        chat_id: msg.chat.id.0,
        is_group: matches!(msg.chat.kind, ChatKind::Public(_)),
        from_me: user.is_some() && sender_id == bot_user_id,
        sender_id,
        sender,
        body,
        media: media_of(msg),
        reply_to,
        mentions: mentions_of(msg),
    }
}
