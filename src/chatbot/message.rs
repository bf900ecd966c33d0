//! Inbound chat events and stored conversation records.

/// Who wrote a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Bot,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "bot" => Role::Bot,
            _ => Role::User,
        }
    }
}

/// A message record in the conversation store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub chat_id: i64,
    pub sender: String,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub role: Role,
}

impl StoredMessage {
    /// Render as a prompt context line.
    pub fn format(&self) -> String {
        format!("{}: {}", self.sender, self.content)
    }
}

/// The message being replied to.
#[derive(Debug, Clone)]
pub struct ReplyTo {
    pub message_id: i64,
    pub user_id: i64,
    pub username: String,
}

/// A mention entity in the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mention {
    /// `@username`, stored without the `@`.
    Username(String),
    /// Mention of a user without a public username.
    UserId(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Unsupported,
}

/// An attachment reference; bytes are fetched lazily through the transport.
#[derive(Debug, Clone)]
pub struct Media {
    pub kind: MediaKind,
    pub file_id: String,
    pub mime_type: String,
}

impl Media {
    /// Placeholder content recorded when the attachment has no caption.
    pub fn placeholder(&self) -> &'static str {
        match self.kind {
            MediaKind::Image => "[image]",
            MediaKind::Audio => "[audio]",
            MediaKind::Unsupported => "[attachment]",
        }
    }
}

/// A platform-neutral inbound chat event.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub message_id: i64,
    pub chat_id: i64,
    pub is_group: bool,
    /// Sent by the bot account itself.
    pub from_me: bool,
    pub sender_id: i64,
    pub sender: String,
    /// Message text, or the media caption.
    pub body: String,
    pub media: Option<Media>,
    pub reply_to: Option<ReplyTo>,
    pub mentions: Vec<Mention>,
}

impl InboundEvent {
    /// Content to record in history for this event.
    pub fn history_content(&self) -> String {
        let body = self.body.trim();
        match &self.media {
            Some(media) if body.is_empty() => media.placeholder().to_string(),
            _ => body.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(body: &str, media: Option<Media>) -> InboundEvent {
        InboundEvent {
            message_id: 1,
            chat_id: 10,
            is_group: false,
            from_me: false,
            sender_id: 5,
            sender: "alice".to_string(),
            body: body.to_string(),
            media,
            reply_to: None,
            mentions: vec![],
        }
    }

    #[test]
    fn test_stored_message_format() {
        let msg = StoredMessage {
            chat_id: 1,
            sender: "alice".to_string(),
            content: "hi there".to_string(),
            timestamp: 0,
            role: Role::User,
        };
        assert_eq!(msg.format(), "alice: hi there");
    }

    #[test]
    fn test_role_round_trip_through_str() {
        assert_eq!(Role::from_str(Role::Bot.as_str()), Role::Bot);
        assert_eq!(Role::from_str("anything"), Role::User);
    }

    #[test]
    fn test_history_content_uses_caption() {
        let media = Media {
            kind: MediaKind::Image,
            file_id: "f".to_string(),
            mime_type: "image/jpeg".to_string(),
        };
        assert_eq!(event("  a cat ", Some(media.clone())).history_content(), "a cat");
        assert_eq!(event("", Some(media)).history_content(), "[image]");
        assert_eq!(event("plain", None).history_content(), "plain");
    }
}
