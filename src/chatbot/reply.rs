//! Reply text normalization and the fixed user-facing fallback strings.

use regex::Regex;
use std::sync::LazyLock;

static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

pub const GENERATION_FAILED: &str =
    "Sorry, an error occurred while generating the response. Please try again or rephrase your question.";
pub const SAFETY_BLOCKED: &str =
    "Sorry, I can't respond to that request due to safety restrictions. Please try rephrasing your question.";
pub const UNEXPECTED_ERROR: &str = "Sorry, an unexpected error occurred. Please try again later.";
pub const COMMAND_FAILED: &str = "Sorry, an error occurred while executing the command. Please try again.";
pub const SEND_FAILED: &str = "Sorry, an error occurred while sending the response. Please try again.";
pub const IMAGE_FAILED: &str = "Sorry, I couldn't process your image. Please try again.";
pub const AUDIO_FAILED: &str = "Sorry, I couldn't process your audio. Please try again.";
pub const UNSUPPORTED_MEDIA: &str = "Sorry, I can only process audio and images at the moment.";
pub const REPEATED_RESPONSE: &str =
    "Sorry, it looks like I already answered that. Try asking something different.";

/// Normalize line endings, collapse runs of blank lines and trim.
/// Empty input becomes the generation-failure apology.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = EXCESS_NEWLINES.replace_all(&unified, "\n\n");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        GENERATION_FAILED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Near-duplicate response check. No algorithm yet, so nothing is ever suppressed.
pub fn responses_similar(_previous: &str, _next: &str) -> bool {
    false
}
