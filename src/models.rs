//! Core data models shared by the pipeline and both platform adapters.

use std::time::Duration;

/// Largest video the bots will download and classify.
pub const MAX_VIDEO_BYTES: u64 = 20 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
const AUDIO_EXTENSIONS: &[&str] = &["ogg", "mp3", "wav", "m4a", "opus"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv"];

/// Kind of content sent to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Image,
    Audio,
    Video,
}

impl ContentKind {
    /// Path segment under `/analyze/`.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Text => "messages",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Default request timeout for this kind.
    pub fn default_timeout(self) -> Duration {
        match self {
            Self::Text => Duration::from_secs(20),
            Self::Image => Duration::from_secs(30),
            Self::Audio => Duration::from_secs(40),
            Self::Video => Duration::from_secs(60),
        }
    }

    /// MIME type of the uploaded file part.
    pub fn mime(self) -> Option<&'static str> {
        match self {
            Self::Text => None,
            Self::Image => Some("image/jpeg"),
            Self::Audio => Some("audio/ogg"),
            Self::Video => Some("video/mp4"),
        }
    }

    /// Whether the media endpoint takes a caption field.
    pub fn accepts_caption(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }

    /// Classify an attachment by MIME type, falling back to file extension.
    pub fn detect(content_type: Option<&str>, filename: &str) -> Option<Self> {
        if let Some(ct) = content_type.map(|c| c.to_ascii_lowercase()) {
            if ct.starts_with("image/") {
                return Some(Self::Image);
            }
            if ct.starts_with("audio/") {
                return Some(Self::Audio);
            }
            if ct.starts_with("video/") {
                return Some(Self::Video);
            }
        }

        let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Audio)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }
}

/// Normalized classification result for one piece of content.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Verdict {
    /// `is_bad` or `status == "bad"` as reported by the API.
    pub is_bad: bool,
    /// Category tags in the order the API reported them, deduplicated.
    pub categories: Vec<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub explanation: String,
    pub sender_response: String,
    /// Advisory action string from the API. Never consulted for enforcement.
    pub action: Option<String>,
}

impl Verdict {
    /// Categories joined for display, `fallback` when there are none.
    pub fn category_list(&self, fallback: &str) -> String {
        if self.categories.is_empty() {
            fallback.to_string()
        } else {
            self.categories.join(", ")
        }
    }
}

/// Member that sent the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub user_id: i64,
    pub display_name: String,
}

/// Location of a platform message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel_id: i64,
    pub message_id: i64,
}

/// Attachment as seen by the core. `source` is opaque to everything but the
/// adapter that produced it (a CDN URL on Discord, a file id on Telegram).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub source: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    /// Label shown in warnings, e.g. "🎙 Voice".
    pub label: String,
    /// Kind forced by the adapter, otherwise detected from type and name.
    pub kind_hint: Option<ContentKind>,
}

impl AttachmentRef {
    pub fn kind(&self) -> Option<ContentKind> {
        self.kind_hint
            .or_else(|| ContentKind::detect(self.content_type.as_deref(), &self.filename))
    }

    /// Video over the download limit is never classified.
    pub fn exceeds_limit(&self) -> bool {
        self.kind() == Some(ContentKind::Video)
            && self.size.is_some_and(|size| size > MAX_VIDEO_BYTES)
    }
}

/// Inbound message handed to the pipeline by an adapter.
#[derive(Debug, Clone)]
pub struct ContentEvent {
    pub scope_id: i64,
    pub member: MemberRef,
    pub message: MessageHandle,
    pub text: Option<String>,
    /// Caption sent with image and video uploads.
    pub caption: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

/// Enforcement action chosen for a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementAction {
    None,
    Warn,
    Mute,
    Ban,
}

impl EnforcementAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warn => "warn",
            Self::Mute => "mute",
            Self::Ban => "ban",
        }
    }
}

/// Categories and confidence behind a decision, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Rationale {
    pub categories: Vec<String>,
    pub confidence: f64,
    /// Note addressed to the sender, or the explanation when there is none.
    pub note: String,
}

/// Output of the escalation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EnforcementDecision {
    pub new_count: i64,
    pub chosen_action: EnforcementAction,
    pub should_delete_message: bool,
    pub rationale: Rationale,
    /// Duration applied if the action is a mute.
    pub mute_minutes: u32,
}

impl EnforcementDecision {
    pub fn should_ban(&self) -> bool {
        self.chosen_action == EnforcementAction::Ban
    }
}

/// Format a confidence as a whole percentage, e.g. `0.8` → `"80%"`.
pub fn confidence_percent(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}

/// Truncate to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
