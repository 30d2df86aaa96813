//! Telegram adapter.
//!
//! Implements [`PlatformAdapter`] over a teloxide [`Bot`] and renders every
//! Telegram-facing text as MarkdownV2. Update routing lives in
//! [`crate::telegram_handlers`].

use async_trait::async_trait;
use chrono::Utc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatPermissions, InlineKeyboardButton, InlineKeyboardMarkup, Message, MessageId, ParseMode,
    User,
};
use teloxide::utils::markdown::{code_inline, escape};

use crate::editor::{
    category_button_label, category_summary, flag_button_label, on_off, Flag, NumericField,
    PanelAction, PanelView, SettingsEdit, StepDirection,
};
use crate::enforcement::{LogDestination, PlatformAdapter, Restriction, WarningNotice};
use crate::error::{MokoshError, Result};
use crate::escalation::{ViolationStatus, BAN_VIOLATION_THRESHOLD};
use crate::models::{
    AttachmentRef, ContentEvent, ContentKind, MemberRef, MessageHandle, MAX_VIDEO_BYTES,
};
use crate::pipeline::CheckReport;
use crate::settings::{Category, CategorySet, Settings};

pub const PHOTO_LABEL: &str = "🖼 Photo";
pub const VOICE_LABEL: &str = "🎙 Voice";
pub const GIF_LABEL: &str = "🎞 GIF";
pub const VIDEO_LABEL: &str = "🎥 Video";

/// Fallback note when the API gave nothing to say to the sender.
const DEFAULT_WARN_NOTE: &str = "please do not write like this.";

pub const HOW_IT_WORKS: &str = "🤖 *How Mokosh works:*\n\n\
    1\\. Add me to your group as *admin*\n   \
    _\\(Delete messages, Ban users, Restrict members\\)_\n\n\
    2\\. I silently watch every message\n\n\
    3\\. I analyze *text*, *photos*, *voice*, *GIFs* and *video* via the Mokosh API\n\n\
    4\\. On violations: the message is deleted and the sender warned, \
    repeat offenders are banned\n\n\
    Use `/check <text>` to manually test any message\\.\n\
    Use `/settings` \\(admins\\) to customize behavior\\.";

pub const HELP_TEXT: &str = "*Mokosh commands:*\n\n\
    `/check <text>` — analyze any text\n\
    `/settings` — configure moderation \\(admins\\)\n\
    `/violations` — reply to a message to see the sender's record \\(admins\\)\n\
    `/reset` — reply to a message to clear the sender's record \\(admins\\)";

pub const CHECK_USAGE: &str =
    "Usage: `/check <message text>`\n\nExample: `/check I will find you`";

pub const ANALYZING: &str = "🔍 Analyzing\\.\\.\\.";

pub const GROUP_ADDED_WELCOME: &str = "👋 Hello everyone\\! I'm *Mokosh*, your AI safety moderator\\.\n\n\
    I analyze *text*, *photos*, *voice messages*, *GIFs* and *videos* for harmful content\\.\n\n\
    Admins: use `/settings` to configure moderation\\.\n\
    Anyone: use `/check <text>` to test a message\\.\n\n\
    ⚠️ *Give me admin rights* \\(delete messages \\+ restrict users\\) to act on violations\\.\n\n\
    Stay respectful\\! 🛡️";

/// Name used for a Telegram sender: the username, else the first name.
pub fn display_name(user: &User) -> String {
    user.username
        .clone()
        .unwrap_or_else(|| user.first_name.clone())
}

/// Body of the in-chat warning.
pub fn warning_text(notice: &WarningNotice) -> String {
    let name = escape(&notice.member.display_name);
    let (emoji, action_note) = if notice.is_final() {
        (
            "🚫",
            format!(
                "🚫 *@{} has been banned*\nReason: {}",
                name,
                escape(&format!(
                    "{} violations, confidence {}",
                    notice.violation_count,
                    notice.confidence_text()
                ))
            ),
        )
    } else {
        let note = if notice.note.is_empty() {
            DEFAULT_WARN_NOTE
        } else {
            notice.note.as_str()
        };
        (
            "⚠️",
            format!(
                "⚠️ @{}, {}\n\n_{}_",
                name,
                escape(note),
                escape(&format!(
                    "Violation {} recorded. {}.",
                    notice.violation_count,
                    WarningNotice::footer()
                ))
            ),
        )
    };

    let label_line = notice
        .media_label
        .as_deref()
        .map(|label| format!("Content: {}\n", code_inline(label)))
        .unwrap_or_default();

    format!(
        "{} *Violation detected*\n{}Category: {}\nConfidence: {}\n\n{}",
        emoji,
        label_line,
        code_inline(&notice.category_text()),
        code_inline(&notice.confidence_text()),
        action_note
    )
}

/// Entry mirrored to the log chat.
pub fn log_text(notice: &WarningNotice) -> String {
    let mut text = format!(
        "*{}*\nChat: {}\nUser: {} \\({}\\)\nCategory: {}\nConfidence: {}\nViolations: {}",
        escape(notice.log_title()),
        code_inline(&notice.scope_id.to_string()),
        escape(&notice.member.display_name),
        code_inline(&notice.member.user_id.to_string()),
        code_inline(&notice.category_text()),
        code_inline(&notice.confidence_text()),
        code_inline(&notice.violation_count.to_string()),
    );
    if let Some(label) = &notice.media_label {
        text.push_str(&format!("\nMedia: {}", escape(label)));
    }
    if !notice.note.is_empty() {
        text.push_str(&format!("\nAI note: {}", escape(&notice.note)));
    }
    text
}

/// Reply to `/check`.
pub fn check_text(report: &CheckReport) -> String {
    format!(
        "{} *Result: {}*\n\nCategory: {}\nConfidence: {}\nSuggested action: {}\n\n*Analysis:*\n{}",
        report.icon(),
        escape(report.status()),
        code_inline(&report.categories),
        code_inline(&report.confidence_text()),
        code_inline(&report.suggested_action),
        escape(&report.explanation)
    )
}

pub fn violations_text(name: &str, count: i64, status: ViolationStatus) -> String {
    format!(
        "📋 *Violations for {}*\n\nCount: {}\nStatus: {}\n\n_{}_",
        escape(name),
        code_inline(&count.to_string()),
        escape(status.describe()),
        escape(&format!(
            "Ban triggers at {}+ violations.",
            BAN_VIOLATION_THRESHOLD
        ))
    )
}

pub fn reset_text(name: &str) -> String {
    format!(
        "✅ Violation count for *{}* has been reset to 0\\.",
        escape(name)
    )
}

/// Greeting for `/start` in a private chat.
pub fn start_text(first_name: &str) -> String {
    format!(
        "👋 Hi, {}\\!\n\n\
         I'm *Mokosh* — an AI\\-powered harassment detection bot\\.\n\n\
         I monitor group chats and detect harmful messages automatically\\.\n\n\
         *What I can analyze:*\n\
         💬 Text messages\n\
         🖼 Photos \\& GIFs\n\
         🎙 Voice messages\n\
         🎥 Videos\n\n\
         *What I do when I find something bad:*\n\
         ⚠️ Warn the sender and delete the message\n\
         🚫 Ban repeat offenders\n\n\
         *Commands:*\n\
         `/check <text>` — analyze any text\n\
         `/settings` — configure moderation \\(admins\\)\n\n\
         Add me to your group using the button below 👇",
        escape(first_name)
    )
}

/// Buttons under the `/start` greeting. The invite button needs the bot's
/// username and is left out without one.
pub fn start_keyboard(bot_username: &str, chat_id: i64) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if !bot_username.is_empty() {
        let invite = format!("https://t.me/{}?startgroup=true", bot_username);
        if let Ok(url) = reqwest::Url::parse(&invite) {
            rows.push(vec![InlineKeyboardButton::url("➕ Add me to a group", url)]);
        }
    }
    rows.push(vec![button(
        "📖 How it works",
        PanelAction::HowItWorks,
        chat_id,
    )]);
    InlineKeyboardMarkup::new(rows)
}

fn button(label: impl Into<String>, action: PanelAction, chat_id: i64) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label, action.telegram_callback_data(chat_id))
}

fn step(field: NumericField, direction: StepDirection) -> PanelAction {
    PanelAction::Edit(SettingsEdit::Step { field, direction })
}

/// Text of the main settings panel.
pub fn panel_text(settings: &Settings) -> String {
    format!(
        "⚙️ *Mokosh Settings*\n\n\
         🎯 Confidence threshold: {}\n\
         ⏱ Mute duration: {}\n\
         📈 Mute after violations: {}\n\
         🚫 Ban after violations: {}\n\
         ⚠️ Auto\\-warn: {}\n\
         🔇 Auto\\-mute: {}\n\
         🚫 Auto\\-ban: {}\n\
         ⚡ Instant mute: {}\n\
         💥 Instant ban: {}",
        code_inline(&NumericField::Confidence.display(settings)),
        code_inline(&NumericField::MuteMinutes.display(settings)),
        code_inline(&NumericField::MuteThreshold.display(settings)),
        code_inline(&NumericField::BlockThreshold.display(settings)),
        on_off(settings.auto_warn),
        on_off(settings.auto_mute),
        on_off(settings.auto_block),
        code_inline(&category_summary(settings, CategorySet::Mute)),
        code_inline(&category_summary(settings, CategorySet::Block)),
    )
}

/// Keyboard of the main settings panel for `chat_id`.
pub fn panel_keyboard(settings: &Settings, chat_id: i64) -> InlineKeyboardMarkup {
    let toggles: Vec<InlineKeyboardButton> = [Flag::AutoWarn, Flag::AutoMute, Flag::AutoBlock]
        .into_iter()
        .map(|flag| {
            button(
                flag_button_label(flag, settings),
                PanelAction::Edit(SettingsEdit::Toggle(flag)),
                chat_id,
            )
        })
        .collect();

    let stepper = |field: NumericField, down: &str, middle: String, up: &str| {
        vec![
            button(down, step(field, StepDirection::Down), chat_id),
            button(middle, PanelAction::Noop, chat_id),
            button(up, step(field, StepDirection::Up), chat_id),
        ]
    };

    let rows = vec![
        toggles,
        stepper(
            NumericField::Confidence,
            "🎯 −",
            format!("Conf {}", NumericField::Confidence.display(settings)),
            "🎯 +",
        ),
        stepper(
            NumericField::MuteMinutes,
            "⏱ −15m",
            format!("Mute {}m", settings.mute_minutes),
            "⏱ +15m",
        ),
        stepper(
            NumericField::MuteThreshold,
            "📈 Mute thresh −",
            format!("mute@{}", settings.mute_threshold_violations),
            "📈 Mute thresh +",
        ),
        stepper(
            NumericField::BlockThreshold,
            "📈 Ban thresh −",
            format!("ban@{}", settings.block_threshold_violations),
            "📈 Ban thresh +",
        ),
        vec![
            button(
                "⚡ Instant mute cats",
                PanelAction::Show(PanelView::Categories(CategorySet::Mute)),
                chat_id,
            ),
            button(
                "💥 Instant ban cats",
                PanelAction::Show(PanelView::Categories(CategorySet::Block)),
                chat_id,
            ),
        ],
        vec![button("✅ Done", PanelAction::Close, chat_id)],
    ];
    InlineKeyboardMarkup::new(rows)
}

pub fn category_text(set: CategorySet) -> String {
    format!("⚡ *{}*\nTap to toggle:", escape(set.title()))
}

pub fn category_keyboard(settings: &Settings, set: CategorySet, chat_id: i64) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Category::ALL
        .into_iter()
        .map(|category| {
            vec![button(
                category_button_label(set, category, settings),
                PanelAction::Edit(SettingsEdit::ToggleCategory { set, category }),
                chat_id,
            )]
        })
        .collect();
    rows.push(vec![button(
        "← Back",
        PanelAction::Show(PanelView::Main),
        chat_id,
    )]);
    InlineKeyboardMarkup::new(rows)
}

/// Text and keyboard for a panel view.
pub fn render_view(
    view: PanelView,
    settings: &Settings,
    chat_id: i64,
) -> (String, InlineKeyboardMarkup) {
    match view {
        PanelView::Main => (panel_text(settings), panel_keyboard(settings, chat_id)),
        PanelView::Categories(set) => (
            category_text(set),
            category_keyboard(settings, set, chat_id),
        ),
    }
}

fn attachment(
    source: &str,
    filename: &str,
    content_type: &str,
    size: u32,
    kind: ContentKind,
    label: &str,
) -> AttachmentRef {
    AttachmentRef {
        source: source.to_string(),
        filename: filename.to_string(),
        content_type: Some(content_type.to_string()),
        size: Some(u64::from(size)),
        label: label.to_string(),
        kind_hint: Some(kind),
    }
}

/// Attachment for a generic document, `None` when its kind is unsupported.
pub fn document_attachment(
    file_id: &str,
    file_name: Option<&str>,
    mime_type: Option<&str>,
    size: u32,
) -> Option<AttachmentRef> {
    let filename = file_name.unwrap_or("document");
    let kind = ContentKind::detect(mime_type, filename)?;
    let label = match kind {
        ContentKind::Image => PHOTO_LABEL,
        ContentKind::Audio => VOICE_LABEL,
        ContentKind::Video => VIDEO_LABEL,
        ContentKind::Text => return None,
    };
    Some(AttachmentRef {
        source: file_id.to_string(),
        filename: filename.to_string(),
        content_type: mime_type.map(str::to_string),
        size: Some(u64::from(size)),
        label: label.to_string(),
        kind_hint: Some(kind),
    })
}

/// Media carried by a message, in the order the pipeline should check it.
pub fn message_attachments(msg: &Message) -> Vec<AttachmentRef> {
    let mut attachments = Vec::new();

    // Telegram sends several sizes; the last is the largest
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        attachments.push(attachment(
            &photo.file.id,
            "photo.jpg",
            "image/jpeg",
            photo.file.size,
            ContentKind::Image,
            PHOTO_LABEL,
        ));
    }
    if let Some(voice) = msg.voice() {
        attachments.push(attachment(
            &voice.file.id,
            "voice.ogg",
            "audio/ogg",
            voice.file.size,
            ContentKind::Audio,
            VOICE_LABEL,
        ));
    }
    if let Some(audio) = msg.audio() {
        attachments.push(attachment(
            &audio.file.id,
            "voice.ogg",
            "audio/ogg",
            audio.file.size,
            ContentKind::Audio,
            VOICE_LABEL,
        ));
    }
    // Animations also carry a document; the animation wins
    if let Some(animation) = msg.animation() {
        attachments.push(attachment(
            &animation.file.id,
            "video.mp4",
            "video/mp4",
            animation.file.size,
            ContentKind::Video,
            GIF_LABEL,
        ));
    } else if let Some(document) = msg.document() {
        let mime = document.mime_type.as_ref().map(|m| m.to_string());
        attachments.extend(document_attachment(
            &document.file.id,
            document.file_name.as_deref(),
            mime.as_deref(),
            document.file.size,
        ));
    }
    if let Some(video) = msg.video() {
        attachments.push(attachment(
            &video.file.id,
            "video.mp4",
            "video/mp4",
            video.file.size,
            ContentKind::Video,
            VIDEO_LABEL,
        ));
    }

    attachments
}

/// Build the core event for a group message. `None` for messages without a
/// human sender or without anything to classify.
pub fn content_event(msg: &Message) -> Option<ContentEvent> {
    let sender = msg.from()?;
    if sender.is_bot {
        return None;
    }

    let text = msg
        .text()
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string);
    let caption = msg
        .caption()
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string);
    let attachments = message_attachments(msg);
    if text.is_none() && attachments.is_empty() {
        return None;
    }

    Some(ContentEvent {
        scope_id: msg.chat.id.0,
        member: MemberRef {
            user_id: sender.id.0 as i64,
            display_name: display_name(sender),
        },
        message: MessageHandle {
            channel_id: msg.chat.id.0,
            message_id: i64::from(msg.id.0),
        },
        text,
        caption,
        attachments,
    })
}

fn message_id(id: i64) -> Result<MessageId> {
    i32::try_from(id)
        .map(MessageId)
        .map_err(|_| MokoshError::InternalState(format!("Invalid Telegram message id: {}", id)))
}

fn telegram_user(id: i64) -> Result<UserId> {
    u64::try_from(id)
        .map(UserId)
        .map_err(|_| MokoshError::InternalState(format!("Invalid Telegram user id: {}", id)))
}

/// Telegram implementation of [`PlatformAdapter`].
pub struct TelegramAdapter {
    bot: Bot,
    log_chat_id: Option<i64>,
}

impl TelegramAdapter {
    pub fn new(bot: Bot, log_chat_id: Option<i64>) -> Self {
        Self { bot, log_chat_id }
    }
}

#[async_trait]
impl PlatformAdapter for TelegramAdapter {
    async fn delete_message(&self, _scope_id: i64, message: MessageHandle) -> Result<()> {
        self.bot
            .delete_message(ChatId(message.channel_id), message_id(message.message_id)?)
            .await?;
        Ok(())
    }

    async fn deliver_warning(&self, notice: &WarningNotice) -> Result<()> {
        // The offending message is usually gone by now
        self.bot
            .send_message(ChatId(notice.message.channel_id), warning_text(notice))
            .parse_mode(ParseMode::MarkdownV2)
            .reply_to_message_id(message_id(notice.message.message_id)?)
            .allow_sending_without_reply(true)
            .await?;
        Ok(())
    }

    async fn resolve_log_destination(&self, _scope_id: i64) -> Result<Option<LogDestination>> {
        Ok(self
            .log_chat_id
            .map(|channel_id| LogDestination { channel_id }))
    }

    async fn post_log(&self, destination: &LogDestination, notice: &WarningNotice) -> Result<()> {
        self.bot
            .send_message(ChatId(destination.channel_id), log_text(notice))
            .parse_mode(ParseMode::MarkdownV2)
            .await?;
        Ok(())
    }

    async fn restrict_member(
        &self,
        scope_id: i64,
        user_id: i64,
        restriction: &Restriction,
    ) -> Result<()> {
        let chat = ChatId(scope_id);
        let user = telegram_user(user_id)?;

        match restriction {
            Restriction::Ban { reason } => {
                self.bot.ban_chat_member(chat, user).await?;
                tracing::info!(chat_id = scope_id, user_id, reason = %reason, "User banned");
            }
            Restriction::Mute { minutes } => {
                let until = Utc::now() + chrono::Duration::minutes(i64::from(*minutes));
                self.bot
                    .restrict_chat_member(chat, user, ChatPermissions::empty())
                    .until_date(until)
                    .await?;
                tracing::info!(chat_id = scope_id, user_id, minutes, "User muted");
            }
        }
        Ok(())
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>> {
        let file = self.bot.get_file(attachment.source.clone()).await?;
        if u64::from(file.meta.size) > MAX_VIDEO_BYTES {
            return Err(MokoshError::Delivery(format!(
                "file too large to download: {} bytes",
                file.meta.size
            )));
        }

        let mut bytes = Vec::with_capacity(file.meta.size as usize);
        self.bot
            .download_file(&file.path, &mut bytes)
            .await
            .map_err(|e| MokoshError::Delivery(format!("Failed to download file: {}", e)))?;
        Ok(bytes)
    }

    async fn is_admin(&self, scope_id: i64, user_id: i64) -> Result<bool> {
        let member = self
            .bot
            .get_chat_member(ChatId(scope_id), telegram_user(user_id)?)
            .await?;
        Ok(member.is_privileged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::MAX_CALLBACK_BYTES;
    use crate::models::EnforcementAction;
    use teloxide::types::InlineKeyboardButtonKind;

    fn notice(action: EnforcementAction, media_label: Option<&str>, note: &str) -> WarningNotice {
        WarningNotice {
            scope_id: -1001234567890,
            member: MemberRef {
                user_id: 4242,
                display_name: "mal_lory".to_string(),
            },
            message: MessageHandle {
                channel_id: -1001234567890,
                message_id: 17,
            },
            media_label: media_label.map(str::to_string),
            categories: vec!["verbal_abuse".to_string()],
            confidence: 0.85,
            violation_count: 2,
            note: note.to_string(),
            action,
        }
    }

    fn callback_data(button: &InlineKeyboardButton) -> Option<&str> {
        match &button.kind {
            InlineKeyboardButtonKind::CallbackData(data) => Some(data.as_str()),
            _ => None,
        }
    }

    #[test]
    fn warn_text_escapes_name_and_uses_fallback_note() {
        let text = warning_text(&notice(EnforcementAction::Warn, None, ""));
        assert!(text.starts_with("⚠️ *Violation detected*\n"));
        assert!(text.contains("Category: `verbal_abuse`"));
        assert!(text.contains("Confidence: `85%`"));
        assert!(text.contains("⚠️ @mal\\_lory, please do not write like this\\."));
        assert!(text.contains(
            "_Violation 2 recorded\\. Ban triggers at 2\\+ violations with 80%\\+ confidence\\._"
        ));
        assert!(!text.contains("Content:"));
    }

    #[test]
    fn ban_text_names_reason() {
        let text = warning_text(&notice(EnforcementAction::Ban, Some(VOICE_LABEL), "stop"));
        assert!(text.starts_with("🚫 *Violation detected*\nContent: `🎙 Voice`\n"));
        assert!(text.contains("🚫 *@mal\\_lory has been banned*\nReason: 2 violations, confidence 85%"));
        assert!(!text.contains("stop"));
    }

    #[test]
    fn log_text_lists_media_and_note() {
        let text = log_text(&notice(EnforcementAction::Warn, Some(GIF_LABEL), "Be kind."));
        assert!(text.starts_with("*⚠️ Warn*\n"));
        assert!(text.contains("Chat: `-1001234567890`"));
        assert!(text.contains("Media: 🎞 GIF"));
        assert!(text.ends_with("AI note: Be kind\\."));
    }

    #[test]
    fn check_text_reports_status() {
        let report = CheckReport {
            is_bad: true,
            categories: "threat".to_string(),
            confidence: 0.93,
            suggested_action: "ban".to_string(),
            explanation: "Explicit threat (violence).".to_string(),
        };
        let text = check_text(&report);
        assert!(text.starts_with("🔴 *Result: HARMFUL*"));
        assert!(text.contains("Confidence: `93%`"));
        assert!(text.ends_with("Explicit threat \\(violence\\)\\."));
    }

    #[test]
    fn panel_text_shows_defaults() {
        let text = panel_text(&Settings::default());
        assert!(text.starts_with("⚙️ *Mokosh Settings*"));
        assert!(text.contains("🎯 Confidence threshold: `0.55`"));
        assert!(text.contains("⏱ Mute duration: `60 min`"));
        assert!(text.contains("⚠️ Auto\\-warn: ✅"));
    }

    #[test]
    fn panel_keyboard_layout() {
        let markup = panel_keyboard(&Settings::default(), -100);
        let rows = &markup.inline_keyboard;
        let widths: Vec<usize> = rows.iter().map(Vec::len).collect();
        assert_eq!(widths, vec![3, 3, 3, 3, 3, 2, 1]);

        assert_eq!(callback_data(&rows[0][0]), Some("stg|-100|t:auto_warn"));
        assert_eq!(callback_data(&rows[1][0]), Some("stg|-100|s:conf:-"));
        assert_eq!(callback_data(&rows[1][1]), Some("stg|-100|noop"));
        assert_eq!(rows[2][1].text, "Mute 60m");
        assert_eq!(callback_data(&rows[5][1]), Some("stg|-100|cats:block"));
        assert_eq!(callback_data(&rows[6][0]), Some("stg|-100|close"));
    }

    #[test]
    fn category_keyboard_lists_every_category_then_back() {
        let markup = category_keyboard(&Settings::default(), CategorySet::Block, -100);
        let rows = &markup.inline_keyboard;
        assert_eq!(rows.len(), Category::ALL.len() + 1);
        assert!(rows.iter().all(|row| row.len() == 1));
        assert_eq!(rows[rows.len() - 1][0].text, "← Back");
        assert_eq!(
            callback_data(&rows[rows.len() - 1][0]),
            Some("stg|-100|main")
        );
    }

    #[test]
    fn callback_data_fits_telegram_limit_for_any_chat() {
        let settings = Settings::default();
        for chat_id in [i64::MIN, -1001234567890, 0, i64::MAX] {
            let mut markups = vec![panel_keyboard(&settings, chat_id)];
            for set in [CategorySet::Mute, CategorySet::Block] {
                markups.push(category_keyboard(&settings, set, chat_id));
            }
            markups.push(start_keyboard("mokosh_bot", chat_id));

            for markup in markups {
                for button in markup.inline_keyboard.iter().flatten() {
                    if let Some(data) = callback_data(button) {
                        assert!(data.len() <= MAX_CALLBACK_BYTES, "{} too long", data);
                        let (parsed_chat, _) =
                            PanelAction::parse_telegram_callback_data(data).unwrap();
                        assert_eq!(parsed_chat, chat_id);
                    }
                }
            }
        }
    }

    #[test]
    fn start_keyboard_skips_invite_without_username() {
        assert_eq!(start_keyboard("", 5).inline_keyboard.len(), 1);
        let markup = start_keyboard("mokosh_bot", 5);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert!(matches!(
            &markup.inline_keyboard[0][0].kind,
            InlineKeyboardButtonKind::Url(url)
                if url.as_str() == "https://t.me/mokosh_bot?startgroup=true"
        ));
    }

    #[test]
    fn documents_map_to_supported_kinds() {
        let image = document_attachment("f1", Some("cat.png"), Some("image/png"), 10).unwrap();
        assert_eq!(image.kind(), Some(ContentKind::Image));
        assert_eq!(image.label, PHOTO_LABEL);

        let video = document_attachment("f2", Some("clip.mp4"), None, 10).unwrap();
        assert_eq!(video.label, VIDEO_LABEL);

        assert!(document_attachment("f3", Some("notes.pdf"), Some("application/pdf"), 10).is_none());
        assert!(document_attachment("f4", None, None, 10).is_none());
    }

    #[test]
    fn ids_convert_or_fail() {
        assert_eq!(message_id(17).unwrap(), MessageId(17));
        assert!(message_id(i64::MAX).is_err());
        assert!(telegram_user(-3).is_err());
    }
}
