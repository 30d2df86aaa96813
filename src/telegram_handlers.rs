//! Telegram update routing: text commands, settings panel callbacks and
//! passive moderation of group messages.

use std::sync::Arc;

use teloxide::dispatching::Dispatcher;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, Message, ParseMode, User};

use crate::classifier::Classify;
use crate::config::MokoshConfig;
use crate::database::Database;
use crate::editor::{PanelAction, PanelView, SettingsEditor};
use crate::enforcement::{EnforcementDispatcher, PlatformAdapter};
use crate::error::{ErrorContext, MokoshError, Result};
use crate::pipeline::Moderator;
use crate::telegram::{
    check_text, content_event, display_name, render_view, reset_text, start_keyboard, start_text,
    violations_text, TelegramAdapter, ANALYZING, CHECK_USAGE, GROUP_ADDED_WELCOME, HELP_TEXT,
    HOW_IT_WORKS,
};

const GROUP_ONLY: &str = "⚙️ This command can only be used inside a group chat\\.";
const ADMINS_ONLY: &str = "🔒 Only group admins can do that\\.";
const SETTINGS_ADMINS_ONLY: &str = "🔒 Only group admins can change settings\\.";
const REPLY_REQUIRED: &str = "↩️ Reply to a message from the user you want to look up\\.";

/// Text commands understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramCommand {
    Start,
    Help,
    Check(String),
    Settings,
    Violations,
    Reset,
}

impl TelegramCommand {
    /// Parse `/cmd[@bot] args`. Commands addressed to another bot and
    /// unknown commands yield `None`.
    pub fn parse(text: &str, bot_username: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }
        let mut parts = text.splitn(2, char::is_whitespace);
        let head = parts.next().unwrap_or("").trim_start_matches('/');
        let args = parts.next().unwrap_or("").trim().to_string();

        let (name, addressee) = match head.split_once('@') {
            Some((name, addressee)) => (name, Some(addressee)),
            None => (head, None),
        };
        if let Some(addressee) = addressee {
            if bot_username.is_empty() || !addressee.eq_ignore_ascii_case(bot_username) {
                return None;
            }
        }

        match name.to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "check" => Some(Self::Check(args)),
            "settings" => Some(Self::Settings),
            "violations" => Some(Self::Violations),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Check(_) => "check",
            Self::Settings => "settings",
            Self::Violations => "violations",
            Self::Reset => "reset",
        }
    }
}

/// Shared state injected into every handler.
pub struct BotState {
    pub moderator: Arc<Moderator>,
    pub editor: Arc<SettingsEditor>,
    pub adapter: Arc<TelegramAdapter>,
    pub bot_id: UserId,
    pub bot_username: String,
}

fn is_group(msg: &Message) -> bool {
    msg.chat.is_group() || msg.chat.is_supergroup()
}

async fn reply(bot: &Bot, msg: &Message, text: impl Into<String>) -> Result<()> {
    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::MarkdownV2)
        .reply_to_message_id(msg.id)
        .allow_sending_without_reply(true)
        .await?;
    Ok(())
}

/// Entry point for message updates.
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let result = route_message(&bot, &msg, &state).await;
    if let Err(e) = result {
        let mut ctx = ErrorContext::new("telegram_message").with_scope_id(msg.chat.id.0);
        if let Some(user) = msg.from() {
            ctx = ctx.with_user_id(user.id.0 as i64);
        }
        e.log_with_context(&ctx);
    }
    Ok(())
}

async fn route_message(bot: &Bot, msg: &Message, state: &Arc<BotState>) -> Result<()> {
    if let Some(members) = msg.new_chat_members() {
        if members.iter().any(|m| m.id == state.bot_id) {
            tracing::info!(chat_id = msg.chat.id.0, "Added to group");
            return reply(bot, msg, GROUP_ADDED_WELCOME).await;
        }
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return match TelegramCommand::parse(text, &state.bot_username) {
                Some(command) => handle_command(bot, msg, state, command).await,
                None => Ok(()),
            };
        }
    }

    if !is_group(msg) {
        return Ok(());
    }
    let Some(event) = content_event(msg) else {
        return Ok(());
    };

    // Classification can take a minute for video; keep the chat's update
    // queue moving
    let moderator = state.moderator.clone();
    tokio::spawn(async move {
        if let Err(e) = moderator.handle_event(&event).await {
            let ctx = ErrorContext::new("handle_message")
                .with_scope_id(event.scope_id)
                .with_user_id(event.member.user_id);
            e.log_with_context(&ctx);
        }
    });
    Ok(())
}

async fn handle_command(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    command: TelegramCommand,
) -> Result<()> {
    tracing::debug!(chat_id = msg.chat.id.0, command = command.name(), "Command received");

    match command {
        TelegramCommand::Start => {
            let first_name = msg
                .from()
                .map(|u| u.first_name.clone())
                .unwrap_or_else(|| "there".to_string());
            bot.send_message(msg.chat.id, start_text(&first_name))
                .parse_mode(ParseMode::MarkdownV2)
                .reply_markup(start_keyboard(&state.bot_username, msg.chat.id.0))
                .await?;
            Ok(())
        }
        TelegramCommand::Help => reply(bot, msg, HELP_TEXT).await,
        TelegramCommand::Check(text) => handle_check(bot, msg, state, &text).await,
        TelegramCommand::Settings => {
            if !is_group(msg) {
                return reply(
                    bot,
                    msg,
                    "⚙️ `/settings` can only be used inside a group chat\\.",
                )
                .await;
            }
            if !sender_is_admin(msg, state).await? {
                return reply(bot, msg, SETTINGS_ADMINS_ONLY).await;
            }

            let chat_id = msg.chat.id.0;
            let settings = state.editor.settings(chat_id).await?;
            let (text, keyboard) = render_view(PanelView::Main, &settings, chat_id);
            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::MarkdownV2)
                .reply_markup(keyboard)
                .await?;
            Ok(())
        }
        TelegramCommand::Violations | TelegramCommand::Reset => {
            if !is_group(msg) {
                return reply(bot, msg, GROUP_ONLY).await;
            }
            if !sender_is_admin(msg, state).await? {
                return reply(bot, msg, ADMINS_ONLY).await;
            }
            let Some(target) = reply_target(msg) else {
                return reply(bot, msg, REPLY_REQUIRED).await;
            };

            let chat_id = msg.chat.id.0;
            let user_id = target.id.0 as i64;
            let name = display_name(target);
            if command == TelegramCommand::Reset {
                state.moderator.reset(chat_id, user_id).await?;
                reply(bot, msg, reset_text(&name)).await
            } else {
                let report = state.moderator.violations(chat_id, user_id).await?;
                reply(bot, msg, violations_text(&name, report.count, report.status)).await
            }
        }
    }
}

async fn handle_check(bot: &Bot, msg: &Message, state: &BotState, text: &str) -> Result<()> {
    if text.is_empty() {
        return reply(bot, msg, CHECK_USAGE).await;
    }

    reply(bot, msg, ANALYZING).await?;

    let scope = is_group(msg).then_some(msg.chat.id.0);
    match state.moderator.check(text, scope).await {
        Ok(report) => reply(bot, msg, check_text(&report)).await,
        Err(e) => {
            e.log_with_context(&ErrorContext::new("check").with_scope_id(msg.chat.id.0));
            reply(
                bot,
                msg,
                format!("❌ {}", teloxide::utils::markdown::escape(e.user_message())),
            )
            .await
        }
    }
}

async fn sender_is_admin(msg: &Message, state: &BotState) -> Result<bool> {
    let Some(user) = msg.from() else {
        return Ok(false);
    };
    state
        .adapter
        .is_admin(msg.chat.id.0, user.id.0 as i64)
        .await
}

fn reply_target(msg: &Message) -> Option<&User> {
    msg.reply_to_message()
        .and_then(|m| m.from())
        .filter(|u| !u.is_bot)
}

/// Entry point for inline keyboard presses.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    if let Err(e) = route_callback(&bot, &q, &state).await {
        let ctx = ErrorContext::new("telegram_callback").with_user_id(q.from.id.0 as i64);
        e.log_with_context(&ctx);
        // No-op if the query was already answered
        let _ = bot.answer_callback_query(q.id.clone()).await;
    }
    Ok(())
}

async fn route_callback(bot: &Bot, q: &CallbackQuery, state: &BotState) -> Result<()> {
    let data = q.data.as_deref().unwrap_or_default();
    let Some((chat_id, action)) = PanelAction::parse_telegram_callback_data(data) else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let actor_id = q.from.id.0 as i64;

    match action {
        PanelAction::Noop => {
            bot.answer_callback_query(q.id.clone()).await?;
            Ok(())
        }
        PanelAction::HowItWorks => {
            bot.answer_callback_query(q.id.clone()).await?;
            if let Some(message) = &q.message {
                bot.send_message(message.chat.id, HOW_IT_WORKS)
                    .parse_mode(ParseMode::MarkdownV2)
                    .await?;
            }
            Ok(())
        }
        PanelAction::Close => {
            if !check_admin(bot, q, state, chat_id, actor_id).await? {
                return Ok(());
            }
            bot.answer_callback_query(q.id.clone()).await?;
            if let Some(message) = &q.message {
                bot.delete_message(message.chat.id, message.id).await?;
            }
            Ok(())
        }
        PanelAction::Show(view) => {
            if !check_admin(bot, q, state, chat_id, actor_id).await? {
                return Ok(());
            }
            bot.answer_callback_query(q.id.clone()).await?;
            let settings = state.editor.settings(chat_id).await?;
            redraw(bot, q, view, &settings, chat_id).await
        }
        PanelAction::Edit(edit) => {
            let settings = match state
                .editor
                .apply_gated(state.adapter.as_ref(), chat_id, actor_id, edit)
                .await
            {
                Ok(settings) => settings,
                Err(MokoshError::Forbidden(_)) => return deny(bot, q, "🔒 Admins only.").await,
                Err(e) => return Err(e),
            };
            bot.answer_callback_query(q.id.clone()).await?;
            match action.next_view() {
                Some(view) => redraw(bot, q, view, &settings, chat_id).await,
                None => Ok(()),
            }
        }
    }
}

/// Answer with an alert unless the presser administers `chat_id`.
async fn check_admin(
    bot: &Bot,
    q: &CallbackQuery,
    state: &BotState,
    chat_id: i64,
    actor_id: i64,
) -> Result<bool> {
    match state.adapter.is_admin(chat_id, actor_id).await {
        Ok(true) => Ok(true),
        Ok(false) => {
            deny(bot, q, "🔒 Admins only.").await?;
            Ok(false)
        }
        Err(e) => {
            tracing::warn!(error = %e, chat_id, actor_id, "Admin check failed");
            deny(bot, q, "🔒 Could not verify admin status.").await?;
            Ok(false)
        }
    }
}

async fn deny(bot: &Bot, q: &CallbackQuery, text: &str) -> Result<()> {
    bot.answer_callback_query(q.id.clone())
        .text(text)
        .show_alert(true)
        .await?;
    Ok(())
}

async fn redraw(
    bot: &Bot,
    q: &CallbackQuery,
    view: PanelView,
    settings: &crate::settings::Settings,
    chat_id: i64,
) -> Result<()> {
    let Some(message) = &q.message else {
        return Ok(());
    };
    let (text, keyboard) = render_view(view, settings, chat_id);
    if let Err(e) = bot
        .edit_message_text(message.chat.id, message.id, text)
        .parse_mode(ParseMode::MarkdownV2)
        .reply_markup(keyboard)
        .await
    {
        // Unchanged panels are rejected with "message is not modified"
        tracing::debug!(error = %e, chat_id, "Panel not redrawn");
    }
    Ok(())
}

/// Run the Telegram bot until interrupted.
pub async fn run(
    config: &MokoshConfig,
    db: Arc<Database>,
    classifier: Arc<dyn Classify>,
) -> Result<()> {
    let bot = Bot::new(&config.bot_token);
    let me = bot.get_me().await?;
    let bot_username = config
        .bot_username
        .clone()
        .or_else(|| me.user.username.clone())
        .unwrap_or_default();

    let adapter = Arc::new(TelegramAdapter::new(bot.clone(), config.telegram_log_chat_id));
    let dispatcher = Arc::new(EnforcementDispatcher::new(adapter.clone()));
    let moderator = Arc::new(Moderator::new(db.clone(), classifier, dispatcher));
    let editor = Arc::new(SettingsEditor::new(db));

    let state = Arc::new(BotState {
        moderator,
        editor,
        adapter,
        bot_id: me.user.id,
        bot_username,
    });

    tracing::info!(
        username = %state.bot_username,
        log_chat = ?config.telegram_log_chat_id,
        "Mokosh connected to Telegram"
    );

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_and_without_arguments() {
        assert_eq!(
            TelegramCommand::parse("/start", "mokosh_bot"),
            Some(TelegramCommand::Start)
        );
        assert_eq!(
            TelegramCommand::parse("/check   I will find you ", "mokosh_bot"),
            Some(TelegramCommand::Check("I will find you".to_string()))
        );
        assert_eq!(
            TelegramCommand::parse("/check", "mokosh_bot"),
            Some(TelegramCommand::Check(String::new()))
        );
        assert_eq!(
            TelegramCommand::parse("/SETTINGS", ""),
            Some(TelegramCommand::Settings)
        );
    }

    #[test]
    fn respects_bot_addressee() {
        assert_eq!(
            TelegramCommand::parse("/reset@Mokosh_Bot", "mokosh_bot"),
            Some(TelegramCommand::Reset)
        );
        assert_eq!(TelegramCommand::parse("/reset@other_bot", "mokosh_bot"), None);
        assert_eq!(TelegramCommand::parse("/reset@mokosh_bot", ""), None);
    }

    #[test]
    fn ignores_unknown_and_plain_text() {
        assert_eq!(TelegramCommand::parse("/ban everyone", "mokosh_bot"), None);
        assert_eq!(TelegramCommand::parse("hello", "mokosh_bot"), None);
        assert_eq!(TelegramCommand::parse("/", "mokosh_bot"), None);
    }

    #[test]
    fn multiline_check_keeps_body() {
        assert_eq!(
            TelegramCommand::parse("/check\nline one\nline two", "mokosh_bot"),
            Some(TelegramCommand::Check("line one\nline two".to_string()))
        );
    }
}
