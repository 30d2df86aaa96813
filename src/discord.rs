//! Discord adapter.
//!
//! Implements [`PlatformAdapter`] over serenity's HTTP client and wires the
//! gateway events (messages, guild joins, interactions) into the shared core.

use std::num::NonZeroU64;
use std::sync::Arc;

use chrono::Utc;
use serenity::all::{
    ChannelId, ChannelType, Colour, Context, CreateChannel, CreateEmbed, CreateEmbedAuthor,
    CreateEmbedFooter, CreateMessage, EditMember, EventHandler, GatewayIntents, Guild, GuildId,
    Http, Interaction, Message, MessageId, PermissionOverwrite, PermissionOverwriteType,
    Permissions, Ready, RoleId, Timestamp, UserId,
};
use serenity::async_trait;
use serenity::Client;

use crate::classifier::Classify;
use crate::commands::SlashCommandHandler;
use crate::config::MokoshConfig;
use crate::database::Database;
use crate::editor::SettingsEditor;
use crate::enforcement::{
    EnforcementDispatcher, LogDestination, PlatformAdapter, Restriction, WarningNotice,
};
use crate::error::{ErrorContext, MokoshError, Result};
use crate::models::{AttachmentRef, ContentEvent, ContentKind, MemberRef, MessageHandle};
use crate::pipeline::Moderator;

/// Audit log reason for deleted messages.
const DELETE_REASON: &str = "Mokosh: harmful content";

/// Label shown for a Discord attachment of the given kind.
pub fn media_label(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Image => "🖼 Image",
        ContentKind::Audio => "🎙 Audio",
        ContentKind::Video => "🎥 Video",
        ContentKind::Text => "💬 Text",
    }
}

/// Convert a stored id back into a serenity id.
pub(crate) fn snowflake<T: From<NonZeroU64>>(id: i64) -> Result<T> {
    u64::try_from(id)
        .ok()
        .and_then(NonZeroU64::new)
        .map(T::from)
        .ok_or_else(|| MokoshError::InternalState(format!("Invalid Discord id: {}", id)))
}

/// Message content accompanying the warning embed.
pub fn warning_content(notice: &WarningNotice) -> String {
    if notice.is_final() {
        format!("<@{}> — **you have been banned.**", notice.member.user_id)
    } else {
        format!("<@{}>", notice.member.user_id)
    }
}

/// Fields of the in-channel warning embed as `(name, value, inline)`.
pub fn warning_fields(notice: &WarningNotice) -> Vec<(&'static str, String, bool)> {
    let mut fields = Vec::new();
    if let Some(label) = &notice.media_label {
        fields.push(("Content type", label.clone(), true));
    }
    fields.push(("Category", format!("`{}`", notice.category_text()), true));
    fields.push(("Confidence", format!("`{}`", notice.confidence_text()), true));
    fields.push((
        "Violations",
        format!("`{}` total", notice.violation_count),
        true,
    ));
    if !notice.note.is_empty() {
        fields.push(("AI note", notice.note.clone(), false));
    }
    fields
}

/// Fields of the log channel embed as `(name, value, inline)`.
pub fn log_fields(notice: &WarningNotice) -> Vec<(&'static str, String, bool)> {
    let mut fields = vec![
        (
            "User",
            format!("<@{}> (`{}`)", notice.member.user_id, notice.member.user_id),
            false,
        ),
        ("Channel", format!("<#{}>", notice.message.channel_id), true),
        ("Category", format!("`{}`", notice.category_text()), true),
        ("Confidence", format!("`{}`", notice.confidence_text()), true),
        ("Violations", notice.violation_count.to_string(), true),
    ];
    if let Some(label) = &notice.media_label {
        fields.push(("Media", label.clone(), true));
    }
    if !notice.note.is_empty() {
        fields.push(("AI note", notice.note.clone(), false));
    }
    fields
}

fn notice_colour(notice: &WarningNotice) -> Colour {
    if notice.is_final() {
        Colour::RED
    } else {
        Colour::ORANGE
    }
}

fn warning_embed(notice: &WarningNotice) -> CreateEmbed {
    CreateEmbed::new()
        .title(notice.title())
        .colour(notice_colour(notice))
        .author(CreateEmbedAuthor::new(&notice.member.display_name))
        .fields(warning_fields(notice))
        .footer(CreateEmbedFooter::new(WarningNotice::footer()))
}

fn log_embed(notice: &WarningNotice) -> CreateEmbed {
    CreateEmbed::new()
        .title(notice.log_title())
        .colour(notice_colour(notice))
        .author(CreateEmbedAuthor::new(&notice.member.display_name))
        .fields(log_fields(notice))
}

/// Welcome posted to a guild's system channel after the bot joins.
pub fn welcome_embed(log_channel_name: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title("👋 Mokosh is here!")
        .colour(Colour::BLURPLE)
        .description(format!(
            "I'm an AI-powered harassment detection bot.\n\n\
             I monitor all messages — text, images, audio, and video.\n\n\
             **What I do on violations:**\n\
             ⚠️ Warn the sender (delete message)\n\
             🚫 Ban after repeated violations\n\n\
             **Commands:**\n\
             `/mokosh check` — analyze any text\n\
             `/mokosh settings` — configure moderation (admins)\n\
             `/mokosh violations` — check a user's record (admins)\n\
             `/mokosh reset` — clear a user's violations (admins)\n\n\
             A private `#{}` channel has been created for admin logs.\n\n\
             ⚙️ Make sure I have **Ban Members**, **Moderate Members**, **Manage Messages**, \
             and **Read Message History** permissions.",
            log_channel_name
        ))
}

/// Discord implementation of [`PlatformAdapter`].
pub struct DiscordAdapter {
    http: Arc<Http>,
    client: reqwest::Client,
    log_channel_name: String,
}

impl DiscordAdapter {
    pub fn new(http: Arc<Http>, log_channel_name: impl Into<String>) -> Self {
        Self {
            http,
            client: reqwest::Client::new(),
            log_channel_name: log_channel_name.into(),
        }
    }

    async fn find_log_channel(&self, guild_id: GuildId) -> Result<Option<ChannelId>> {
        let channels = guild_id
            .channels(&self.http)
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;

        Ok(channels
            .values()
            .find(|c| c.kind == ChannelType::Text && c.name == self.log_channel_name)
            .map(|c| c.id))
    }

    /// Create the log channel hidden from everyone but admins and the bot.
    async fn create_log_channel(&self, guild_id: GuildId) -> Result<ChannelId> {
        let bot = self
            .http
            .get_current_user()
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;
        let roles = guild_id
            .roles(&self.http)
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;

        let mut overwrites = vec![
            PermissionOverwrite {
                allow: Permissions::empty(),
                deny: Permissions::VIEW_CHANNEL,
                kind: PermissionOverwriteType::Role(RoleId::new(guild_id.get())),
            },
            PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(bot.id),
            },
        ];
        overwrites.extend(
            roles
                .values()
                .filter(|role| role.permissions.administrator())
                .map(|role| PermissionOverwrite {
                    allow: Permissions::VIEW_CHANNEL,
                    deny: Permissions::empty(),
                    kind: PermissionOverwriteType::Role(role.id),
                }),
        );

        let channel = guild_id
            .create_channel(
                &self.http,
                CreateChannel::new(&self.log_channel_name)
                    .kind(ChannelType::Text)
                    .permissions(overwrites),
            )
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;

        tracing::info!(
            guild_id = %guild_id,
            channel_id = %channel.id,
            name = %self.log_channel_name,
            "Created log channel"
        );
        Ok(channel.id)
    }
}

#[async_trait]
impl PlatformAdapter for DiscordAdapter {
    async fn delete_message(&self, _scope_id: i64, message: MessageHandle) -> Result<()> {
        let channel_id: ChannelId = snowflake(message.channel_id)?;
        let message_id: MessageId = snowflake(message.message_id)?;

        self.http
            .delete_message(channel_id, message_id, Some(DELETE_REASON))
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))
    }

    async fn deliver_warning(&self, notice: &WarningNotice) -> Result<()> {
        let channel_id: ChannelId = snowflake(notice.message.channel_id)?;

        channel_id
            .send_message(
                &self.http,
                CreateMessage::new()
                    .content(warning_content(notice))
                    .embed(warning_embed(notice)),
            )
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;
        Ok(())
    }

    async fn resolve_log_destination(&self, scope_id: i64) -> Result<Option<LogDestination>> {
        let guild_id: GuildId = snowflake(scope_id)?;

        let channel_id = match self.find_log_channel(guild_id).await? {
            Some(id) => id,
            None => self.create_log_channel(guild_id).await?,
        };

        Ok(Some(LogDestination {
            channel_id: channel_id.get() as i64,
        }))
    }

    async fn post_log(&self, destination: &LogDestination, notice: &WarningNotice) -> Result<()> {
        let channel_id: ChannelId = snowflake(destination.channel_id)?;

        channel_id
            .send_message(&self.http, CreateMessage::new().embed(log_embed(notice)))
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;
        Ok(())
    }

    async fn restrict_member(
        &self,
        scope_id: i64,
        user_id: i64,
        restriction: &Restriction,
    ) -> Result<()> {
        let guild_id: GuildId = snowflake(scope_id)?;
        let user: UserId = snowflake(user_id)?;

        match restriction {
            Restriction::Ban { reason } => {
                self.http
                    .ban_user(guild_id, user, 0, Some(reason))
                    .await
                    .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;

                tracing::info!(guild_id = %guild_id, user_id = %user, "User banned");
            }
            Restriction::Mute { minutes } => {
                let until =
                    Timestamp::from_unix_timestamp(Utc::now().timestamp() + i64::from(*minutes) * 60)
                        .map_err(|e| {
                            MokoshError::InternalState(format!("Invalid timestamp: {}", e))
                        })?;
                let reason = format!("Mokosh: muted for {} minutes", minutes);
                let edit_member = EditMember::new()
                    .disable_communication_until(until.to_string())
                    .audit_log_reason(&reason);

                self.http
                    .edit_member(guild_id, user, &edit_member, Some(reason.as_str()))
                    .await
                    .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;

                tracing::info!(
                    guild_id = %guild_id,
                    user_id = %user,
                    minutes = minutes,
                    "User timed out"
                );
            }
        }

        Ok(())
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(&attachment.source)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn is_admin(&self, scope_id: i64, user_id: i64) -> Result<bool> {
        let guild_id: GuildId = snowflake(scope_id)?;
        let user: UserId = snowflake(user_id)?;

        let guild = self
            .http
            .get_guild(guild_id)
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;
        if guild.owner_id == user {
            return Ok(true);
        }

        let member = guild_id
            .member(&self.http, user)
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;

        let everyone = RoleId::new(guild_id.get());
        Ok(guild
            .roles
            .values()
            .filter(|role| role.id == everyone || member.roles.contains(&role.id))
            .any(|role| role.permissions.administrator()))
    }
}

/// Build the core event from a guild message.
pub fn content_event(guild_id: GuildId, msg: &Message) -> ContentEvent {
    let text = Some(msg.content.clone()).filter(|c| !c.trim().is_empty());

    let attachments = msg
        .attachments
        .iter()
        .map(|a| {
            let mut attachment = AttachmentRef {
                source: a.url.clone(),
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
                size: Some(u64::from(a.size)),
                label: String::new(),
                kind_hint: None,
            };
            if let Some(kind) = attachment.kind() {
                attachment.label = media_label(kind).to_string();
            }
            attachment
        })
        .collect();

    ContentEvent {
        scope_id: guild_id.get() as i64,
        member: MemberRef {
            user_id: msg.author.id.get() as i64,
            display_name: msg.author.display_name().to_string(),
        },
        message: MessageHandle {
            channel_id: msg.channel_id.get() as i64,
            message_id: msg.id.get() as i64,
        },
        caption: text.clone(),
        text,
        attachments,
    }
}

/// Gateway event handler for the Discord bot.
pub struct MokoshHandler {
    moderator: Arc<Moderator>,
    commands: Arc<SlashCommandHandler>,
    log_channel_name: String,
}

impl MokoshHandler {
    pub fn new(
        moderator: Arc<Moderator>,
        commands: Arc<SlashCommandHandler>,
        log_channel_name: impl Into<String>,
    ) -> Self {
        Self {
            moderator,
            commands,
            log_channel_name: log_channel_name.into(),
        }
    }
}

#[async_trait]
impl EventHandler for MokoshHandler {
    async fn message(&self, _ctx: Context, msg: Message) {
        // Ignore DMs and bot messages
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let event = content_event(guild_id, &msg);
        if let Err(e) = self.moderator.handle_event(&event).await {
            let ctx = ErrorContext::new("handle_message")
                .with_scope_id(event.scope_id)
                .with_user_id(event.member.user_id);
            e.log_with_context(&ctx);
        }
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, is_new: Option<bool>) {
        if is_new != Some(true) {
            return;
        }
        tracing::info!(guild_id = %guild.id, name = %guild.name, "Joined guild");

        let scope_id = guild.id.get() as i64;
        if let Err(e) = self.moderator.dispatcher().log_destination(scope_id).await {
            tracing::warn!(error = %e, guild_id = %guild.id, "Could not create log channel");
        }

        if let Some(system_channel) = guild.system_channel_id {
            if let Err(e) = system_channel
                .send_message(
                    &ctx.http,
                    CreateMessage::new().embed(welcome_embed(&self.log_channel_name)),
                )
                .await
            {
                tracing::warn!(error = %e, guild_id = %guild.id, "Failed to send welcome message");
            }
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let result = match &interaction {
            Interaction::Command(command) => self.commands.handle_command(&ctx, command).await,
            Interaction::Component(component) => {
                self.commands.handle_component(&ctx, component).await
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            e.log_with_context(&ErrorContext::new("interaction"));
        }
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            "Mokosh connected to Discord"
        );

        let commands = SlashCommandHandler::register_commands();
        if let Err(e) = serenity::all::Command::set_global_commands(&ctx.http, commands).await {
            tracing::error!(error = %e, "Failed to register slash commands");
        } else {
            tracing::info!("Slash commands registered");
        }
    }
}

/// Run the Discord bot until the gateway connection ends.
pub async fn run(
    config: &MokoshConfig,
    db: Arc<Database>,
    classifier: Arc<dyn Classify>,
) -> Result<()> {
    let http = Arc::new(Http::new(&config.bot_token));
    let adapter = Arc::new(DiscordAdapter::new(http, config.log_channel_name.clone()));
    let dispatcher = Arc::new(EnforcementDispatcher::new(adapter.clone()));
    let moderator = Arc::new(Moderator::new(db.clone(), classifier, dispatcher));
    let editor = Arc::new(SettingsEditor::new(db));

    let commands = Arc::new(SlashCommandHandler::new(
        moderator.clone(),
        editor,
        adapter,
    ));
    let handler = MokoshHandler::new(moderator, commands, config.log_channel_name.clone());

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;

    let mut client = Client::builder(&config.bot_token, intents)
        .event_handler(handler)
        .await
        .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;

    tracing::info!("Starting Discord client...");

    client
        .start()
        .await
        .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;

    Ok(())
}
