//! Slash command and settings panel handler for the Discord bot.
//!
//! Implements `/mokosh` with the `check`, `settings`, `violations` and
//! `reset` subcommands, and the button panel opened by `settings`.

use std::sync::Arc;

use serenity::all::{
    ButtonStyle, Colour, CommandDataOption, CommandDataOptionValue, CommandInteraction,
    CommandOptionType, ComponentInteraction, Context, CreateActionRow, CreateButton,
    CreateCommand, CreateCommandOption, CreateEmbed, CreateEmbedFooter,
    CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, Permissions,
};

use crate::editor::{
    category_button_label, category_summary, flag_button_label, on_off, Flag, NumericField,
    PanelAction, PanelView, SettingsEdit, SettingsEditor, StepDirection,
};
use crate::enforcement::PlatformAdapter;
use crate::error::{MokoshError, Result};
use crate::models::truncate_chars;
use crate::pipeline::{CheckReport, Moderator};
use crate::settings::{Category, CategorySet, Settings};

/// Discord's limits on a message's component layout.
pub const MAX_ACTION_ROWS: usize = 5;
pub const MAX_BUTTONS_PER_ROW: usize = 5;

const HOW_IT_WORKS: &str = "🤖 **How Mokosh works:**\n\n\
    1. Give me **Manage Messages**, **Ban Members** and **Moderate Members**\n\n\
    2. I silently watch every message\n\n\
    3. I analyze **text**, **images**, **audio** and **video** via the Mokosh API\n\n\
    4. On violations: the message is deleted and the sender warned. \
    A second confident violation is a ban.\n\n\
    Use `/mokosh check` to manually test any message.\n\
    Use `/mokosh settings` (admins) to customize behavior.";

/// One button of the settings panel.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelButton {
    pub label: String,
    pub action: PanelAction,
    pub style: ButtonStyle,
}

impl PanelButton {
    fn new(label: impl Into<String>, action: PanelAction, style: ButtonStyle) -> Self {
        Self {
            label: label.into(),
            action,
            style,
        }
    }

    fn edit(label: impl Into<String>, edit: SettingsEdit) -> Self {
        Self::new(label, PanelAction::Edit(edit), ButtonStyle::Secondary)
    }

    fn step(label: &str, field: NumericField, direction: StepDirection) -> Self {
        Self::edit(label, SettingsEdit::Step { field, direction })
    }

    fn build(&self) -> CreateButton {
        CreateButton::new(self.action.discord_custom_id())
            .label(&self.label)
            .style(self.style)
    }
}

/// Button rows for a panel view.
pub fn panel_layout(view: PanelView, settings: &Settings) -> Vec<Vec<PanelButton>> {
    match view {
        PanelView::Main => {
            let toggles = [Flag::AutoWarn, Flag::AutoMute, Flag::AutoBlock]
                .into_iter()
                .map(|flag| {
                    let style = if flag.get(settings) {
                        ButtonStyle::Success
                    } else {
                        ButtonStyle::Secondary
                    };
                    PanelButton::new(
                        flag_button_label(flag, settings),
                        PanelAction::Edit(SettingsEdit::Toggle(flag)),
                        style,
                    )
                })
                .collect();

            vec![
                toggles,
                vec![
                    PanelButton::step("🎯 Conf −", NumericField::Confidence, StepDirection::Down),
                    PanelButton::step("🎯 Conf +", NumericField::Confidence, StepDirection::Up),
                    PanelButton::step("⏱ −15m", NumericField::MuteMinutes, StepDirection::Down),
                    PanelButton::step("⏱ +15m", NumericField::MuteMinutes, StepDirection::Up),
                ],
                vec![
                    PanelButton::step(
                        "📈 Mute thresh −",
                        NumericField::MuteThreshold,
                        StepDirection::Down,
                    ),
                    PanelButton::step(
                        "📈 Mute thresh +",
                        NumericField::MuteThreshold,
                        StepDirection::Up,
                    ),
                    PanelButton::step(
                        "🚫 Ban thresh −",
                        NumericField::BlockThreshold,
                        StepDirection::Down,
                    ),
                    PanelButton::step(
                        "🚫 Ban thresh +",
                        NumericField::BlockThreshold,
                        StepDirection::Up,
                    ),
                ],
                vec![
                    PanelButton::new(
                        "⚡ Instant mute cats",
                        PanelAction::Show(PanelView::Categories(CategorySet::Mute)),
                        ButtonStyle::Primary,
                    ),
                    PanelButton::new(
                        "💥 Instant ban cats",
                        PanelAction::Show(PanelView::Categories(CategorySet::Block)),
                        ButtonStyle::Danger,
                    ),
                    PanelButton::new("📖 How it works", PanelAction::HowItWorks, ButtonStyle::Secondary),
                    PanelButton::new("✅ Done", PanelAction::Close, ButtonStyle::Success),
                ],
            ]
        }
        PanelView::Categories(set) => {
            let mut rows: Vec<Vec<PanelButton>> = Category::ALL
                .chunks(4)
                .map(|chunk| {
                    chunk
                        .iter()
                        .map(|&category| {
                            PanelButton::edit(
                                category_button_label(set, category, settings),
                                SettingsEdit::ToggleCategory { set, category },
                            )
                        })
                        .collect()
                })
                .collect();
            rows.push(vec![PanelButton::new(
                "← Back",
                PanelAction::Show(PanelView::Main),
                ButtonStyle::Primary,
            )]);
            rows
        }
    }
}

/// Embed describing a panel view.
pub fn panel_embed(view: PanelView, settings: &Settings) -> CreateEmbed {
    match view {
        PanelView::Main => CreateEmbed::new()
            .title("⚙️ Mokosh Settings")
            .colour(Colour::BLURPLE)
            .fields(main_panel_fields(settings))
            .footer(CreateEmbedFooter::new("Use the buttons below to change settings.")),
        PanelView::Categories(set) => CreateEmbed::new()
            .title(format!("⚡ {}", set.title()))
            .colour(Colour::BLURPLE)
            .description(format!(
                "Tap to toggle.\nCurrent: `{}`",
                category_summary(settings, set)
            )),
    }
}

/// Fields of the main settings embed as `(name, value, inline)`.
pub fn main_panel_fields(settings: &Settings) -> Vec<(&'static str, String, bool)> {
    vec![
        (
            "🎯 Confidence threshold",
            format!("`{}`", NumericField::Confidence.display(settings)),
            true,
        ),
        (
            "⏱ Mute duration",
            format!("`{}`", NumericField::MuteMinutes.display(settings)),
            true,
        ),
        (
            "📈 Mute after N violations",
            format!("`{}`", NumericField::MuteThreshold.display(settings)),
            true,
        ),
        (
            "🚫 Ban after N violations",
            format!("`{}`", NumericField::BlockThreshold.display(settings)),
            true,
        ),
        ("⚠️ Auto-warn", on_off(settings.auto_warn).to_string(), true),
        ("🔇 Auto-mute", on_off(settings.auto_mute).to_string(), true),
        ("🚫 Auto-ban", on_off(settings.auto_block).to_string(), true),
        (
            "⚡ Instant mute categories",
            format!("`{}`", category_summary(settings, CategorySet::Mute)),
            false,
        ),
        (
            "💥 Instant ban categories",
            format!("`{}`", category_summary(settings, CategorySet::Block)),
            false,
        ),
    ]
}

fn panel_components(view: PanelView, settings: &Settings) -> Vec<CreateActionRow> {
    panel_layout(view, settings)
        .iter()
        .map(|row| CreateActionRow::Buttons(row.iter().map(PanelButton::build).collect()))
        .collect()
}

fn check_embed(report: &CheckReport) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(format!("{} {}", report.icon(), report.status()))
        .colour(if report.is_bad {
            Colour::RED
        } else {
            Colour::DARK_GREEN
        })
        .field("Category", format!("`{}`", report.categories), true)
        .field("Confidence", format!("`{}`", report.confidence_text()), true)
        .field(
            "Suggested action",
            format!("`{}`", report.suggested_action),
            true,
        );
    if !report.explanation.is_empty() {
        embed = embed.field("Analysis", &report.explanation, false);
    }
    embed
}

/// Options nested under the invoked subcommand.
fn subcommand_options(command: &CommandInteraction) -> &[CommandDataOption] {
    command
        .data
        .options
        .first()
        .and_then(|o| match &o.value {
            CommandDataOptionValue::SubCommand(opts) => Some(opts.as_slice()),
            _ => None,
        })
        .unwrap_or(&[])
}

/// Handler for `/mokosh` and the settings panel buttons.
pub struct SlashCommandHandler {
    moderator: Arc<Moderator>,
    editor: Arc<SettingsEditor>,
    adapter: Arc<dyn PlatformAdapter>,
}

impl SlashCommandHandler {
    pub fn new(
        moderator: Arc<Moderator>,
        editor: Arc<SettingsEditor>,
        adapter: Arc<dyn PlatformAdapter>,
    ) -> Self {
        Self {
            moderator,
            editor,
            adapter,
        }
    }

    /// Register all slash commands with Discord.
    pub fn register_commands() -> Vec<CreateCommand> {
        vec![Self::create_mokosh_command()]
    }

    fn create_mokosh_command() -> CreateCommand {
        CreateCommand::new("mokosh")
            .description("Mokosh moderation commands")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "check",
                    "Analyze text for harassment (no moderation applied)",
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "text",
                        "The message text to analyze",
                    )
                    .required(true),
                ),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "settings",
                "View or change moderation settings (admins only)",
            ))
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "violations",
                    "Show a user's violation count (admins only)",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::User, "user", "User to look up")
                        .required(true),
                ),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "reset",
                    "Reset a user's violation count (admins only)",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::User, "user", "User to reset")
                        .required(true),
                ),
            )
    }

    /// Handle an incoming slash command interaction.
    pub async fn handle_command(&self, ctx: &Context, command: &CommandInteraction) -> Result<()> {
        let subcommand = command
            .data
            .options
            .first()
            .map(|o| o.name.as_str())
            .unwrap_or("check");

        if subcommand != "check" && !Self::is_admin(command) {
            return self
                .respond_error(ctx, command, "Only administrators can use this command.")
                .await;
        }

        match subcommand {
            "check" => self.handle_check(ctx, command).await,
            "settings" => self.handle_settings(ctx, command).await,
            "violations" => self.handle_violations(ctx, command).await,
            "reset" => self.handle_reset(ctx, command).await,
            _ => self.respond_error(ctx, command, "Unknown subcommand.").await,
        }
    }

    fn is_admin(command: &CommandInteraction) -> bool {
        member_is_admin(command.member.as_ref().and_then(|m| m.permissions))
    }

    async fn handle_check(&self, ctx: &Context, command: &CommandInteraction) -> Result<()> {
        let text = subcommand_options(command)
            .iter()
            .find(|o| o.name == "text")
            .and_then(|o| o.value.as_str())
            .map(str::trim)
            .unwrap_or_default();

        if text.is_empty() {
            return self
                .respond_error(ctx, command, "Please provide some text to check.")
                .await;
        }

        // Classification can outlast the three second response window
        command
            .defer_ephemeral(&ctx.http)
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;

        let scope_id = command.guild_id.map(|g| g.get() as i64);
        let followup = match self.moderator.check(text, scope_id).await {
            Ok(report) => CreateInteractionResponseFollowup::new().embed(check_embed(&report)),
            Err(e) => {
                tracing::warn!(error = %e, "Manual check failed");
                CreateInteractionResponseFollowup::new().content(format!("❌ {}", e.user_message()))
            }
        };

        command
            .create_followup(&ctx.http, followup.ephemeral(true))
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))?;
        Ok(())
    }

    async fn handle_settings(&self, ctx: &Context, command: &CommandInteraction) -> Result<()> {
        let guild_id = command
            .guild_id
            .ok_or_else(|| MokoshError::InternalState("Command must be used in a server".to_string()))?;

        let settings = self.editor.settings(guild_id.get() as i64).await?;
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .embed(panel_embed(PanelView::Main, &settings))
                .components(panel_components(PanelView::Main, &settings))
                .ephemeral(true),
        );

        self.send_response(ctx, command, response).await
    }

    async fn handle_violations(&self, ctx: &Context, command: &CommandInteraction) -> Result<()> {
        let guild_id = command
            .guild_id
            .ok_or_else(|| MokoshError::InternalState("Command must be used in a server".to_string()))?;

        let Some(user_id) = subcommand_options(command)
            .iter()
            .find(|o| o.name == "user")
            .and_then(|o| o.value.as_user_id())
        else {
            return self
                .respond_error(ctx, command, "Please specify a user.")
                .await;
        };

        let report = self
            .moderator
            .violations(guild_id.get() as i64, user_id.get() as i64)
            .await?;

        let embed = CreateEmbed::new()
            .title("📊 Violation Record")
            .colour(Colour::BLURPLE)
            .description(format!("<@{}>", user_id))
            .field("Violations", report.count.to_string(), true)
            .field("Status", report.status.describe(), true);

        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .embed(embed)
                .ephemeral(true),
        );
        self.send_response(ctx, command, response).await
    }

    async fn handle_reset(&self, ctx: &Context, command: &CommandInteraction) -> Result<()> {
        let guild_id = command
            .guild_id
            .ok_or_else(|| MokoshError::InternalState("Command must be used in a server".to_string()))?;

        let Some(user_id) = subcommand_options(command)
            .iter()
            .find(|o| o.name == "user")
            .and_then(|o| o.value.as_user_id())
        else {
            return self
                .respond_error(ctx, command, "Please specify a user.")
                .await;
        };

        self.moderator
            .reset(guild_id.get() as i64, user_id.get() as i64)
            .await?;

        self.respond_message(
            ctx,
            command,
            &format!("✅ Violation count for <@{}> has been reset to 0.", user_id),
        )
        .await
    }

    /// Handle a settings panel button press.
    pub async fn handle_component(
        &self,
        ctx: &Context,
        component: &ComponentInteraction,
    ) -> Result<()> {
        let Some(action) = PanelAction::parse_discord_custom_id(&component.data.custom_id) else {
            return Ok(());
        };
        let Some(guild_id) = component.guild_id else {
            return Ok(());
        };
        let scope_id = guild_id.get() as i64;
        let actor_id = component.user.id.get() as i64;

        let response = match action {
            PanelAction::Noop => CreateInteractionResponse::Acknowledge,
            PanelAction::HowItWorks => CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(HOW_IT_WORKS)
                    .ephemeral(true),
            ),
            PanelAction::Close => CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new()
                    .content("✅ Settings saved.")
                    .embeds(Vec::new())
                    .components(Vec::new()),
            ),
            PanelAction::Show(view) => {
                if !self.adapter.is_admin(scope_id, actor_id).await? {
                    return self.deny_component(ctx, component).await;
                }
                let settings = self.editor.settings(scope_id).await?;
                Self::panel_update(view, &settings)
            }
            PanelAction::Edit(edit) => {
                let settings = match self
                    .editor
                    .apply_gated(self.adapter.as_ref(), scope_id, actor_id, edit)
                    .await
                {
                    Ok(settings) => settings,
                    Err(MokoshError::Forbidden(_)) => {
                        return self.deny_component(ctx, component).await
                    }
                    Err(e) => return Err(e),
                };
                let view = action.next_view().unwrap_or(PanelView::Main);
                Self::panel_update(view, &settings)
            }
        };

        component
            .create_response(&ctx.http, response)
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))
    }

    fn panel_update(view: PanelView, settings: &Settings) -> CreateInteractionResponse {
        CreateInteractionResponse::UpdateMessage(
            CreateInteractionResponseMessage::new()
                .embed(panel_embed(view, settings))
                .components(panel_components(view, settings)),
        )
    }

    async fn deny_component(&self, ctx: &Context, component: &ComponentInteraction) -> Result<()> {
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content("🔒 Admins only.")
                .ephemeral(true),
        );
        component
            .create_response(&ctx.http, response)
            .await
            .map_err(|e| MokoshError::DiscordApi(Box::new(e)))
    }

    async fn send_response(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        response: CreateInteractionResponse,
    ) -> Result<()> {
        match command.create_response(&ctx.http, response).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Discord may time out or another instance may respond first
                if e.to_string().contains("already been acknowledged") {
                    Ok(())
                } else {
                    Err(MokoshError::DiscordApi(Box::new(e)))
                }
            }
        }
    }

    async fn respond_message(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        content: &str,
    ) -> Result<()> {
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(truncate_chars(content, 2000))
                .ephemeral(true),
        );
        self.send_response(ctx, command, response).await
    }

    async fn respond_error(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        message: &str,
    ) -> Result<()> {
        self.respond_message(ctx, command, &format!("❌ {}", message))
            .await
    }
}

/// Resolved interaction permissions grant admin subcommands only with the
/// administrator bit. Outside a guild there is nothing to resolve.
fn member_is_admin(permissions: Option<Permissions>) -> bool {
    permissions.is_some_and(|p| p.administrator())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_commands_creates_mokosh() {
        let commands = SlashCommandHandler::register_commands();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn panel_layout_fits_discord_limits() {
        let settings = Settings::default();
        for view in [
            PanelView::Main,
            PanelView::Categories(CategorySet::Mute),
            PanelView::Categories(CategorySet::Block),
        ] {
            let rows = panel_layout(view, &settings);
            assert!(rows.len() <= MAX_ACTION_ROWS);
            for row in &rows {
                assert!(!row.is_empty());
                assert!(row.len() <= MAX_BUTTONS_PER_ROW);
                for button in row {
                    assert!(button.action.discord_custom_id().len() <= 100);
                    assert!(button.label.chars().count() <= 80);
                }
            }
        }
    }

    #[test]
    fn category_view_lists_every_category_once() {
        let settings = Settings::default();
        let rows = panel_layout(PanelView::Categories(CategorySet::Mute), &settings);
        let toggled: Vec<Category> = rows
            .iter()
            .flatten()
            .filter_map(|b| match b.action {
                PanelAction::Edit(SettingsEdit::ToggleCategory { category, .. }) => Some(category),
                _ => None,
            })
            .collect();
        assert_eq!(toggled, Category::ALL.to_vec());
        assert_eq!(
            rows.last().map(|r| r[0].action),
            Some(PanelAction::Show(PanelView::Main))
        );
    }

    #[test]
    fn main_panel_shows_current_values() {
        let settings = Settings {
            auto_block: false,
            ..Settings::default()
        };
        let fields = main_panel_fields(&settings);
        assert!(fields.contains(&("🎯 Confidence threshold", "`0.55`".to_string(), true)));
        assert!(fields.contains(&("⏱ Mute duration", "`60 min`".to_string(), true)));
        assert!(fields.contains(&("🚫 Auto-ban", "❌".to_string(), true)));
        assert!(fields.contains(&(
            "💥 Instant ban categories",
            "`threat, stalking`".to_string(),
            false
        )));

        let rows = panel_layout(PanelView::Main, &settings);
        let ban_toggle = &rows[0][2];
        assert_eq!(ban_toggle.label, "🚫 Auto-ban ❌");
        assert_eq!(ban_toggle.style, ButtonStyle::Secondary);
    }
}
