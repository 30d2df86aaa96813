//! Interactive settings editing.
//!
//! Edits are pure transformations of a [`Settings`] value. Persisting one
//! writes only the key it touched, so two admins editing different fields of
//! the same scope never overwrite each other.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::database::Database;
use crate::enforcement::PlatformAdapter;
use crate::error::{MokoshError, Result};
use crate::settings::{
    Category, CategorySet, Settings, MUTE_MINUTES_MAX, MUTE_MINUTES_MIN, THRESHOLD_MAX,
    THRESHOLD_MIN,
};

/// Prefix of every panel callback id.
pub const CALLBACK_PREFIX: &str = "stg";

/// Telegram's limit on inline button callback data.
pub const MAX_CALLBACK_BYTES: usize = 64;

const CONFIDENCE_STEP: f64 = 0.05;
const MUTE_MINUTES_STEP: u32 = 15;
const THRESHOLD_STEP: u32 = 1;

/// Boolean settings that can be toggled from the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    AutoWarn,
    AutoMute,
    AutoBlock,
    ApplyOnlyIfNotSafe,
    TagSenderInReply,
}

impl Flag {
    pub const ALL: [Flag; 5] = [
        Flag::AutoWarn,
        Flag::AutoMute,
        Flag::AutoBlock,
        Flag::ApplyOnlyIfNotSafe,
        Flag::TagSenderInReply,
    ];

    /// Settings key, also used as the panel token.
    pub fn key(self) -> &'static str {
        match self {
            Self::AutoWarn => "auto_warn",
            Self::AutoMute => "auto_mute",
            Self::AutoBlock => "auto_block",
            Self::ApplyOnlyIfNotSafe => "apply_only_if_not_safe",
            Self::TagSenderInReply => "tag_sender_in_reply",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::AutoWarn => "⚠️ Auto-warn",
            Self::AutoMute => "🔇 Auto-mute",
            Self::AutoBlock => "🚫 Auto-ban",
            Self::ApplyOnlyIfNotSafe => "🛡 Only act on unsafe",
            Self::TagSenderInReply => "🏷 Tag sender",
        }
    }

    pub fn get(self, settings: &Settings) -> bool {
        match self {
            Self::AutoWarn => settings.auto_warn,
            Self::AutoMute => settings.auto_mute,
            Self::AutoBlock => settings.auto_block,
            Self::ApplyOnlyIfNotSafe => settings.apply_only_if_not_safe,
            Self::TagSenderInReply => settings.tag_sender_in_reply,
        }
    }

    fn slot(self, settings: &mut Settings) -> &mut bool {
        match self {
            Self::AutoWarn => &mut settings.auto_warn,
            Self::AutoMute => &mut settings.auto_mute,
            Self::AutoBlock => &mut settings.auto_block,
            Self::ApplyOnlyIfNotSafe => &mut settings.apply_only_if_not_safe,
            Self::TagSenderInReply => &mut settings.tag_sender_in_reply,
        }
    }
}

/// Numeric settings adjusted with −/+ buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericField {
    Confidence,
    MuteMinutes,
    MuteThreshold,
    BlockThreshold,
}

impl NumericField {
    pub const ALL: [NumericField; 4] = [
        NumericField::Confidence,
        NumericField::MuteMinutes,
        NumericField::MuteThreshold,
        NumericField::BlockThreshold,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Confidence => "conf",
            Self::MuteMinutes => "mute",
            Self::MuteThreshold => "muteth",
            Self::BlockThreshold => "banth",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.tag() == tag)
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Confidence => "min_confidence_for_action",
            Self::MuteMinutes => "mute_minutes",
            Self::MuteThreshold => "mute_threshold_violations",
            Self::BlockThreshold => "block_threshold_violations",
        }
    }

    /// Current value rendered for a panel.
    pub fn display(self, settings: &Settings) -> String {
        match self {
            Self::Confidence => format!("{:.2}", settings.min_confidence_for_action),
            Self::MuteMinutes => format!("{} min", settings.mute_minutes),
            Self::MuteThreshold => settings.mute_threshold_violations.to_string(),
            Self::BlockThreshold => settings.block_threshold_violations.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepDirection {
    Down,
    Up,
}

impl StepDirection {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Down => "-",
            Self::Up => "+",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "-" => Some(Self::Down),
            "+" => Some(Self::Up),
            _ => None,
        }
    }
}

/// One change to a scope's settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsEdit {
    Toggle(Flag),
    Step {
        field: NumericField,
        direction: StepDirection,
    },
    ToggleCategory {
        set: CategorySet,
        category: Category,
    },
}

impl SettingsEdit {
    /// Apply the edit to a snapshot.
    pub fn apply(&self, settings: &Settings) -> Settings {
        let mut next = settings.clone();
        match *self {
            Self::Toggle(flag) => {
                let slot = flag.slot(&mut next);
                *slot = !*slot;
            }
            Self::Step { field, direction } => step_field(&mut next, field, direction),
            Self::ToggleCategory { set, category } => {
                let categories = next.categories_mut(set);
                if !categories.remove(&category) {
                    categories.insert(category);
                }
            }
        }
        next
    }

    /// Settings key the edit writes.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Toggle(flag) => flag.key(),
            Self::Step { field, .. } => field.key(),
            Self::ToggleCategory { set, .. } => set.key(),
        }
    }

    /// Merge patch holding only the edited key, valued from `updated`.
    pub fn patch(&self, updated: &Settings) -> Map<String, Value> {
        let key = self.key();
        let mut patch = Map::new();
        if let Some(value) = updated.to_overrides().remove(key) {
            patch.insert(key.to_string(), value);
        }
        patch
    }
}

fn step_field(settings: &mut Settings, field: NumericField, direction: StepDirection) {
    match field {
        NumericField::Confidence => {
            let delta = match direction {
                StepDirection::Up => CONFIDENCE_STEP,
                StepDirection::Down => -CONFIDENCE_STEP,
            };
            let value = ((settings.min_confidence_for_action + delta) * 100.0).round() / 100.0;
            settings.min_confidence_for_action = value.clamp(0.0, 1.0);
        }
        NumericField::MuteMinutes => {
            settings.mute_minutes = step_u32(
                settings.mute_minutes,
                MUTE_MINUTES_STEP,
                direction,
                MUTE_MINUTES_MIN,
                MUTE_MINUTES_MAX,
            );
        }
        NumericField::MuteThreshold => {
            settings.mute_threshold_violations = step_u32(
                settings.mute_threshold_violations,
                THRESHOLD_STEP,
                direction,
                THRESHOLD_MIN,
                THRESHOLD_MAX,
            );
        }
        NumericField::BlockThreshold => {
            settings.block_threshold_violations = step_u32(
                settings.block_threshold_violations,
                THRESHOLD_STEP,
                direction,
                THRESHOLD_MIN,
                THRESHOLD_MAX,
            );
        }
    }
}

fn step_u32(value: u32, step: u32, direction: StepDirection, min: u32, max: u32) -> u32 {
    let next = match direction {
        StepDirection::Up => value.saturating_add(step),
        StepDirection::Down => value.saturating_sub(step),
    };
    next.clamp(min, max)
}

/// Screens of the settings panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelView {
    Main,
    Categories(CategorySet),
}

/// What a panel button does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelAction {
    Edit(SettingsEdit),
    Show(PanelView),
    Close,
    Noop,
    HowItWorks,
}

impl PanelAction {
    /// Short token used as button id or callback data.
    pub fn token(&self) -> String {
        match self {
            Self::Edit(SettingsEdit::Toggle(flag)) => format!("t:{}", flag.key()),
            Self::Edit(SettingsEdit::Step { field, direction }) => {
                format!("s:{}:{}", field.tag(), direction.tag())
            }
            Self::Edit(SettingsEdit::ToggleCategory { set, category }) => {
                format!("c:{}:{}", set.tag(), category.tag())
            }
            Self::Show(PanelView::Main) => "main".to_string(),
            Self::Show(PanelView::Categories(set)) => format!("cats:{}", set.tag()),
            Self::Close => "close".to_string(),
            Self::Noop => "noop".to_string(),
            Self::HowItWorks => "how".to_string(),
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "main" => return Some(Self::Show(PanelView::Main)),
            "close" => return Some(Self::Close),
            "noop" => return Some(Self::Noop),
            "how" => return Some(Self::HowItWorks),
            _ => {}
        }

        let mut parts = token.split(':');
        let action = match (parts.next()?, parts.next()?, parts.next()) {
            ("t", key, None) => Self::Edit(SettingsEdit::Toggle(Flag::from_key(key)?)),
            ("s", field, Some(direction)) => Self::Edit(SettingsEdit::Step {
                field: NumericField::from_tag(field)?,
                direction: StepDirection::from_tag(direction)?,
            }),
            ("c", set, Some(category)) => Self::Edit(SettingsEdit::ToggleCategory {
                set: CategorySet::from_tag(set)?,
                category: Category::from_tag(category)?,
            }),
            ("cats", set, None) => Self::Show(PanelView::Categories(CategorySet::from_tag(set)?)),
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(action)
    }

    /// Whether the action changes stored settings and so needs an admin.
    pub fn requires_admin(&self) -> bool {
        !matches!(self, Self::Noop | Self::HowItWorks)
    }

    /// View to render after the action, `None` when the panel is unchanged
    /// or goes away.
    pub fn next_view(&self) -> Option<PanelView> {
        match self {
            Self::Edit(SettingsEdit::ToggleCategory { set, .. }) => {
                Some(PanelView::Categories(*set))
            }
            Self::Edit(_) => Some(PanelView::Main),
            Self::Show(view) => Some(*view),
            Self::Close | Self::Noop | Self::HowItWorks => None,
        }
    }

    /// Discord component id.
    pub fn discord_custom_id(&self) -> String {
        format!("{}|{}", CALLBACK_PREFIX, self.token())
    }

    pub fn parse_discord_custom_id(custom_id: &str) -> Option<Self> {
        let (prefix, token) = custom_id.split_once('|')?;
        if prefix != CALLBACK_PREFIX {
            return None;
        }
        Self::parse(token)
    }

    /// Telegram callback data, bound to a chat so the panel can be edited
    /// from wherever the button is pressed.
    pub fn telegram_callback_data(&self, chat_id: i64) -> String {
        format!("{}|{}|{}", CALLBACK_PREFIX, chat_id, self.token())
    }

    pub fn parse_telegram_callback_data(data: &str) -> Option<(i64, Self)> {
        let mut parts = data.splitn(3, '|');
        if parts.next()? != CALLBACK_PREFIX {
            return None;
        }
        let chat_id = parts.next()?.parse::<i64>().ok()?;
        let action = Self::parse(parts.next()?)?;
        Some((chat_id, action))
    }
}

/// Label for a flag toggle button.
pub fn flag_button_label(flag: Flag, settings: &Settings) -> String {
    format!("{} {}", flag.label(), on_off(flag.get(settings)))
}

/// Label for a category toggle button.
pub fn category_button_label(set: CategorySet, category: Category, settings: &Settings) -> String {
    let mark = if settings.categories(set).contains(&category) {
        "✅"
    } else {
        "☐"
    };
    format!("{} {}", mark, category.label())
}

pub fn on_off(value: bool) -> &'static str {
    if value {
        "✅"
    } else {
        "❌"
    }
}

/// Category tags of a set, comma separated, or "none".
pub fn category_summary(settings: &Settings, set: CategorySet) -> String {
    let tags: Vec<&str> = settings.categories(set).iter().map(|c| c.tag()).collect();
    if tags.is_empty() {
        "none".to_string()
    } else {
        tags.join(", ")
    }
}

/// Applies edits to stored settings.
pub struct SettingsEditor {
    db: Arc<Database>,
}

impl SettingsEditor {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn settings(&self, scope_id: i64) -> Result<Settings> {
        self.db.get_settings(scope_id).await
    }

    /// Apply one edit and return the resulting snapshot.
    pub async fn apply_edit(&self, scope_id: i64, edit: SettingsEdit) -> Result<Settings> {
        let stored = self
            .db
            .update_settings(scope_id, |current| edit.patch(&edit.apply(current)))
            .await?;

        tracing::info!(scope_id, key = edit.key(), "Settings updated");
        Ok(stored)
    }

    /// Apply an edit on behalf of `actor_id` after checking they administer
    /// the scope.
    pub async fn apply_gated(
        &self,
        adapter: &dyn PlatformAdapter,
        scope_id: i64,
        actor_id: i64,
        edit: SettingsEdit,
    ) -> Result<Settings> {
        if !adapter.is_admin(scope_id, actor_id).await? {
            return Err(MokoshError::Forbidden(format!(
                "user {} is not an administrator of {}",
                actor_id, scope_id
            )));
        }
        self.apply_edit(scope_id, edit).await
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_field() -> impl Strategy<Value = NumericField> {
        prop::sample::select(NumericField::ALL.to_vec())
    }

    fn arb_direction() -> impl Strategy<Value = StepDirection> {
        prop_oneof![Just(StepDirection::Up), Just(StepDirection::Down)]
    }

    fn arb_category() -> impl Strategy<Value = Category> {
        prop::sample::select(Category::ALL.to_vec())
    }

    fn arb_set() -> impl Strategy<Value = CategorySet> {
        prop_oneof![Just(CategorySet::Mute), Just(CategorySet::Block)]
    }

    fn arb_edit() -> impl Strategy<Value = SettingsEdit> {
        prop_oneof![
            prop::sample::select(Flag::ALL.to_vec()).prop_map(SettingsEdit::Toggle),
            (arb_field(), arb_direction())
                .prop_map(|(field, direction)| SettingsEdit::Step { field, direction }),
            (arb_set(), arb_category())
                .prop_map(|(set, category)| SettingsEdit::ToggleCategory { set, category }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any sequence of steps keeps every numeric field in range.
        #[test]
        fn prop_steps_stay_clamped(
            steps in prop::collection::vec((arb_field(), arb_direction()), 0..200)
        ) {
            let mut settings = Settings::default();
            for (field, direction) in steps {
                settings = SettingsEdit::Step { field, direction }.apply(&settings);
            }
            prop_assert!((0.0..=1.0).contains(&settings.min_confidence_for_action));
            prop_assert!((MUTE_MINUTES_MIN..=MUTE_MINUTES_MAX).contains(&settings.mute_minutes));
            prop_assert!((THRESHOLD_MIN..=THRESHOLD_MAX).contains(&settings.mute_threshold_violations));
            prop_assert!((THRESHOLD_MIN..=THRESHOLD_MAX).contains(&settings.block_threshold_violations));
        }

        /// Toggling a category twice restores the original settings.
        #[test]
        fn prop_double_category_toggle_is_identity(set in arb_set(), category in arb_category()) {
            let edit = SettingsEdit::ToggleCategory { set, category };
            let original = Settings::default();
            prop_assert_eq!(edit.apply(&edit.apply(&original)), original);
        }

        /// Every edit survives the token codec, on both platforms.
        #[test]
        fn prop_token_round_trip(edit in arb_edit(), chat_id in any::<i64>()) {
            let action = PanelAction::Edit(edit);
            prop_assert_eq!(PanelAction::parse(&action.token()), Some(action));
            prop_assert_eq!(
                PanelAction::parse_discord_custom_id(&action.discord_custom_id()),
                Some(action)
            );
            prop_assert_eq!(
                PanelAction::parse_telegram_callback_data(&action.telegram_callback_data(chat_id)),
                Some((chat_id, action))
            );
        }

        /// The patch of any edit names exactly the key it edits.
        #[test]
        fn prop_patch_is_single_key(edit in arb_edit()) {
            let updated = edit.apply(&Settings::default());
            let patch = edit.patch(&updated);
            prop_assert_eq!(patch.len(), 1);
            prop_assert!(patch.contains_key(edit.key()));
        }
    }
}
