//! Per-scope moderation settings.
//!
//! Defaults are produced by `Settings::default()` and never mutated. Stored
//! settings are a JSON object of overrides; loading overlays them onto a fresh
//! default value key by key.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Lowest allowed mute duration in minutes.
pub const MUTE_MINUTES_MIN: u32 = 1;
/// Highest allowed mute duration in minutes (one week).
pub const MUTE_MINUTES_MAX: u32 = 10_080;
/// Lowest allowed violation threshold.
pub const THRESHOLD_MIN: u32 = 1;
/// Highest allowed violation threshold.
pub const THRESHOLD_MAX: u32 = 100;

/// Content categories reported by the classification API.
///
/// Declaration order is the display order in settings panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sexual,
    VerbalAbuse,
    Harassment,
    Gasslighting,
    Threat,
    Stalking,
    Other,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Category; 7] = [
        Category::Sexual,
        Category::VerbalAbuse,
        Category::Harassment,
        Category::Gasslighting,
        Category::Threat,
        Category::Stalking,
        Category::Other,
    ];

    /// Wire tag used by the API and in stored settings.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Sexual => "sexual",
            Self::VerbalAbuse => "verbal_abuse",
            Self::Harassment => "harassment",
            Self::Gasslighting => "gasslighting",
            Self::Threat => "threat",
            Self::Stalking => "stalking",
            Self::Other => "other",
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Sexual => "Sexual",
            Self::VerbalAbuse => "Verbal abuse",
            Self::Harassment => "Harassment",
            Self::Gasslighting => "Gaslighting",
            Self::Threat => "Threat",
            Self::Stalking => "Stalking",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The two instant-action category sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategorySet {
    Mute,
    Block,
}

impl CategorySet {
    /// Short name used in panel tokens.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Mute => "mute",
            Self::Block => "block",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "mute" => Some(Self::Mute),
            "block" => Some(Self::Block),
            _ => None,
        }
    }

    /// Settings key holding this set.
    pub fn key(self) -> &'static str {
        match self {
            Self::Mute => "instant_mute_categories",
            Self::Block => "instant_block_categories",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Mute => "Instant mute categories",
            Self::Block => "Instant ban categories",
        }
    }
}

/// Moderation settings for one guild or chat.
///
/// `min_confidence_for_action`, the mute fields, `block_threshold_violations`
/// and the instant category sets are stored and editable but not read by the
/// ban rule in [`crate::escalation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub min_confidence_for_action: f64,
    pub mute_minutes: u32,
    pub mute_threshold_violations: u32,
    pub block_threshold_violations: u32,
    pub auto_warn: bool,
    pub auto_mute: bool,
    pub auto_block: bool,
    #[serde(deserialize_with = "known_categories")]
    pub instant_mute_categories: BTreeSet<Category>,
    #[serde(deserialize_with = "known_categories")]
    pub instant_block_categories: BTreeSet<Category>,
    pub apply_only_if_not_safe: bool,
    pub tag_sender_in_reply: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_confidence_for_action: 0.55,
            mute_minutes: 60,
            mute_threshold_violations: 2,
            block_threshold_violations: 4,
            auto_warn: true,
            auto_mute: true,
            auto_block: true,
            instant_mute_categories: BTreeSet::from([
                Category::Sexual,
                Category::VerbalAbuse,
                Category::Harassment,
                Category::Gasslighting,
            ]),
            instant_block_categories: BTreeSet::from([Category::Threat, Category::Stalking]),
            apply_only_if_not_safe: true,
            tag_sender_in_reply: true,
        }
    }
}

impl Settings {
    /// Overlay stored overrides onto the defaults.
    ///
    /// Unknown keys are ignored. A key whose value has the wrong shape keeps
    /// its default and is returned in the list of rejected keys. Numeric
    /// fields are clamped into their editable ranges.
    pub fn from_overrides(overrides: &Map<String, Value>) -> (Self, Vec<String>) {
        let defaults = Self::default();
        let mut merged = match serde_json::to_value(&defaults) {
            Ok(Value::Object(map)) => map,
            _ => return (defaults, Vec::new()),
        };

        let mut rejected = Vec::new();
        for (key, value) in overrides {
            if !merged.contains_key(key) {
                continue;
            }
            let mut candidate = merged.clone();
            candidate.insert(key.clone(), value.clone());
            if serde_json::from_value::<Settings>(Value::Object(candidate)).is_ok() {
                merged.insert(key.clone(), value.clone());
            } else {
                rejected.push(key.clone());
            }
        }

        let settings = serde_json::from_value::<Settings>(Value::Object(merged))
            .map(Settings::clamped)
            .unwrap_or(defaults);
        (settings, rejected)
    }

    /// Full snapshot as a JSON object, suitable as a merge patch.
    pub fn to_overrides(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Force numeric fields into their documented ranges.
    pub fn clamped(mut self) -> Self {
        self.min_confidence_for_action = if self.min_confidence_for_action.is_finite() {
            self.min_confidence_for_action.clamp(0.0, 1.0)
        } else {
            Self::default().min_confidence_for_action
        };
        self.mute_minutes = self.mute_minutes.clamp(MUTE_MINUTES_MIN, MUTE_MINUTES_MAX);
        self.mute_threshold_violations = self
            .mute_threshold_violations
            .clamp(THRESHOLD_MIN, THRESHOLD_MAX);
        self.block_threshold_violations = self
            .block_threshold_violations
            .clamp(THRESHOLD_MIN, THRESHOLD_MAX);
        self
    }

    pub fn categories(&self, set: CategorySet) -> &BTreeSet<Category> {
        match set {
            CategorySet::Mute => &self.instant_mute_categories,
            CategorySet::Block => &self.instant_block_categories,
        }
    }

    pub fn categories_mut(&mut self, set: CategorySet) -> &mut BTreeSet<Category> {
        match set {
            CategorySet::Mute => &mut self.instant_mute_categories,
            CategorySet::Block => &mut self.instant_block_categories,
        }
    }
}

/// Accept a list of tags, dropping any that are not in [`Category::ALL`].
fn known_categories<'de, D>(deserializer: D) -> Result<BTreeSet<Category>, D::Error>
where
    D: Deserializer<'de>,
{
    let tags = Vec::<String>::deserialize(deserializer)?;
    Ok(tags.iter().filter_map(|t| Category::from_tag(t)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overrides(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert!((s.min_confidence_for_action - 0.55).abs() < f64::EPSILON);
        assert_eq!(s.mute_minutes, 60);
        assert_eq!(s.mute_threshold_violations, 2);
        assert_eq!(s.block_threshold_violations, 4);
        assert!(s.auto_warn && s.auto_mute && s.auto_block);
        assert_eq!(s.instant_mute_categories.len(), 4);
        assert!(s.instant_block_categories.contains(&Category::Threat));
        assert!(s.instant_block_categories.contains(&Category::Stalking));
        assert!(s.apply_only_if_not_safe);
        assert!(s.tag_sender_in_reply);
    }

    #[test]
    fn empty_overrides_yield_defaults() {
        let (s, rejected) = Settings::from_overrides(&Map::new());
        assert_eq!(s, Settings::default());
        assert!(rejected.is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let (s, rejected) = Settings::from_overrides(&overrides(json!({
            "legacy_flag": true,
            "mute_minutes": 90
        })));
        assert_eq!(s.mute_minutes, 90);
        assert!(rejected.is_empty());
    }

    #[test]
    fn wrongly_typed_key_keeps_default() {
        let (s, rejected) = Settings::from_overrides(&overrides(json!({
            "auto_warn": "yes",
            "auto_block": false
        })));
        assert!(s.auto_warn);
        assert!(!s.auto_block);
        assert_eq!(rejected, vec!["auto_warn".to_string()]);
    }

    #[test]
    fn unknown_category_tags_are_dropped() {
        let (s, _) = Settings::from_overrides(&overrides(json!({
            "instant_block_categories": ["threat", "spam", "other"]
        })));
        assert_eq!(
            s.instant_block_categories,
            BTreeSet::from([Category::Threat, Category::Other])
        );
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let (s, _) = Settings::from_overrides(&overrides(json!({
            "min_confidence_for_action": 3.5,
            "mute_minutes": 50000,
            "block_threshold_violations": 0
        })));
        assert!((s.min_confidence_for_action - 1.0).abs() < f64::EPSILON);
        assert_eq!(s.mute_minutes, MUTE_MINUTES_MAX);
        assert_eq!(s.block_threshold_violations, THRESHOLD_MIN);
    }

    #[test]
    fn categories_serialize_as_tags() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(value["instant_block_categories"], json!(["threat", "stalking"]));
        assert_eq!(
            value["instant_mute_categories"],
            json!(["sexual", "verbal_abuse", "harassment", "gasslighting"])
        );
    }

    #[test]
    fn category_tags_are_unique() {
        let tags: BTreeSet<_> = Category::ALL.iter().map(|c| c.tag()).collect();
        assert_eq!(tags.len(), Category::ALL.len());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_categories() -> impl Strategy<Value = BTreeSet<Category>> {
        prop::collection::btree_set(prop::sample::select(Category::ALL.to_vec()), 0..7)
    }

    fn arb_settings() -> impl Strategy<Value = Settings> {
        (
            0u32..=100,
            MUTE_MINUTES_MIN..=MUTE_MINUTES_MAX,
            THRESHOLD_MIN..=THRESHOLD_MAX,
            THRESHOLD_MIN..=THRESHOLD_MAX,
            any::<[bool; 5]>(),
            arb_categories(),
            arb_categories(),
        )
            .prop_map(|(conf, mute, mute_th, block_th, flags, mute_cats, block_cats)| Settings {
                min_confidence_for_action: conf as f64 / 100.0,
                mute_minutes: mute,
                mute_threshold_violations: mute_th,
                block_threshold_violations: block_th,
                auto_warn: flags[0],
                auto_mute: flags[1],
                auto_block: flags[2],
                instant_mute_categories: mute_cats,
                instant_block_categories: block_cats,
                apply_only_if_not_safe: flags[3],
                tag_sender_in_reply: flags[4],
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A full snapshot read back through the overlay is unchanged.
        #[test]
        fn prop_snapshot_overlay_is_identity(settings in arb_settings()) {
            let (loaded, rejected) = Settings::from_overrides(&settings.to_overrides());
            prop_assert!(rejected.is_empty());
            prop_assert_eq!(loaded, settings);
        }

        /// Overriding a subset of keys leaves every other key at its default.
        #[test]
        fn prop_partial_overlay_keeps_defaults(settings in arb_settings(), keep_mask in any::<u16>()) {
            let full = settings.to_overrides();
            let partial: Map<String, Value> = full
                .iter()
                .enumerate()
                .filter(|(i, _)| keep_mask & (1 << i) != 0)
                .map(|(_, (k, v))| (k.clone(), v.clone()))
                .collect();

            let (loaded, _) = Settings::from_overrides(&partial);
            let loaded_map = loaded.to_overrides();
            let default_map = Settings::default().to_overrides();

            for (key, value) in &loaded_map {
                let expected = partial.get(key).unwrap_or(&default_map[key]);
                prop_assert_eq!(value, expected, "key {}", key);
            }
        }
    }
}
