//! Escalation policy: turns a harmful verdict and the sender's prior count
//! into an enforcement decision.
//!
//! The ban floor is fixed process-wide. The per-scope thresholds in
//! [`Settings`] are not consulted by it.

use crate::models::{EnforcementAction, EnforcementDecision, Rationale, Verdict};
use crate::settings::Settings;

/// Cumulative violations at which a confident detection bans.
pub const BAN_VIOLATION_THRESHOLD: i64 = 2;

/// Minimum confidence for a ban.
pub const BAN_CONFIDENCE_THRESHOLD: f64 = 0.80;

/// Decide what to do about a harmful verdict.
///
/// Callers only invoke this for verdicts with `is_bad` set. The function has
/// no side effects; the caller records exactly one violation per call.
pub fn decide(verdict: &Verdict, settings: &Settings, prior_count: i64) -> EnforcementDecision {
    let new_count = prior_count.max(0) + 1;
    let should_ban =
        new_count >= BAN_VIOLATION_THRESHOLD && verdict.confidence >= BAN_CONFIDENCE_THRESHOLD;

    EnforcementDecision {
        new_count,
        chosen_action: if should_ban {
            EnforcementAction::Ban
        } else {
            EnforcementAction::Warn
        },
        should_delete_message: true,
        rationale: Rationale {
            categories: verdict.categories.clone(),
            confidence: verdict.confidence,
            note: if verdict.sender_response.is_empty() {
                verdict.explanation.clone()
            } else {
                verdict.sender_response.clone()
            },
        },
        mute_minutes: settings.mute_minutes,
    }
}

/// Standing of a user relative to the ban floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationStatus {
    Clean,
    OneMoreTriggersBan,
    BanOnNext,
}

impl ViolationStatus {
    pub fn from_count(count: i64) -> Self {
        match count {
            c if c >= BAN_VIOLATION_THRESHOLD => Self::BanOnNext,
            c if c == BAN_VIOLATION_THRESHOLD - 1 => Self::OneMoreTriggersBan,
            _ => Self::Clean,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Clean => "✅ Clean",
            Self::OneMoreTriggersBan => "⚠️ One more triggers ban",
            Self::BanOnNext => "🚫 Will be banned on next violation",
        }
    }
}

/// Audit reason attached to a ban.
pub fn ban_reason(decision: &EnforcementDecision) -> String {
    format!(
        "Mokosh: {} violations, {} confidence",
        decision.new_count,
        crate::models::confidence_percent(decision.rationale.confidence)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harmful(confidence: f64) -> Verdict {
        Verdict {
            is_bad: true,
            categories: vec!["harassment".to_string()],
            confidence,
            ..Default::default()
        }
    }

    #[test]
    fn second_confident_violation_bans() {
        let decision = decide(&harmful(0.80), &Settings::default(), 1);
        assert_eq!(decision.new_count, 2);
        assert_eq!(decision.chosen_action, EnforcementAction::Ban);
        assert!(decision.should_ban());
    }

    #[test]
    fn second_violation_below_confidence_warns() {
        let decision = decide(&harmful(0.79), &Settings::default(), 1);
        assert_eq!(decision.new_count, 2);
        assert_eq!(decision.chosen_action, EnforcementAction::Warn);
    }

    #[test]
    fn first_violation_always_warns() {
        let decision = decide(&harmful(1.0), &Settings::default(), 0);
        assert_eq!(decision.new_count, 1);
        assert_eq!(decision.chosen_action, EnforcementAction::Warn);
    }

    #[test]
    fn configurable_thresholds_do_not_move_the_floor() {
        let settings = Settings {
            block_threshold_violations: 1,
            min_confidence_for_action: 0.1,
            ..Settings::default()
        };
        let decision = decide(&harmful(0.5), &settings, 0);
        assert_eq!(decision.chosen_action, EnforcementAction::Warn);

        let settings = Settings {
            block_threshold_violations: 50,
            ..Settings::default()
        };
        let decision = decide(&harmful(0.95), &settings, 1);
        assert_eq!(decision.chosen_action, EnforcementAction::Ban);
    }

    #[test]
    fn rationale_carries_categories_and_confidence() {
        let decision = decide(&harmful(0.66), &Settings::default(), 3);
        assert_eq!(decision.rationale.categories, vec!["harassment"]);
        assert!((decision.rationale.confidence - 0.66).abs() < f64::EPSILON);
    }

    #[test]
    fn note_prefers_sender_response() {
        let mut verdict = harmful(0.5);
        verdict.explanation = "insulting language".to_string();
        assert_eq!(
            decide(&verdict, &Settings::default(), 0).rationale.note,
            "insulting language"
        );

        verdict.sender_response = "Please keep it civil.".to_string();
        assert_eq!(
            decide(&verdict, &Settings::default(), 0).rationale.note,
            "Please keep it civil."
        );
    }

    #[test]
    fn ban_reason_mentions_count_and_confidence() {
        let decision = decide(&harmful(0.87), &Settings::default(), 2);
        assert_eq!(ban_reason(&decision), "Mokosh: 3 violations, 87% confidence");
    }

    #[test]
    fn violation_status_lines() {
        assert_eq!(ViolationStatus::from_count(0), ViolationStatus::Clean);
        assert_eq!(ViolationStatus::from_count(1), ViolationStatus::OneMoreTriggersBan);
        assert_eq!(ViolationStatus::from_count(2), ViolationStatus::BanOnNext);
        assert_eq!(ViolationStatus::from_count(9), ViolationStatus::BanOnNext);
    }
}
