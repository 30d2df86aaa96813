//! Carries out escalation decisions against a chat platform.
//!
//! Each step (delete, warn, log, restrict) runs regardless of how the
//! previous ones went. Failures are logged and reported in the outcome,
//! never retried.

use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;

use crate::error::{MokoshError, Result};
use crate::escalation::{ban_reason, BAN_CONFIDENCE_THRESHOLD, BAN_VIOLATION_THRESHOLD};
use crate::models::{
    confidence_percent, truncate_chars, AttachmentRef, EnforcementAction, EnforcementDecision,
    MemberRef, MessageHandle,
};

/// Longest note shown in warnings and log entries.
pub const MAX_NOTE_CHARS: usize = 500;

/// Where enforcement logs for a scope are mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogDestination {
    pub channel_id: i64,
}

/// Member restriction applied after the warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restriction {
    Mute { minutes: u32 },
    Ban { reason: String },
}

/// Everything an adapter needs to render a warning or log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WarningNotice {
    pub scope_id: i64,
    pub member: MemberRef,
    pub message: MessageHandle,
    pub media_label: Option<String>,
    pub categories: Vec<String>,
    pub confidence: f64,
    pub violation_count: i64,
    /// Already truncated to [`MAX_NOTE_CHARS`].
    pub note: String,
    pub action: EnforcementAction,
}

impl WarningNotice {
    pub fn new(
        decision: &EnforcementDecision,
        scope_id: i64,
        member: &MemberRef,
        message: MessageHandle,
        media_label: Option<&str>,
    ) -> Self {
        Self {
            scope_id,
            member: member.clone(),
            message,
            media_label: media_label.filter(|l| !l.is_empty()).map(str::to_string),
            categories: decision.rationale.categories.clone(),
            confidence: decision.rationale.confidence,
            violation_count: decision.new_count,
            note: truncate_chars(decision.rationale.note.trim(), MAX_NOTE_CHARS),
            action: decision.chosen_action,
        }
    }

    pub fn is_final(&self) -> bool {
        self.action == EnforcementAction::Ban
    }

    pub fn title(&self) -> &'static str {
        if self.is_final() {
            "🚫 Final Violation — User Will Be Banned"
        } else {
            "⚠️ Violation Detected"
        }
    }

    /// Short title for log entries.
    pub fn log_title(&self) -> &'static str {
        match self.action {
            EnforcementAction::Ban => "🚫 Ban",
            EnforcementAction::Mute => "🔇 Mute",
            _ => "⚠️ Warn",
        }
    }

    pub fn category_text(&self) -> String {
        if self.categories.is_empty() {
            "unknown".to_string()
        } else {
            self.categories.join(", ")
        }
    }

    pub fn confidence_text(&self) -> String {
        confidence_percent(self.confidence)
    }

    pub fn footer() -> String {
        format!(
            "Ban triggers at {}+ violations with {}+ confidence",
            BAN_VIOLATION_THRESHOLD,
            confidence_percent(BAN_CONFIDENCE_THRESHOLD)
        )
    }
}

/// Operations the core needs from a chat platform.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Delete a message in a scope.
    async fn delete_message(&self, scope_id: i64, message: MessageHandle) -> Result<()>;

    /// Post the warning in the channel the message came from.
    async fn deliver_warning(&self, notice: &WarningNotice) -> Result<()>;

    /// Find or create the admin-only log destination. `None` when the
    /// platform has no log destination for this scope.
    async fn resolve_log_destination(&self, scope_id: i64) -> Result<Option<LogDestination>>;

    /// Mirror a notice into the log destination.
    async fn post_log(&self, destination: &LogDestination, notice: &WarningNotice) -> Result<()>;

    /// Mute or ban a member.
    async fn restrict_member(
        &self,
        scope_id: i64,
        user_id: i64,
        restriction: &Restriction,
    ) -> Result<()>;

    /// Fetch attachment bytes.
    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>>;

    /// Whether `user_id` administers the scope.
    async fn is_admin(&self, scope_id: i64, user_id: i64) -> Result<bool>;
}

/// Result of one enforcement step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Done,
    Skipped,
    Failed(String),
}

impl StepResult {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// What happened during [`EnforcementDispatcher::enforce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementOutcome {
    pub deleted: StepResult,
    pub warned: StepResult,
    pub logged: StepResult,
    pub restricted: StepResult,
}

/// Executes decisions through a [`PlatformAdapter`].
pub struct EnforcementDispatcher {
    adapter: Arc<dyn PlatformAdapter>,
    log_destinations: Cache<i64, Option<LogDestination>>,
}

impl EnforcementDispatcher {
    pub fn new(adapter: Arc<dyn PlatformAdapter>) -> Self {
        Self {
            adapter,
            log_destinations: Cache::builder().max_capacity(10_000).build(),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn PlatformAdapter> {
        &self.adapter
    }

    /// Resolve the log destination once per scope.
    ///
    /// Concurrent callers for the same scope share a single resolution.
    /// Failures are not cached.
    pub async fn log_destination(&self, scope_id: i64) -> Result<Option<LogDestination>> {
        let adapter = self.adapter.clone();
        self.log_destinations
            .try_get_with(scope_id, async move {
                adapter.resolve_log_destination(scope_id).await
            })
            .await
            .map_err(|e| MokoshError::Delivery(format!("log destination: {}", e)))
    }

    /// Forget a cached destination, e.g. after the channel was deleted.
    pub async fn forget_log_destination(&self, scope_id: i64) {
        self.log_destinations.invalidate(&scope_id).await;
    }

    /// Run every enforcement step for a decision.
    pub async fn enforce(
        &self,
        decision: &EnforcementDecision,
        scope_id: i64,
        member: &MemberRef,
        message: MessageHandle,
        media_label: Option<&str>,
    ) -> EnforcementOutcome {
        let notice = WarningNotice::new(decision, scope_id, member, message, media_label);

        let deleted = if decision.should_delete_message {
            step(
                "delete_message",
                &notice,
                self.adapter.delete_message(scope_id, message).await,
            )
        } else {
            StepResult::Skipped
        };

        let warned = step(
            "deliver_warning",
            &notice,
            self.adapter.deliver_warning(&notice).await,
        );

        let logged = match self.log_destination(scope_id).await {
            Ok(Some(destination)) => {
                let result = self.adapter.post_log(&destination, &notice).await;
                if result.is_err() {
                    // The channel may have been removed since it was cached
                    self.forget_log_destination(scope_id).await;
                }
                step("post_log", &notice, result)
            }
            Ok(None) => StepResult::Skipped,
            Err(e) => step("resolve_log_destination", &notice, Err(e)),
        };

        let restriction = match decision.chosen_action {
            EnforcementAction::Ban => Some(Restriction::Ban {
                reason: ban_reason(decision),
            }),
            EnforcementAction::Mute => Some(Restriction::Mute {
                minutes: decision.mute_minutes,
            }),
            EnforcementAction::Warn | EnforcementAction::None => None,
        };
        let restricted = match restriction {
            Some(restriction) => step(
                "restrict_member",
                &notice,
                self.adapter
                    .restrict_member(scope_id, member.user_id, &restriction)
                    .await,
            ),
            None => StepResult::Skipped,
        };

        tracing::info!(
            scope_id,
            user_id = member.user_id,
            action = decision.chosen_action.as_str(),
            violations = decision.new_count,
            confidence = %notice.confidence_text(),
            deleted = deleted.is_done(),
            warned = warned.is_done(),
            logged = logged.is_done(),
            restricted = restricted.is_done(),
            "Enforcement finished"
        );

        EnforcementOutcome {
            deleted,
            warned,
            logged,
            restricted,
        }
    }
}

fn step(name: &'static str, notice: &WarningNotice, result: Result<()>) -> StepResult {
    match result {
        Ok(()) => StepResult::Done,
        Err(e) => {
            tracing::warn!(
                step = name,
                error = %e,
                scope_id = notice.scope_id,
                user_id = notice.member.user_id,
                "Enforcement step failed"
            );
            StepResult::Failed(e.to_string())
        }
    }
}
