//! Moderation pipeline.
//!
//! Ties classification, the violation ledger, escalation and enforcement
//! together for one inbound message, and serves the manual `check`,
//! `violations` and `reset` commands.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::classifier::{ClassificationContext, Classify, Payload};
use crate::database::Database;
use crate::enforcement::{EnforcementDispatcher, EnforcementOutcome};
use crate::error::{ErrorContext, MokoshError, Result};
use crate::escalation::{decide, ViolationStatus};
use crate::models::{
    confidence_percent, truncate_chars, AttachmentRef, ContentEvent, ContentKind,
    EnforcementDecision, Verdict,
};
use crate::settings::Settings;

/// Longest explanation shown in a check report.
pub const MAX_CHECK_EXPLANATION_CHARS: usize = 1000;

/// Sender identity sent with manual checks.
const CHECK_SENDER_ID: &str = "check_user";
const CHECK_SENDER_DISPLAY: &str = "checked text";

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Nothing harmful was found, or nothing could be classified.
    Passed,
    Enforced {
        decision: EnforcementDecision,
        outcome: EnforcementOutcome,
        /// Label of the attachment that triggered it, `None` for text.
        media_label: Option<String>,
    },
}

/// Result of a manual `/check`.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub is_bad: bool,
    pub categories: String,
    pub confidence: f64,
    pub suggested_action: String,
    pub explanation: String,
}

impl CheckReport {
    fn from_verdict(verdict: &Verdict) -> Self {
        Self {
            is_bad: verdict.is_bad,
            categories: verdict.category_list("safe"),
            confidence: verdict.confidence,
            suggested_action: verdict
                .action
                .clone()
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| "none".to_string()),
            explanation: truncate_chars(&verdict.explanation, MAX_CHECK_EXPLANATION_CHARS),
        }
    }

    pub fn status(&self) -> &'static str {
        if self.is_bad {
            "HARMFUL"
        } else {
            "SAFE"
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.is_bad {
            "🔴"
        } else {
            "🟢"
        }
    }

    pub fn confidence_text(&self) -> String {
        confidence_percent(self.confidence)
    }
}

/// A member's standing in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationReport {
    pub count: i64,
    pub status: ViolationStatus,
}

/// Shared moderation core used by both platform adapters.
pub struct Moderator {
    db: Arc<Database>,
    classifier: Arc<dyn Classify>,
    dispatcher: Arc<EnforcementDispatcher>,
}

impl Moderator {
    pub fn new(
        db: Arc<Database>,
        classifier: Arc<dyn Classify>,
        dispatcher: Arc<EnforcementDispatcher>,
    ) -> Self {
        Self {
            db,
            classifier,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Arc<EnforcementDispatcher> {
        &self.dispatcher
    }

    /// Moderate one inbound message.
    ///
    /// Text is classified first, then attachments in order. The first
    /// harmful verdict is enforced and ends processing. Classifier and
    /// download failures let the content through; ledger failures abort.
    pub async fn handle_event(&self, event: &ContentEvent) -> Result<EventOutcome> {
        let settings = self.db.get_settings(event.scope_id).await?;
        let prior = self
            .db
            .violation_count(event.scope_id, event.member.user_id)
            .await?;

        let context = ClassificationContext {
            sender_id: event.member.user_id.to_string(),
            sender_display: event.member.display_name.clone(),
            prior_violations: prior,
            settings: settings.clone(),
        };

        if let Some(text) = event.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            tracing::debug!(
                scope_id = event.scope_id,
                user_id = event.member.user_id,
                fingerprint = %fingerprint(text.as_bytes()),
                "Classifying text"
            );
            let verdict = self
                .classify(event, ContentKind::Text, Payload::Text(text.to_string()), &context)
                .await;
            if let Some(verdict) = verdict.filter(|v| v.is_bad) {
                return self.enforce(event, &verdict, &settings, None).await;
            }
        }

        for attachment in &event.attachments {
            let Some(kind) = self.classifiable_kind(event, attachment) else {
                continue;
            };

            let bytes = match self.dispatcher.adapter().download_attachment(attachment).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        scope_id = event.scope_id,
                        filename = %attachment.filename,
                        "Attachment download failed, skipping"
                    );
                    continue;
                }
            };

            tracing::debug!(
                scope_id = event.scope_id,
                user_id = event.member.user_id,
                kind = ?kind,
                bytes = bytes.len(),
                fingerprint = %fingerprint(&bytes),
                "Classifying attachment"
            );

            let payload = Payload::Media {
                bytes,
                filename: attachment.filename.clone(),
                caption: event.caption.clone(),
            };
            if let Some(verdict) = self
                .classify(event, kind, payload, &context)
                .await
                .filter(|v| v.is_bad)
            {
                return self
                    .enforce(event, &verdict, &settings, Some(attachment.label.as_str()))
                    .await;
            }
        }

        Ok(EventOutcome::Passed)
    }

    /// Classify text on request without touching the ledger.
    ///
    /// Uses the scope's settings when called inside a scope, defaults
    /// otherwise.
    pub async fn check(&self, text: &str, scope_id: Option<i64>) -> Result<CheckReport> {
        let settings = match scope_id {
            Some(scope_id) => self.db.get_settings(scope_id).await?,
            None => Settings::default(),
        };
        let context = ClassificationContext {
            sender_id: CHECK_SENDER_ID.to_string(),
            sender_display: CHECK_SENDER_DISPLAY.to_string(),
            prior_violations: 0,
            settings,
        };

        let verdict = self
            .classifier
            .classify(ContentKind::Text, Payload::Text(text.to_string()), &context)
            .await
            .map_err(MokoshError::from)?;

        Ok(CheckReport::from_verdict(&verdict))
    }

    pub async fn violations(&self, scope_id: i64, user_id: i64) -> Result<ViolationReport> {
        let count = self.db.violation_count(scope_id, user_id).await?;
        Ok(ViolationReport {
            count,
            status: ViolationStatus::from_count(count),
        })
    }

    pub async fn reset(&self, scope_id: i64, user_id: i64) -> Result<()> {
        self.db.reset_violations(scope_id, user_id).await?;
        tracing::info!(scope_id, user_id, "Violations reset");
        Ok(())
    }

    fn classifiable_kind(
        &self,
        event: &ContentEvent,
        attachment: &AttachmentRef,
    ) -> Option<ContentKind> {
        let kind = match attachment.kind() {
            Some(ContentKind::Text) | None => {
                tracing::debug!(
                    scope_id = event.scope_id,
                    filename = %attachment.filename,
                    "Unsupported attachment, skipping"
                );
                return None;
            }
            Some(kind) => kind,
        };
        if attachment.exceeds_limit() {
            tracing::info!(
                scope_id = event.scope_id,
                filename = %attachment.filename,
                size = ?attachment.size,
                "Attachment too large, skipping"
            );
            return None;
        }
        Some(kind)
    }

    async fn classify(
        &self,
        event: &ContentEvent,
        kind: ContentKind,
        payload: Payload,
        context: &ClassificationContext,
    ) -> Option<Verdict> {
        match self.classifier.classify(kind, payload, context).await {
            Ok(verdict) => Some(verdict),
            Err(e) => {
                let ctx = ErrorContext::new("classify")
                    .with_scope_id(event.scope_id)
                    .with_user_id(event.member.user_id);
                MokoshError::from(e).log_with_context(&ctx);
                None
            }
        }
    }

    async fn enforce(
        &self,
        event: &ContentEvent,
        verdict: &Verdict,
        settings: &Settings,
        media_label: Option<&str>,
    ) -> Result<EventOutcome> {
        let new_count = self
            .db
            .record_violation(event.scope_id, event.member.user_id)
            .await?;
        let decision = decide(verdict, settings, new_count - 1);

        let outcome = self
            .dispatcher
            .enforce(
                &decision,
                event.scope_id,
                &event.member,
                event.message,
                media_label,
            )
            .await;

        Ok(EventOutcome::Enforced {
            decision,
            outcome,
            media_label: media_label.map(str::to_string),
        })
    }
}

/// Short content fingerprint for logs.
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::StepResult;
    use crate::models::{EnforcementAction, MemberRef, MessageHandle};
    use crate::testing::{AdapterCall, RecordingAdapter, ScriptedClassifier};

    const SCOPE: i64 = -100_123;

    async fn moderator(
        classifier: ScriptedClassifier,
        adapter: RecordingAdapter,
    ) -> (Moderator, Arc<Database>, Arc<RecordingAdapter>, Arc<ScriptedClassifier>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let adapter = Arc::new(adapter);
        let classifier = Arc::new(classifier);
        let dispatcher = Arc::new(EnforcementDispatcher::new(adapter.clone()));
        let moderator = Moderator::new(db.clone(), classifier.clone(), dispatcher);
        (moderator, db, adapter, classifier)
    }

    fn text_event(user_id: i64, text: &str) -> ContentEvent {
        ContentEvent {
            scope_id: SCOPE,
            member: MemberRef {
                user_id,
                display_name: format!("user{user_id}"),
            },
            message: MessageHandle {
                channel_id: SCOPE,
                message_id: 1,
            },
            text: Some(text.to_string()),
            caption: None,
            attachments: Vec::new(),
        }
    }

    fn attachment(source: &str, filename: &str, label: &str) -> AttachmentRef {
        AttachmentRef {
            source: source.to_string(),
            filename: filename.to_string(),
            content_type: None,
            size: Some(1024),
            label: label.to_string(),
            kind_hint: None,
        }
    }

    #[tokio::test]
    async fn safe_text_never_touches_ledger_or_platform() {
        let (moderator, db, adapter, _) =
            moderator(ScriptedClassifier::new(), RecordingAdapter::new()).await;

        let outcome = moderator.handle_event(&text_event(5, "hello")).await.unwrap();
        assert_eq!(outcome, EventOutcome::Passed);
        assert_eq!(db.violation_count(SCOPE, 5).await.unwrap(), 0);
        assert!(adapter.calls().await.is_empty());
    }

    #[tokio::test]
    async fn repeated_harmful_text_escalates_to_ban() {
        let (moderator, db, adapter, classifier) = moderator(
            ScriptedClassifier::new().harmful("go away", 0.9),
            RecordingAdapter::new(),
        )
        .await;

        let first = moderator.handle_event(&text_event(5, "go away")).await.unwrap();
        let EventOutcome::Enforced { decision, .. } = first else {
            panic!("expected enforcement");
        };
        assert_eq!(decision.chosen_action, EnforcementAction::Warn);

        let second = moderator.handle_event(&text_event(5, "go away")).await.unwrap();
        let EventOutcome::Enforced { decision, outcome, .. } = second else {
            panic!("expected enforcement");
        };
        assert_eq!(decision.new_count, 2);
        assert_eq!(decision.chosen_action, EnforcementAction::Ban);
        assert_eq!(outcome.restricted, StepResult::Done);

        assert_eq!(db.violation_count(SCOPE, 5).await.unwrap(), 2);
        let priors: Vec<i64> = classifier.seen().iter().map(|(_, _, p)| *p).collect();
        assert_eq!(priors, vec![0, 1]);
        assert_eq!(adapter.warnings().await.len(), 2);
    }

    #[tokio::test]
    async fn classifier_failure_lets_content_through() {
        let (moderator, db, adapter, _) = moderator(
            ScriptedClassifier::new().failing("anything"),
            RecordingAdapter::new(),
        )
        .await;

        let outcome = moderator.handle_event(&text_event(5, "anything")).await.unwrap();
        assert_eq!(outcome, EventOutcome::Passed);
        assert_eq!(db.violation_count(SCOPE, 5).await.unwrap(), 0);
        assert!(adapter.calls().await.is_empty());
    }

    #[tokio::test]
    async fn harmful_attachment_is_enforced_with_its_label() {
        let (moderator, db, adapter, _) = moderator(
            ScriptedClassifier::new().harmful("photo.jpg", 0.7),
            RecordingAdapter::new().with_file("file-1", b"jpeg"),
        )
        .await;

        let mut event = text_event(9, "look at this");
        event.attachments = vec![attachment("file-1", "photo.jpg", "🖼 Photo")];

        let outcome = moderator.handle_event(&event).await.unwrap();
        let EventOutcome::Enforced { media_label, .. } = outcome else {
            panic!("expected enforcement");
        };
        assert_eq!(media_label.as_deref(), Some("🖼 Photo"));
        assert_eq!(db.violation_count(SCOPE, 9).await.unwrap(), 1);

        let warning = adapter.warnings().await.pop().unwrap();
        assert_eq!(warning.media_label.as_deref(), Some("🖼 Photo"));
    }

    #[tokio::test]
    async fn unsupported_and_oversize_attachments_are_not_downloaded() {
        let (moderator, _, adapter, classifier) =
            moderator(ScriptedClassifier::new(), RecordingAdapter::new()).await;

        let mut big_video = attachment("file-2", "clip.mp4", "🎥 Video");
        big_video.size = Some(crate::models::MAX_VIDEO_BYTES + 1);

        let mut event = text_event(3, "");
        event.text = None;
        event.attachments = vec![attachment("file-1", "report.pdf", "📄"), big_video];

        let outcome = moderator.handle_event(&event).await.unwrap();
        assert_eq!(outcome, EventOutcome::Passed);
        assert!(adapter.calls().await.is_empty());
        assert!(classifier.seen().is_empty());
    }

    #[tokio::test]
    async fn download_failure_skips_to_next_attachment() {
        let (moderator, _, _, classifier) = moderator(
            ScriptedClassifier::new().harmful("voice.ogg", 0.6),
            RecordingAdapter::new().with_file("ok", b"ogg"),
        )
        .await;

        let mut event = text_event(3, "");
        event.text = None;
        event.attachments = vec![
            attachment("missing", "photo.jpg", "🖼 Photo"),
            attachment("ok", "voice.ogg", "🎙 Voice"),
        ];

        let outcome = moderator.handle_event(&event).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Enforced { .. }));
        assert_eq!(classifier.seen().len(), 1);
    }

    #[tokio::test]
    async fn first_harmful_attachment_stops_processing() {
        let (moderator, db, _, classifier) = moderator(
            ScriptedClassifier::new()
                .harmful("a.jpg", 0.9)
                .harmful("b.jpg", 0.9),
            RecordingAdapter::new()
                .with_file("a", b"a")
                .with_file("b", b"b"),
        )
        .await;

        let mut event = text_event(4, "");
        event.text = None;
        event.attachments = vec![
            attachment("a", "a.jpg", "🖼 Image"),
            attachment("b", "b.jpg", "🖼 Image"),
        ];

        moderator.handle_event(&event).await.unwrap();
        assert_eq!(classifier.seen().len(), 1);
        assert_eq!(db.violation_count(SCOPE, 4).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn check_never_touches_ledger() {
        let (moderator, db, adapter, _) = moderator(
            ScriptedClassifier::new().harmful("I will find you", 0.93),
            RecordingAdapter::new(),
        )
        .await;

        let report = moderator.check("I will find you", Some(SCOPE)).await.unwrap();
        assert!(report.is_bad);
        assert_eq!(report.status(), "HARMFUL");
        assert_eq!(report.categories, "harassment");
        assert_eq!(report.confidence_text(), "93%");
        assert_eq!(report.suggested_action, "none");

        assert_eq!(db.violation_count(SCOPE, 0).await.unwrap(), 0);
        assert!(adapter.calls().await.is_empty());
    }

    #[tokio::test]
    async fn check_reports_safe_and_failures() {
        let (moderator, _, _, _) = moderator(
            ScriptedClassifier::new().failing("broken"),
            RecordingAdapter::new(),
        )
        .await;

        let report = moderator.check("nice weather", None).await.unwrap();
        assert_eq!(report.status(), "SAFE");
        assert_eq!(report.categories, "safe");

        let err = moderator.check("broken", None).await.unwrap_err();
        assert_eq!(err.user_message(), "API error — could not analyze.");
    }

    #[tokio::test]
    async fn check_uses_fixed_sender_and_events_use_user_id() {
        let (moderator, _, _, classifier) =
            moderator(ScriptedClassifier::new(), RecordingAdapter::new()).await;

        moderator.check("hello there", Some(SCOPE)).await.unwrap();
        moderator.handle_event(&text_event(77, "hello again")).await.unwrap();

        assert_eq!(classifier.senders(), vec!["check_user", "77"]);
    }

    #[tokio::test]
    async fn violations_and_reset() {
        let (moderator, _, _, _) = moderator(
            ScriptedClassifier::new().harmful("bad", 0.5),
            RecordingAdapter::new(),
        )
        .await;

        moderator.handle_event(&text_event(8, "bad")).await.unwrap();
        let report = moderator.violations(SCOPE, 8).await.unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.status, ViolationStatus::OneMoreTriggersBan);

        moderator.reset(SCOPE, 8).await.unwrap();
        let report = moderator.violations(SCOPE, 8).await.unwrap();
        assert_eq!(report.count, 0);
        assert_eq!(report.status, ViolationStatus::Clean);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_harmful_events_all_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.db");
        let db = Arc::new(Database::new(path.to_str().unwrap()).await.unwrap());
        let adapter = Arc::new(RecordingAdapter::new());
        let classifier = Arc::new(ScriptedClassifier::new().harmful("spam", 0.5));
        let dispatcher = Arc::new(EnforcementDispatcher::new(adapter.clone()));
        let moderator = Arc::new(Moderator::new(db.clone(), classifier, dispatcher));
        db.record_violation(SCOPE, 11).await.unwrap();

        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let moderator = moderator.clone();
                tokio::spawn(async move { moderator.handle_event(&text_event(11, "spam")).await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            assert!(matches!(result.unwrap().unwrap(), EventOutcome::Enforced { .. }));
        }

        assert_eq!(db.violation_count(SCOPE, 11).await.unwrap(), 13);
        let deletes = adapter
            .calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, AdapterCall::Delete { .. }))
            .count();
        assert_eq!(deletes, 12);
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        assert_eq!(fingerprint(b"abc"), "ba7816bf8f01");
        assert_eq!(fingerprint(b"abc").len(), 12);
    }
}
