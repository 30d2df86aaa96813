//! In-process fakes for the platform and classifier seams.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::classifier::{ClassificationContext, Classify, Payload};
use crate::enforcement::{LogDestination, PlatformAdapter, Restriction, WarningNotice};
use crate::error::{ClassificationFailure, MokoshError, Result};
use crate::models::{AttachmentRef, ContentKind, MessageHandle, Verdict};

#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    Delete {
        scope_id: i64,
        message_id: i64,
    },
    Warn {
        user_id: i64,
        violation_count: i64,
    },
    Log {
        channel_id: i64,
        user_id: i64,
    },
    Restrict {
        scope_id: i64,
        user_id: i64,
        restriction: Restriction,
    },
    Download {
        source: String,
    },
}

/// Platform adapter that records every call.
#[derive(Default)]
pub struct RecordingAdapter {
    calls: Mutex<Vec<AdapterCall>>,
    warnings: Mutex<Vec<WarningNotice>>,
    log_channel: Option<i64>,
    fail_delete: bool,
    fail_log: bool,
    admins: HashSet<i64>,
    files: HashMap<String, Vec<u8>>,
    resolves: AtomicUsize,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_channel(channel_id: i64) -> Self {
        Self {
            log_channel: Some(channel_id),
            ..Self::default()
        }
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn failing_log(mut self) -> Self {
        self.fail_log = true;
        self
    }

    pub fn with_admin(mut self, user_id: i64) -> Self {
        self.admins.insert(user_id);
        self
    }

    pub fn with_file(mut self, source: &str, bytes: &[u8]) -> Self {
        self.files.insert(source.to_string(), bytes.to_vec());
        self
    }

    pub async fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().await.clone()
    }

    pub async fn warnings(&self) -> Vec<WarningNotice> {
        self.warnings.lock().await.clone()
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    async fn record(&self, call: AdapterCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl PlatformAdapter for RecordingAdapter {
    async fn delete_message(&self, scope_id: i64, message: MessageHandle) -> Result<()> {
        self.record(AdapterCall::Delete {
            scope_id,
            message_id: message.message_id,
        })
        .await;
        if self.fail_delete {
            return Err(MokoshError::Delivery("missing permissions".to_string()));
        }
        Ok(())
    }

    async fn deliver_warning(&self, notice: &WarningNotice) -> Result<()> {
        self.record(AdapterCall::Warn {
            user_id: notice.member.user_id,
            violation_count: notice.violation_count,
        })
        .await;
        self.warnings.lock().await.push(notice.clone());
        Ok(())
    }

    async fn resolve_log_destination(&self, _scope_id: i64) -> Result<Option<LogDestination>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent callers overlap
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(self
            .log_channel
            .map(|channel_id| LogDestination { channel_id }))
    }

    async fn post_log(&self, destination: &LogDestination, notice: &WarningNotice) -> Result<()> {
        self.record(AdapterCall::Log {
            channel_id: destination.channel_id,
            user_id: notice.member.user_id,
        })
        .await;
        if self.fail_log {
            return Err(MokoshError::Delivery("log channel gone".to_string()));
        }
        Ok(())
    }

    async fn restrict_member(
        &self,
        scope_id: i64,
        user_id: i64,
        restriction: &Restriction,
    ) -> Result<()> {
        self.record(AdapterCall::Restrict {
            scope_id,
            user_id,
            restriction: restriction.clone(),
        })
        .await;
        Ok(())
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>> {
        self.record(AdapterCall::Download {
            source: attachment.source.clone(),
        })
        .await;
        self.files
            .get(&attachment.source)
            .cloned()
            .ok_or_else(|| MokoshError::Delivery(format!("no such file: {}", attachment.source)))
    }

    async fn is_admin(&self, _scope_id: i64, user_id: i64) -> Result<bool> {
        Ok(self.admins.contains(&user_id))
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Verdict(Verdict),
    Fail,
}

/// Classifier answering from a script keyed by text or filename.
/// Unknown content is safe.
#[derive(Default)]
pub struct ScriptedClassifier {
    script: StdMutex<HashMap<String, Scripted>>,
    seen: StdMutex<Vec<(ContentKind, String, i64)>>,
    senders: StdMutex<Vec<String>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn harmful(self, key: &str, confidence: f64) -> Self {
        let verdict = Verdict {
            is_bad: true,
            categories: vec!["harassment".to_string()],
            confidence,
            explanation: "abusive language".to_string(),
            ..Default::default()
        };
        self.script
            .lock()
            .unwrap()
            .insert(key.to_string(), Scripted::Verdict(verdict));
        self
    }

    pub fn failing(self, key: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(key.to_string(), Scripted::Fail);
        self
    }

    /// `(kind, key, prior_violations)` for every call, in order.
    pub fn seen(&self) -> Vec<(ContentKind, String, i64)> {
        self.seen.lock().unwrap().clone()
    }

    /// Sender id of every call, in order.
    pub fn senders(&self) -> Vec<String> {
        self.senders.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classify for ScriptedClassifier {
    async fn classify(
        &self,
        kind: ContentKind,
        payload: Payload,
        context: &ClassificationContext,
    ) -> std::result::Result<Verdict, ClassificationFailure> {
        let key = match payload {
            Payload::Text(text) => text,
            Payload::Media { filename, .. } => filename,
        };
        self.seen
            .lock()
            .unwrap()
            .push((kind, key.clone(), context.prior_violations));
        self.senders
            .lock()
            .unwrap()
            .push(context.sender_id.clone());

        let scripted = self.script.lock().unwrap().get(&key).cloned();
        match scripted {
            Some(Scripted::Verdict(verdict)) => Ok(verdict),
            Some(Scripted::Fail) => Err(ClassificationFailure::Timeout),
            None => Ok(Verdict {
                confidence: 0.05,
                ..Default::default()
            }),
        }
    }
}
