//! Client for the remote content-classification API.
//!
//! Text goes to `/analyze/messages` as a one-message JSON batch; media goes to
//! `/analyze/{image,audio,video}` as multipart. The two endpoints answer with
//! different envelopes, which [`normalize_response`] folds into one [`Verdict`].

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter as GovRateLimiter};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClassificationFailure, Result};
use crate::models::{ContentKind, Verdict};
use crate::settings::Settings;

/// Header carrying the optional API token.
pub const API_TOKEN_HEADER: &str = "X-API-Token";

/// Longest error body kept in a failure.
const MAX_ERROR_BODY: usize = 200;

type RateLimiter = GovRateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Content handed to the classifier.
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Media {
        bytes: Vec<u8>,
        filename: String,
        caption: Option<String>,
    },
}

/// Who sent the content and what the scope looks like.
#[derive(Debug, Clone)]
pub struct ClassificationContext {
    /// Platform user id as text, or a fixed marker for ad-hoc checks.
    pub sender_id: String,
    pub sender_display: String,
    pub prior_violations: i64,
    /// Sent with text requests only.
    pub settings: Settings,
}

/// Per-kind request timeouts.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierTimeouts {
    pub text: Duration,
    pub image: Duration,
    pub audio: Duration,
    pub video: Duration,
}

impl Default for ClassifierTimeouts {
    fn default() -> Self {
        Self {
            text: ContentKind::Text.default_timeout(),
            image: ContentKind::Image.default_timeout(),
            audio: ContentKind::Audio.default_timeout(),
            video: ContentKind::Video.default_timeout(),
        }
    }
}

impl ClassifierTimeouts {
    /// Same timeout for every kind.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            text: timeout,
            image: timeout,
            audio: timeout,
            video: timeout,
        }
    }

    pub fn for_kind(&self, kind: ContentKind) -> Duration {
        match kind {
            ContentKind::Text => self.text,
            ContentKind::Image => self.image,
            ContentKind::Audio => self.audio,
            ContentKind::Video => self.video,
        }
    }
}

/// Anything that can turn content into a verdict.
#[async_trait]
pub trait Classify: Send + Sync {
    async fn classify(
        &self,
        kind: ContentKind,
        payload: Payload,
        context: &ClassificationContext,
    ) -> std::result::Result<Verdict, ClassificationFailure>;
}

/// HTTP client for the classification API.
pub struct ClassifierClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    timeouts: ClassifierTimeouts,
    rate_limiter: Arc<RateLimiter>,
}

impl ClassifierClient {
    /// Create a client for `base_url` with default timeouts.
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        requests_per_minute: u32,
    ) -> Result<Self> {
        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
            timeouts: ClassifierTimeouts::default(),
            rate_limiter: Arc::new(GovRateLimiter::direct(quota)),
        })
    }

    /// Override the per-kind timeouts.
    pub fn with_timeouts(mut self, timeouts: ClassifierTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn endpoint(&self, kind: ContentKind) -> String {
        format!("{}/analyze/{}", self.base_url, kind.endpoint())
    }

    fn text_request(&self, text: &str, context: &ClassificationContext) -> reqwest::RequestBuilder {
        let body = TextRequest {
            messages: vec![TextMessage {
                sender_id: &context.sender_id,
                sender_display: &context.sender_display,
                text,
                prior_violations: context.prior_violations,
            }],
            settings: &context.settings,
        };

        self.client.post(self.endpoint(ContentKind::Text)).json(&body)
    }

    fn media_request(
        &self,
        kind: ContentKind,
        bytes: Vec<u8>,
        filename: String,
        caption: Option<String>,
        context: &ClassificationContext,
    ) -> std::result::Result<reqwest::RequestBuilder, ClassificationFailure> {
        let mime = kind
            .mime()
            .ok_or_else(|| ClassificationFailure::Unsupported(format!("{:?} has no file part", kind)))?;
        let file = Part::bytes(bytes).file_name(filename).mime_str(mime)?;

        let mut form = Form::new()
            .text("prior_violations", context.prior_violations.to_string())
            .text("sender_label", context.sender_display.clone());
        if kind.accepts_caption() {
            if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
                form = form.text("caption", caption);
            }
        }
        form = form.part("file", file);

        Ok(self.client.post(self.endpoint(kind)).multipart(form))
    }
}

#[async_trait]
impl Classify for ClassifierClient {
    async fn classify(
        &self,
        kind: ContentKind,
        payload: Payload,
        context: &ClassificationContext,
    ) -> std::result::Result<Verdict, ClassificationFailure> {
        let request = match (kind, payload) {
            (ContentKind::Text, Payload::Text(text)) => self.text_request(&text, context),
            (ContentKind::Text, Payload::Media { .. }) => {
                return Err(ClassificationFailure::Unsupported(
                    "text classification needs a text payload".to_string(),
                ))
            }
            (_, Payload::Text(_)) => {
                return Err(ClassificationFailure::Unsupported(format!(
                    "{:?} classification needs a media payload",
                    kind
                )))
            }
            (
                _,
                Payload::Media {
                    bytes,
                    filename,
                    caption,
                },
            ) => self.media_request(kind, bytes, filename, caption, context)?,
        };

        let request = match &self.api_token {
            Some(token) => request.header(API_TOKEN_HEADER, token),
            None => request,
        };

        self.rate_limiter.until_ready().await;

        let response = request
            .timeout(self.timeouts.for_kind(kind))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassificationFailure::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let body = response.bytes().await?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| ClassificationFailure::Malformed(format!("invalid JSON: {}", e)))?;

        let verdict = normalize_response(value)?;
        tracing::debug!(
            kind = ?kind,
            is_bad = verdict.is_bad,
            confidence = verdict.confidence,
            categories = ?verdict.categories,
            "Classification complete"
        );
        Ok(verdict)
    }
}

/// Fold both response envelopes into a [`Verdict`].
///
/// A mapping with a `results` sequence yields its first element; any other
/// mapping is the verdict itself.
pub fn normalize_response(body: Value) -> std::result::Result<Verdict, ClassificationFailure> {
    let raw = match body {
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(results)) => results.into_iter().next().ok_or_else(|| {
                ClassificationFailure::Malformed("empty results list".to_string())
            })?,
            Some(other) => {
                map.insert("results".to_string(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => {
            return Err(ClassificationFailure::Malformed(format!(
                "expected a JSON object, got {}",
                json_type(&other)
            )))
        }
    };

    if !raw.is_object() {
        return Err(ClassificationFailure::Malformed(format!(
            "expected a verdict object, got {}",
            json_type(&raw)
        )));
    }

    let raw: RawVerdict = serde_json::from_value(raw)
        .map_err(|e| ClassificationFailure::Malformed(format!("invalid verdict: {}", e)))?;

    Ok(raw.into_verdict())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Serialize)]
struct TextRequest<'a> {
    messages: Vec<TextMessage<'a>>,
    settings: &'a Settings,
}

#[derive(Serialize)]
struct TextMessage<'a> {
    sender_id: &'a str,
    sender_display: &'a str,
    text: &'a str,
    prior_violations: i64,
}

/// Verdict exactly as the API sends it. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVerdict {
    is_bad: Option<bool>,
    status: Option<String>,
    category: Option<RawCategories>,
    categories: Option<RawCategories>,
    confidence: Option<f64>,
    explanation: Option<String>,
    sender_response: Option<String>,
    response: Option<String>,
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCategories {
    One(String),
    Many(Vec<Value>),
}

impl RawCategories {
    fn into_tags(self) -> Vec<String> {
        match self {
            RawCategories::One(tag) => vec![tag],
            RawCategories::Many(values) => values
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        }
    }
}

impl RawVerdict {
    fn into_verdict(self) -> Verdict {
        let status_bad = self
            .status
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("bad"));

        let tags = self
            .category
            .into_iter()
            .chain(self.categories)
            .flat_map(RawCategories::into_tags);
        let mut categories: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.trim().to_string();
            if !tag.is_empty() && !categories.contains(&tag) {
                categories.push(tag);
            }
        }

        let confidence = self
            .confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(0.0);

        let sender_response = self
            .sender_response
            .filter(|s| !s.is_empty())
            .or(self.response)
            .unwrap_or_default();

        Verdict {
            is_bad: self.is_bad.unwrap_or(false) || status_bad,
            categories,
            confidence,
            explanation: self.explanation.unwrap_or_default(),
            sender_response,
            action: self.action.filter(|a| !a.is_empty()),
        }
    }
}
