//! Error types for the Mokosh bots.
//!
//! All errors are explicitly typed using thiserror. Failures of the remote
//! classifier have their own type so the pipeline can treat them as
//! "no verdict" without matching on strings.

use thiserror::Error;

/// Failure to obtain a verdict from the classification API.
#[derive(Debug, Error)]
pub enum ClassificationFailure {
    /// The request exceeded its per-kind timeout.
    #[error("classification timed out")]
    Timeout,

    /// Connection or transport level failure.
    #[error("classification transport error: {0}")]
    Transport(String),

    /// The API answered with a non-success status.
    #[error("classification API returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The body could not be decoded into a verdict.
    #[error("malformed classification response: {0}")]
    Malformed(String),

    /// The payload does not fit the requested content kind.
    #[error("unsupported classification request: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for ClassificationFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Central error type for all Mokosh operations.
#[derive(Debug, Error)]
pub enum MokoshError {
    /// The classifier could not produce a verdict.
    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationFailure),

    /// A platform-side delete, send, mute or ban did not go through.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Discord API error from serenity.
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// Telegram Bot API error from teloxide.
    #[error("Telegram API error: {0}")]
    TelegramApi(#[from] teloxide::RequestError),

    /// Configuration error (missing env vars, invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The actor is not allowed to perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal state error (invalid state transitions, bad input from adapters).
    #[error("Internal state error: {0}")]
    InternalState(String),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),
}

impl MokoshError {
    /// Log error with full context using tracing.
    pub fn log_with_context(&self, context: &ErrorContext) {
        match self {
            Self::Database(_) | Self::InternalState(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    scope_id = ?context.scope_id,
                    operation = %context.operation,
                    "Critical error occurred"
                );
            }
            // Classifier outages are expected from time to time
            Self::Classification(_) => {
                tracing::warn!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    scope_id = ?context.scope_id,
                    operation = %context.operation,
                    "Classification unavailable"
                );
            }
            Self::Delivery(_)
            | Self::DiscordApi(_)
            | Self::TelegramApi(_)
            | Self::Http(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    scope_id = ?context.scope_id,
                    operation = %context.operation,
                    "External API error"
                );
            }
            Self::Forbidden(_) => {
                tracing::info!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    scope_id = ?context.scope_id,
                    operation = %context.operation,
                    "Rejected unauthorized request"
                );
            }
            Self::Config(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "Configuration error"
                );
            }
            Self::Json(_) | Self::Io(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    scope_id = ?context.scope_id,
                    operation = %context.operation,
                    "Data processing error"
                );
            }
        }
    }

    /// Check if this error is critical and requires alerting.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Database(_) | Self::InternalState(_))
    }

    /// Get user-friendly error message (hides internal details).
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Classification(_) => "API error — could not analyze.",
            Self::Delivery(_) => "Could not complete the moderation action",
            Self::DiscordApi(_) => "Discord service temporarily unavailable",
            Self::TelegramApi(_) => "Telegram service temporarily unavailable",
            Self::Config(_) => "Service configuration error",
            Self::Forbidden(_) => "Only administrators can do that.",
            Self::InternalState(_) => "Internal service error",
            Self::Http(_) => "Network error, please try again",
            Self::Json(_) => "Data format error",
            Self::Database(_) => "Database service temporarily unavailable",
            Self::Io(_) => "File system error",
        }
    }
}

/// Context information for error logging.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Unique request identifier for correlation
    pub request_id: String,
    /// User ID if available
    pub user_id: Option<i64>,
    /// Guild or chat ID if available
    pub scope_id: Option<i64>,
    /// Operation being performed
    pub operation: String,
}

impl ErrorContext {
    /// Create a new error context.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            scope_id: None,
            operation: operation.into(),
        }
    }

    /// Set user ID.
    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set scope ID.
    pub fn with_scope_id(mut self, scope_id: i64) -> Self {
        self.scope_id = Some(scope_id);
        self
    }

    /// Set request ID.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// Result type alias for Mokosh operations.
pub type Result<T> = std::result::Result<T, MokoshError>;
