use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

use crate::constants::provider;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Reason a provider call demands a fresh authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Provider session expired (10010)
    SessionExpired,
    /// Web channel key code no longer valid (10002)
    KeyCodeExpired,
    /// Token header was empty while a token was held (10002)
    TokenEmpty,
    /// Provider requires the auth flow to restart (30010 / "20103")
    RestartRequired,
    /// Authorization code exchange rejected, re-obtain the code
    MustReobtain,
    /// Slider captcha was solved wrongly; login may be retried once
    VerificationFailed,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::SessionExpired => write!(f, "session_expired"),
            AuthFailure::KeyCodeExpired => write!(f, "key_code_expired"),
            AuthFailure::TokenEmpty => write!(f, "token_empty"),
            AuthFailure::RestartRequired => write!(f, "restart_required"),
            AuthFailure::MustReobtain => write!(f, "must_reobtain"),
            AuthFailure::VerificationFailed => write!(f, "verification_failed"),
        }
    }
}

/// Network / host level failure, never interpreted
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unknown response encoding: {0}")]
    UnknownEncoding(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Local persistence failure (credential backends, history archive)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// MQTT publication failure, logged and skipped by the runner
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("MQTT publish did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{}", recoverable_message(*kind, message))]
    RecoverableAuth {
        kind: AuthFailure,
        code: Option<String>,
        message: String,
    },

    #[error("{message}")]
    Fatal {
        code: Option<String>,
        message: String,
    },

    #[error("Account credentials are not configured (WSGW_USERNAME / WSGW_PASSWORD)")]
    CredentialsMissing,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn recoverable_message(kind: AuthFailure, message: &str) -> String {
    match kind {
        AuthFailure::MustReobtain => format!("{}: {}", provider::REOBTAIN_PREFIX, message),
        _ => message.to_string(),
    }
}

static INVALIDATION_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(provider::SESSION_INVALIDATION_PATTERN).ok());

impl BridgeError {
    pub fn recoverable(kind: AuthFailure, code: Option<String>, message: impl Into<String>) -> Self {
        BridgeError::RecoverableAuth {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn fatal(code: Option<String>, message: impl Into<String>) -> Self {
        BridgeError::Fatal {
            code,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        BridgeError::Protocol(message.into())
    }

    /// Prefix the message with the failing step, keeping the variant
    pub fn context(self, step: &str) -> Self {
        match self {
            BridgeError::RecoverableAuth {
                kind,
                code,
                message,
            } => BridgeError::RecoverableAuth {
                kind,
                code,
                message: format!("{}: {}", step, message),
            },
            BridgeError::Fatal { code, message } => BridgeError::Fatal {
                code,
                message: format!("{}: {}", step, message),
            },
            BridgeError::Protocol(message) => BridgeError::Protocol(format!("{}: {}", step, message)),
            other => other,
        }
    }

    pub fn is_recoverable_auth(&self) -> bool {
        matches!(self, BridgeError::RecoverableAuth { .. })
    }

    /// Wrongly solved captcha, the one condition the login step retries on
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::RecoverableAuth {
                kind: AuthFailure::VerificationFailed,
                ..
            }
        )
    }

    /// Whether the stored session must be dropped after this error
    pub fn invalidates_session(&self) -> bool {
        match self {
            BridgeError::RecoverableAuth { .. } => true,
            BridgeError::Fatal { message, .. } | BridgeError::Protocol(message) => {
                INVALIDATION_PATTERN
                    .as_ref()
                    .map(|re| re.is_match(message))
                    .unwrap_or(false)
            }
            _ => false,
        }
    }
}
