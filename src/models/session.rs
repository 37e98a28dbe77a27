use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::models::meter::MeterBinding;

/// One account identity returned by the login endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    #[serde(deserialize_with = "crate::models::de::string_or_number")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserIdentity {
    /// Name the balance endpoint expects (login account first)
    pub fn account_name(&self) -> &str {
        self.login_account
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.nickname.as_deref())
            .unwrap_or_default()
    }

    /// Name the usage endpoints expect (nickname first)
    pub fn display_name(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.login_account.as_deref())
            .unwrap_or_default()
    }
}

/// Cached provider session
///
/// The token and identities are persisted as one blob; the save timestamp
/// lives under its own credential key and is filled in on load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub user_info: Vec<UserIdentity>,
    #[serde(skip)]
    pub saved_at_epoch_millis: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    pub fn primary_identity(&self) -> Option<&UserIdentity> {
        self.user_info.first()
    }

    /// A blob without token or identities is treated as no session
    pub fn is_usable(&self) -> bool {
        !self.token.is_empty() && !self.user_info.is_empty()
    }

    /// Whether the session is older than `max_age_millis` at `now_millis`
    ///
    /// A session without a recorded save time is not considered expired.
    pub fn is_expired(&self, now_millis: i64, max_age_millis: i64) -> bool {
        match self.saved_at_epoch_millis {
            Some(saved) => now_millis.saturating_sub(saved) > max_age_millis,
            None => false,
        }
    }
}

/// Ephemeral key pair from the key-exchange step, attached to every later call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestKey {
    headers: BTreeMap<String, String>,
}

impl RequestKey {
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let headers: BTreeMap<String, String> = object
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect();

        if headers.is_empty() {
            None
        } else {
            Some(Self { headers })
        }
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

/// Authentication progress of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoSession,
    KeyAcquired,
    AuthValidated { cached: bool },
    AuthCodeObtained,
    AccessTokenObtained,
    Failed,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::NoSession => write!(f, "no_session"),
            AuthState::KeyAcquired => write!(f, "key_acquired"),
            AuthState::AuthValidated { cached: true } => write!(f, "auth_validated(cached)"),
            AuthState::AuthValidated { cached: false } => write!(f, "auth_validated(fresh)"),
            AuthState::AuthCodeObtained => write!(f, "auth_code_obtained"),
            AuthState::AccessTokenObtained => write!(f, "access_token_obtained"),
            AuthState::Failed => write!(f, "failed"),
        }
    }
}

/// Per-run state handed from stage to stage
///
/// Each field is written only by the stage that produces it: the session
/// manager owns the key, session, authorization code and access token, the
/// fetcher owns the bindings.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub state: AuthState,
    pub request_key: Option<RequestKey>,
    pub session: Option<Session>,
    pub authorization_code: Option<String>,
    pub access_token: Option<String>,
    pub bindings: Vec<MeterBinding>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            state: AuthState::NoSession,
            request_key: None,
            session: None,
            authorization_code: None,
            access_token: None,
            bindings: Vec::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::AccessTokenObtained && self.access_token.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    /// Drop everything after the key exchange, keeping the key pair
    pub fn reset_auth(&mut self) {
        self.session = None;
        self.authorization_code = None;
        self.access_token = None;
        self.bindings.clear();
        self.state = if self.request_key.is_some() {
            AuthState::KeyAcquired
        } else {
            AuthState::NoSession
        };
    }
}
