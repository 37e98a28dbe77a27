//! Relay protocol client.
//!
//! Every provider call goes encrypt → provider → decrypt through the relay.
//! Two code tables decide which provider failures demand re-authentication:
//! one applied to the raw provider response, one applied to the decrypted
//! payload of the authorization endpoint only.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::TransportConfig;
use crate::constants::{provider, relay};
use crate::error::{AuthFailure, BridgeError, Result};
use crate::models::{Method, RequestEnvelope, RequestKey};
use crate::services::transport::Transport;

/// Logical provider request, as handed to the relay for encryption
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderRequest {
    /// Provider path including the `/api` prefix
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProviderRequest {
    /// POST to a path from [`provider::paths`]
    pub fn post(path: &str) -> Self {
        Self {
            url: format!("{}{}", provider::API_PREFIX, path),
            method: "post".to_string(),
            headers: BTreeMap::new(),
            data: None,
        }
    }

    /// Attach the key-exchange pair as headers
    pub fn with_key(mut self, key: Option<&RequestKey>) -> Self {
        if let Some(key) = key {
            for (name, value) in key.headers() {
                self.headers.insert(name.clone(), value.clone());
            }
        }
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_path(&self, path: &str) -> bool {
        self.url == format!("{}{}", provider::API_PREFIX, path)
    }
}

/// Provider request as the relay returned it from `/encrypt`
#[derive(Debug, Clone)]
struct EncryptedRequest {
    url: String,
    method: Option<Method>,
    headers: BTreeMap<String, String>,
    body: Option<String>,
    encrypt_key: Option<Value>,
}

/// Whether the raw provider response demands a fresh authentication
///
/// `10010` matches loosely (number or string), the rest strictly.
pub fn generic_auth_failure(response: &Value, token_held: bool) -> Option<AuthFailure> {
    let code = response.get("code")?;
    let message = response.get("message").and_then(Value::as_str).unwrap_or_default();

    if code.as_i64() == Some(10010) || code.as_str() == Some("10010") {
        return Some(AuthFailure::SessionExpired);
    }
    if code.as_i64() == Some(10002) {
        if message == provider::KEY_CODE_EXPIRED_MESSAGE {
            return Some(AuthFailure::KeyCodeExpired);
        }
        if token_held && message == provider::TOKEN_EMPTY_MESSAGE {
            return Some(AuthFailure::TokenEmpty);
        }
    }
    if code.as_i64() == Some(30010) || code.as_str() == Some("20103") {
        return Some(AuthFailure::RestartRequired);
    }
    None
}

/// Authorization endpoint codes that mean "re-obtain the code"
///
/// Numeric codes only; the string forms are not part of the catalog.
pub fn authorize_auth_failure(code: &Value, message: &str, token_held: bool) -> bool {
    match code.as_i64() {
        Some(10015 | 10108 | 10009 | 10207 | 10005 | 10010 | 30010) => true,
        Some(10002) => {
            message == provider::KEY_CODE_EXPIRED_MESSAGE
                || (token_held && message == provider::TOKEN_EMPTY_MESSAGE)
        }
        _ => false,
    }
}

/// Removes one leading and one trailing double quote
pub fn strip_surrounding_quotes(body: &str) -> &str {
    let body = body.strip_prefix('"').unwrap_or(body);
    body.strip_suffix('"').unwrap_or(body)
}

fn coerce_code(code: Option<&Value>) -> Option<String> {
    match code? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn coerce_message(message: Option<&Value>) -> String {
    match message {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn wrap(payload: Value) -> Value {
    let mut envelope = Map::new();
    envelope.insert(relay::ENVELOPE_KEY.to_string(), payload);
    Value::Object(envelope)
}

fn string_headers(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Client for the relay's encrypt / decrypt / captcha endpoints
#[derive(Clone)]
pub struct RelayClient {
    transport: Arc<dyn Transport>,
    relay_host: String,
    provider_base: String,
}

impl RelayClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        relay_host: impl Into<String>,
        provider_base: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            relay_host: relay_host.into(),
            provider_base: provider_base.into(),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &TransportConfig) -> Self {
        Self::new(transport, &config.relay_host, &config.provider_base)
    }

    /// Runs one provider call through the relay, returning the decrypted `data`
    pub async fn call(&self, request: &ProviderRequest, token_held: bool) -> Result<Value> {
        debug!("Relay call {}", request.url);

        let encrypted = self.encrypt(request).await?;
        let raw = self.send_to_provider(request, &encrypted).await?;

        if let Some(kind) = generic_auth_failure(&raw, token_held) {
            return Err(BridgeError::recoverable(
                kind,
                coerce_code(raw.get("code")),
                coerce_message(raw.get("message")),
            ));
        }

        let decrypted = self.decrypt(request, &encrypted, raw).await?;
        Self::interpret_decrypted(request, decrypted, token_held)
    }

    /// Solves a slider captcha, returning the solved code
    pub async fn recognize(&self, canvas_src: &str) -> Result<String> {
        let body = self
            .post_relay(relay::RECOGNIZE_PATH, json!(canvas_src))
            .await?;
        let response: Value = serde_json::from_str(&body)
            .map_err(|e| BridgeError::protocol(format!("captcha response is not JSON: {}", e)))?;

        coerce_code(response.get("data"))
            .filter(|code| !code.is_empty())
            .ok_or_else(|| BridgeError::protocol("captcha response carries no solved code"))
    }

    async fn post_relay(&self, path: &str, payload: Value) -> Result<String> {
        let envelope = RequestEnvelope::new(format!("{}{}", self.relay_host, path))
            .method(Method::Post)
            .json(&wrap(payload))?;
        let response = self.transport.send(envelope).await?;
        Ok(response.body)
    }

    async fn encrypt(&self, request: &ProviderRequest) -> Result<EncryptedRequest> {
        let body = self
            .post_relay(relay::ENCRYPT_PATH, serde_json::to_value(request)?)
            .await?;
        let response: Value = serde_json::from_str(&body)
            .map_err(|e| BridgeError::protocol(format!("encrypt response is not JSON: {}", e)))?;

        let data = response
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| BridgeError::protocol("encrypt response carries no data"))?;
        let url = data
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::protocol("encrypt response carries no url"))?;

        let method = data
            .get("method")
            .and_then(Value::as_str)
            .and_then(|m| m.parse::<Method>().ok());
        let body = match data.get("data") {
            None => None,
            Some(payload) => Some(serde_json::to_string(payload)?),
        };

        Ok(EncryptedRequest {
            url: format!("{}{}", self.provider_base, url),
            method,
            headers: string_headers(data.get("headers")),
            body,
            encrypt_key: data.get("encryptKey").cloned(),
        })
    }

    async fn send_to_provider(
        &self,
        request: &ProviderRequest,
        encrypted: &EncryptedRequest,
    ) -> Result<Value> {
        let mut envelope =
            RequestEnvelope::new(encrypted.url.as_str()).headers(encrypted.headers.clone());
        if let Some(method) = encrypted.method {
            envelope = envelope.method(method);
        }
        if let Some(body) = &encrypted.body {
            let body = if request.is_path(provider::paths::AUTHORIZE) {
                strip_surrounding_quotes(body)
            } else {
                body.as_str()
            };
            envelope = envelope.body(body);
        }

        let response = self.transport.send(envelope).await?;
        Ok(serde_json::from_str(&response.body).unwrap_or(Value::String(response.body)))
    }

    async fn decrypt(
        &self,
        request: &ProviderRequest,
        encrypted: &EncryptedRequest,
        raw: Value,
    ) -> Result<Value> {
        let mut config = serde_json::to_value(request)?;
        if request.is_path(provider::paths::KEY_CODE) {
            let mut headers = Map::new();
            if let Some(key) = &encrypted.encrypt_key {
                headers.insert("encryptKey".to_string(), key.clone());
            }
            config["headers"] = Value::Object(headers);
        }

        let body = self
            .post_relay(relay::DECRYPT_PATH, json!({ "config": config, "data": raw }))
            .await?;
        serde_json::from_str(&body)
            .map_err(|e| BridgeError::protocol(format!("decrypt response is not JSON: {}", e)))
    }

    fn interpret_decrypted(
        request: &ProviderRequest,
        decrypted: Value,
        token_held: bool,
    ) -> Result<Value> {
        let mut payload = match decrypted {
            Value::Object(mut object) => match object.remove("data") {
                Some(Value::Object(payload)) => payload,
                _ => return Err(BridgeError::protocol("decrypt response carries no data")),
            },
            _ => return Err(BridgeError::protocol("decrypt response carries no data")),
        };

        let code_value = payload.remove("code").unwrap_or(Value::Null);
        let code = coerce_code(Some(&code_value));
        let message = coerce_message(payload.get("message"));
        let data = payload.remove("data").unwrap_or(Value::Null);

        if code.as_deref() == Some(provider::SUCCESS_CODE) {
            return Ok(data);
        }

        if request.url.contains(provider::paths::AUTHORIZE)
            && is_truthy(&data)
            && is_truthy(&code_value)
            && authorize_auth_failure(&code_value, &message, token_held)
        {
            return Err(BridgeError::recoverable(
                AuthFailure::MustReobtain,
                code,
                message,
            ));
        }

        if message.contains(provider::VERIFICATION_ERROR_MARKER) {
            return Err(BridgeError::recoverable(
                AuthFailure::VerificationFailed,
                code,
                message,
            ));
        }

        Err(BridgeError::fatal(code, message))
    }
}
