use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{AccountConfig, SessionConfig};
use crate::constants::{provider::paths, request};
use crate::error::{BridgeError, Result};
use crate::models::{AuthState, RequestKey, RunContext, Session};
use crate::services::credential_store::CredentialStore;
use crate::services::relay::{ProviderRequest, RelayClient};

/// Captcha challenge issued before login
#[derive(Debug, Clone, PartialEq)]
pub struct CaptchaChallenge {
    pub ticket: String,
    pub canvas_src: String,
}

/// Drives a run from `NoSession` to `AccessTokenObtained`
///
/// Owns the request key, session, authorization code and access token
/// fields of the [`RunContext`].
#[derive(Clone)]
pub struct SessionManager {
    relay: RelayClient,
    store: CredentialStore,
    account: AccountConfig,
    cache_lifetime_millis: i64,
}

fn masked(token: &str) -> String {
    let head: String = token.chars().take(6).collect();
    format!("{}***", head)
}

fn required_str<'a>(value: &'a Value, field: &str, step: &str) -> Result<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BridgeError::protocol(format!("{} response carries no {}", step, field)))
}

impl SessionManager {
    pub fn new(
        relay: RelayClient,
        store: CredentialStore,
        account: AccountConfig,
        session: &SessionConfig,
    ) -> Self {
        Self {
            relay,
            store,
            account,
            cache_lifetime_millis: session.cache_lifetime_millis(),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Authenticate the run, bypassing the cached session when `force_fresh`
    ///
    /// A recoverable auth failure after the key exchange clears the stored
    /// session before it is returned.
    pub async fn authenticate(&self, ctx: &mut RunContext, force_fresh: bool) -> Result<()> {
        if let Err(e) = self.acquire_key(ctx).await {
            ctx.state = AuthState::Failed;
            return Err(e);
        }

        let result = self.authorize(ctx, force_fresh).await;
        if let Err(e) = &result {
            ctx.state = AuthState::Failed;
            if e.is_recoverable_auth() {
                warn!("Clearing stored session after auth failure: {}", e);
                if let Err(store_err) = self.store.clear_session().await {
                    warn!("Failed to clear stored session: {}", store_err);
                }
            }
        }
        result
    }

    async fn authorize(&self, ctx: &mut RunContext, force_fresh: bool) -> Result<()> {
        let cached = if force_fresh {
            info!("Fresh login requested, skipping cached session");
            false
        } else {
            self.try_cached_session(ctx).await?
        };

        if !cached {
            self.login(ctx).await?;
            self.exchange_authorization_code(ctx).await?;
        }
        self.exchange_access_token(ctx).await
    }

    /// `NoSession → KeyAcquired`
    pub async fn acquire_key(&self, ctx: &mut RunContext) -> Result<()> {
        info!("Acquiring keyCode and publicKey");
        let request = ProviderRequest::post(paths::KEY_CODE);
        let data = self
            .relay
            .call(&request, ctx.token().is_some())
            .await
            .map_err(|e| e.context("failed to acquire keyCode and publicKey"))?;

        let key = RequestKey::from_value(&data).ok_or_else(|| {
            BridgeError::protocol("failed to acquire keyCode and publicKey: empty key pair")
        })?;
        debug!("Request key headers: {:?}", key.headers().keys().collect::<Vec<_>>());

        ctx.request_key = Some(key);
        ctx.state = AuthState::KeyAcquired;
        Ok(())
    }

    /// Reuse the stored session when it is young enough and still accepted
    ///
    /// Returns whether the run reached `AuthCodeObtained` from the cache.
    /// Only store failures propagate; any provider failure falls back to login.
    pub async fn try_cached_session(&self, ctx: &mut RunContext) -> Result<bool> {
        let session = match self.store.load_session().await? {
            Some(session) if session.is_usable() => session,
            _ => {
                info!("No cached token, login required");
                return Ok(false);
            }
        };

        let now = Utc::now().timestamp_millis();
        if session.is_expired(now, self.cache_lifetime_millis) {
            info!(
                "Cached token is older than {} ms, login required",
                self.cache_lifetime_millis
            );
            self.store.clear_session().await?;
            return Ok(false);
        }

        info!("Trying cached token");
        ctx.session = Some(session);
        match self.exchange_authorization_code(ctx).await {
            Ok(()) => {
                info!("✅ Cached token is valid");
                Ok(true)
            }
            Err(e) => {
                warn!("Cached token rejected: {}", e);
                self.store.clear_session().await?;
                ctx.reset_auth();
                Ok(false)
            }
        }
    }

    /// `KeyAcquired → AuthValidated(fresh)`, retrying once on a wrong slider solve
    pub async fn login(&self, ctx: &mut RunContext) -> Result<()> {
        match self.login_once(ctx).await {
            Err(e) if e.is_verification_failure() => {
                warn!("Slider verification failed, logging in again: {}", e);
                self.login_once(ctx).await
            }
            other => other,
        }
    }

    async fn login_once(&self, ctx: &mut RunContext) -> Result<()> {
        let challenge = self
            .request_challenge(ctx)
            .await
            .map_err(|e| e.context("failed to get captcha"))?;
        let code = self
            .relay
            .recognize(&challenge.canvas_src)
            .await
            .map_err(|e| e.context("failed to get captcha"))?;
        info!("✅ Captcha solved");

        self.submit_login(ctx, &challenge.ticket, &code)
            .await
            .map_err(|e| e.context("login failed"))
    }

    pub async fn request_challenge(&self, ctx: &RunContext) -> Result<CaptchaChallenge> {
        let request = ProviderRequest::post(paths::LOGIN_VERIFY_CODE)
            .with_key(ctx.request_key.as_ref())
            .data(json!({
                "password": self.account.password,
                "account": self.account.username,
                "canvasHeight": request::CANVAS_HEIGHT,
                "canvasWidth": request::CANVAS_WIDTH,
            }));
        let data = self.relay.call(&request, ctx.token().is_some()).await?;

        let challenge = CaptchaChallenge {
            ticket: required_str(&data, "ticket", "captcha")?.to_string(),
            canvas_src: required_str(&data, "canvasSrc", "captcha")?.to_string(),
        };
        info!("✅ Captcha ticket obtained");
        Ok(challenge)
    }

    async fn submit_login(&self, ctx: &mut RunContext, ticket: &str, code: &str) -> Result<()> {
        let request = ProviderRequest::post(paths::LOGIN_TEST_CODE)
            .with_key(ctx.request_key.as_ref())
            .data(json!({
                "loginKey": ticket,
                "code": code,
                "params": {
                    "uscInfo": {
                        "devciceIp": "",
                        "tenant": request::TENANT,
                        "member": request::MEMBER,
                        "devciceId": "",
                    },
                    "quInfo": {
                        "optSys": request::OPT_SYS,
                        "pushId": request::PUSH_ID,
                        "addressProvince": request::ADDRESS_PROVINCE,
                        "password": self.account.password,
                        "addressRegion": request::ADDRESS_REGION,
                        "account": self.account.username,
                        "addressCity": request::ADDRESS_CITY,
                    },
                },
                "Channels": request::CHANNELS,
            }));
        let data = self.relay.call(&request, ctx.token().is_some()).await?;

        let session: Option<Session> = data
            .get("bizrt")
            .cloned()
            .and_then(|bizrt| serde_json::from_value(bizrt).ok());
        let session = match session {
            Some(session) if session.is_usable() => session,
            _ => {
                return Err(BridgeError::fatal(
                    None,
                    "no account identity returned, check WSGW_USERNAME and WSGW_PASSWORD",
                ))
            }
        };

        self.store
            .save_session(&session, Utc::now().timestamp_millis())
            .await?;

        info!("✅ Login succeeded");
        debug!(
            "Session token {}, user {}",
            masked(&session.token),
            session
                .primary_identity()
                .map(|identity| identity.display_name())
                .unwrap_or_default()
        );

        ctx.session = Some(session);
        ctx.state = AuthState::AuthValidated { cached: false };
        Ok(())
    }

    /// `AuthValidated → AuthCodeObtained`
    pub async fn exchange_authorization_code(&self, ctx: &mut RunContext) -> Result<()> {
        let token = ctx
            .token()
            .ok_or_else(|| BridgeError::protocol("authorization requires a session token"))?
            .to_string();

        let request = ProviderRequest::post(paths::AUTHORIZE)
            .with_key(ctx.request_key.as_ref())
            .header("token", token);
        let data = self
            .relay
            .call(&request, true)
            .await
            .map_err(|e| e.context("failed to get authorization code"))?;

        let redirect_url = required_str(&data, "redirect_url", "authorize")?;
        let code = redirect_url
            .split("?code=")
            .nth(1)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                BridgeError::protocol(format!("redirect url carries no code: {}", redirect_url))
            })?;

        ctx.authorization_code = Some(code.to_string());
        ctx.state = AuthState::AuthCodeObtained;
        info!("✅ Authorization code obtained");
        Ok(())
    }

    /// `AuthCodeObtained → AccessTokenObtained`
    pub async fn exchange_access_token(&self, ctx: &mut RunContext) -> Result<()> {
        let token = ctx
            .token()
            .ok_or_else(|| BridgeError::protocol("access token exchange requires a session token"))?
            .to_string();
        let authorization_code = ctx.authorization_code.clone().ok_or_else(|| {
            BridgeError::protocol("access token exchange requires an authorization code")
        })?;

        let request = ProviderRequest::post(paths::WEB_TOKEN)
            .with_key(ctx.request_key.as_ref())
            .header("token", token)
            .header("authorizecode", authorization_code);
        let data = self
            .relay
            .call(&request, true)
            .await
            .map_err(|e| e.context("failed to get access token"))?;

        let access_token = required_str(&data, "access_token", "getWebToken")?;
        debug!("Access token {}", masked(access_token));

        ctx.access_token = Some(access_token.to_string());
        ctx.state = AuthState::AccessTokenObtained;
        info!("✅ Access token obtained");
        Ok(())
    }
}
