// Session lifecycle integration tests
// Full login, cached session reuse, expiry and invalidation

mod common;

use chrono::Utc;
use common::*;
use serde_json::json;
use wsgw_bridge::constants::{credentials, provider::paths};
use wsgw_bridge::error::BridgeError;
use wsgw_bridge::models::{AuthState, RunContext, Session};

async fn seed_session(store: &wsgw_bridge::services::CredentialStore, token: &str, age_hours: i64) {
    let mut blob = session_blob();
    blob["token"] = json!(token);
    let session: Session = serde_json::from_value(blob).unwrap();
    let saved_at = Utc::now().timestamp_millis() - age_hours * 60 * 60 * 1000;
    store.save_session(&session, saved_at).await.unwrap();
}

#[tokio::test]
async fn test_full_login_from_empty_store() {
    let relay = FakeRelay::new();
    script_login(&relay);
    let store = memory_store();
    let manager = session_manager(&relay, &store);

    let mut ctx = RunContext::new();
    manager.authenticate(&mut ctx, false).await.unwrap();

    assert_eq!(ctx.state, AuthState::AccessTokenObtained);
    assert!(ctx.is_authenticated());
    assert_eq!(ctx.token(), Some("tok-fresh"));
    assert_eq!(ctx.authorization_code.as_deref(), Some("auth-code-1"));
    assert_eq!(ctx.access_token.as_deref(), Some("acc-1"));

    assert_eq!(relay.requests_to(paths::LOGIN_VERIFY_CODE).len(), 1);
    assert_eq!(relay.requests_to(paths::LOGIN_TEST_CODE).len(), 1);

    let stored = store.load_session().await.unwrap().unwrap();
    assert_eq!(stored.token, "tok-fresh");
    assert!(stored.saved_at_epoch_millis.is_some());
}

#[tokio::test]
async fn test_login_requests_carry_key_and_account() {
    let relay = FakeRelay::new();
    script_login(&relay);
    let store = memory_store();
    let manager = session_manager(&relay, &store);

    let mut ctx = RunContext::new();
    manager.authenticate(&mut ctx, false).await.unwrap();

    let challenge = &relay.requests_to(paths::LOGIN_VERIFY_CODE)[0];
    assert_eq!(challenge["headers"]["keyCode"], "kc-1");
    assert_eq!(challenge["data"]["account"], USERNAME);
    assert_eq!(challenge["data"]["canvasHeight"], 200);
    assert_eq!(challenge["data"]["canvasWidth"], 310);

    let login = &relay.requests_to(paths::LOGIN_TEST_CODE)[0];
    assert_eq!(login["data"]["loginKey"], "ticket-1");
    assert_eq!(login["data"]["code"], "153");
    assert_eq!(login["data"]["params"]["quInfo"]["account"], USERNAME);
    assert_eq!(login["data"]["Channels"], "web");

    let token = &relay.requests_to(paths::WEB_TOKEN)[0];
    assert_eq!(token["headers"]["token"], "tok-fresh");
    assert_eq!(token["headers"]["authorizecode"], "auth-code-1");
}

#[tokio::test]
async fn test_verification_error_retries_login_once() {
    let relay = FakeRelay::new();
    relay.succeed(paths::KEY_CODE, json!({ "keyCode": "kc-1" }));
    relay.succeed(
        paths::LOGIN_VERIFY_CODE,
        json!({ "ticket": "ticket-1", "canvasSrc": "src" }),
    );
    relay.respond(paths::LOGIN_TEST_CODE, json!("0"), "验证错误", json!(null));
    relay.succeed(paths::LOGIN_TEST_CODE, json!({ "bizrt": session_blob() }));
    relay.succeed(paths::AUTHORIZE, json!({ "redirect_url": "r?code=auth-code-2" }));
    relay.succeed(paths::WEB_TOKEN, json!({ "access_token": "acc-2" }));

    let store = memory_store();
    let manager = session_manager(&relay, &store);
    let mut ctx = RunContext::new();
    manager.authenticate(&mut ctx, false).await.unwrap();

    assert_eq!(ctx.access_token.as_deref(), Some("acc-2"));
    assert_eq!(relay.requests_to(paths::LOGIN_VERIFY_CODE).len(), 2);
    assert_eq!(relay.requests_to(paths::LOGIN_TEST_CODE).len(), 2);
}

#[tokio::test]
async fn test_repeated_verification_error_stops_after_one_retry() {
    let relay = FakeRelay::new();
    relay.succeed(paths::KEY_CODE, json!({ "keyCode": "kc-1" }));
    relay.succeed(
        paths::LOGIN_VERIFY_CODE,
        json!({ "ticket": "ticket-1", "canvasSrc": "src" }),
    );
    relay.respond(paths::LOGIN_TEST_CODE, json!("0"), "验证错误", json!(null));

    let store = memory_store();
    let manager = session_manager(&relay, &store);
    let mut ctx = RunContext::new();
    let err = manager.authenticate(&mut ctx, false).await.unwrap_err();

    assert!(err.is_verification_failure());
    assert_eq!(ctx.state, AuthState::Failed);
    assert_eq!(relay.requests_to(paths::LOGIN_TEST_CODE).len(), 2);
}

#[tokio::test]
async fn test_empty_identity_list_is_fatal() {
    let relay = FakeRelay::new();
    relay.succeed(paths::KEY_CODE, json!({ "keyCode": "kc-1" }));
    relay.succeed(
        paths::LOGIN_VERIFY_CODE,
        json!({ "ticket": "ticket-1", "canvasSrc": "src" }),
    );
    relay.succeed(
        paths::LOGIN_TEST_CODE,
        json!({ "bizrt": { "token": "t", "userInfo": [] } }),
    );

    let store = memory_store();
    let manager = session_manager(&relay, &store);
    let mut ctx = RunContext::new();
    let err = manager.authenticate(&mut ctx, false).await.unwrap_err();

    assert!(matches!(err, BridgeError::Fatal { .. }));
    assert_eq!(relay.requests_to(paths::LOGIN_TEST_CODE).len(), 1);
    assert!(store.load_session().await.unwrap().is_none());
}

#[tokio::test]
async fn test_young_cached_session_skips_login() {
    let relay = FakeRelay::new();
    script_login(&relay);
    let store = memory_store();
    seed_session(&store, "tok-cached", 1).await;
    let manager = session_manager(&relay, &store);

    let mut ctx = RunContext::new();
    manager.authenticate(&mut ctx, false).await.unwrap();

    assert!(ctx.is_authenticated());
    assert_eq!(ctx.token(), Some("tok-cached"));
    assert!(relay.requests_to(paths::LOGIN_VERIFY_CODE).is_empty());
    assert!(relay.requests_to(paths::LOGIN_TEST_CODE).is_empty());

    let authorize = relay.requests_to(paths::AUTHORIZE);
    assert_eq!(authorize.len(), 1);
    assert_eq!(authorize[0]["headers"]["token"], "tok-cached");
}

#[tokio::test]
async fn test_expired_cached_session_is_never_reused() {
    let relay = FakeRelay::new();
    script_login(&relay);
    let store = memory_store();
    seed_session(&store, "tok-stale", 48).await;
    let manager = session_manager(&relay, &store);

    let mut ctx = RunContext::new();
    manager.authenticate(&mut ctx, false).await.unwrap();

    assert_eq!(ctx.token(), Some("tok-fresh"));
    assert_eq!(relay.requests_to(paths::LOGIN_TEST_CODE).len(), 1);
    assert!(relay
        .requests_to(paths::AUTHORIZE)
        .iter()
        .all(|req| req["headers"]["token"] == "tok-fresh"));
}

#[tokio::test]
async fn test_rejected_cached_session_falls_back_to_login() {
    let relay = FakeRelay::new();
    relay.succeed(paths::KEY_CODE, json!({ "keyCode": "kc-1" }));
    relay.respond(paths::AUTHORIZE, json!(10015), "登录超时", json!({ "x": 1 }));
    relay.succeed(paths::AUTHORIZE, json!({ "redirect_url": "r?code=auth-code-3" }));
    relay.succeed(
        paths::LOGIN_VERIFY_CODE,
        json!({ "ticket": "ticket-1", "canvasSrc": "src" }),
    );
    relay.succeed(paths::LOGIN_TEST_CODE, json!({ "bizrt": session_blob() }));
    relay.succeed(paths::WEB_TOKEN, json!({ "access_token": "acc-3" }));

    let store = memory_store();
    seed_session(&store, "tok-cached", 1).await;
    let manager = session_manager(&relay, &store);

    let mut ctx = RunContext::new();
    manager.authenticate(&mut ctx, false).await.unwrap();

    assert_eq!(ctx.authorization_code.as_deref(), Some("auth-code-3"));
    let authorize = relay.requests_to(paths::AUTHORIZE);
    assert_eq!(authorize.len(), 2);
    assert_eq!(authorize[0]["headers"]["token"], "tok-cached");
    assert_eq!(authorize[1]["headers"]["token"], "tok-fresh");

    let stored = store.load_session().await.unwrap().unwrap();
    assert_eq!(stored.token, "tok-fresh");
}

#[tokio::test]
async fn test_forced_fresh_login_ignores_cache() {
    let relay = FakeRelay::new();
    script_login(&relay);
    let store = memory_store();
    seed_session(&store, "tok-cached", 1).await;
    let manager = session_manager(&relay, &store);

    let mut ctx = RunContext::new();
    manager.authenticate(&mut ctx, true).await.unwrap();

    assert_eq!(ctx.token(), Some("tok-fresh"));
    assert_eq!(relay.requests_to(paths::LOGIN_TEST_CODE).len(), 1);
}

#[tokio::test]
async fn test_recoverable_failure_after_key_clears_store() {
    let relay = FakeRelay::new();
    script_login(&relay);
    relay.raw_response(paths::WEB_TOKEN, json!({ "code": 30010, "message": "请重新登录" }));
    let store = memory_store();
    let manager = session_manager(&relay, &store);

    let mut ctx = RunContext::new();
    let err = manager.authenticate(&mut ctx, false).await.unwrap_err();

    assert!(err.is_recoverable_auth());
    assert_eq!(ctx.state, AuthState::Failed);
    assert!(store.get(credentials::SESSION_KEY).await.unwrap().is_none());
    assert!(store.get(credentials::SESSION_TIME_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_key_exchange_failure_is_fatal_for_the_run() {
    let relay = FakeRelay::new();
    relay.respond(paths::KEY_CODE, json!("500"), "服务异常", json!(null));
    let store = memory_store();
    let manager = session_manager(&relay, &store);

    let mut ctx = RunContext::new();
    let err = manager.authenticate(&mut ctx, false).await.unwrap_err();

    assert!(err.to_string().contains("failed to acquire keyCode and publicKey"));
    assert_eq!(ctx.state, AuthState::Failed);
    assert_eq!(relay.all_requests().len(), 1);
}
