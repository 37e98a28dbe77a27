// Relay protocol integration tests
// Exercises the encrypt → provider → decrypt hops against FakeRelay

mod common;

use common::*;
use serde_json::json;
use wsgw_bridge::constants::provider::paths;
use wsgw_bridge::error::{AuthFailure, BridgeError};
use wsgw_bridge::services::ProviderRequest;

#[tokio::test]
async fn test_call_runs_three_hops_and_returns_data() {
    let relay = FakeRelay::new();
    relay.succeed(paths::ACCOUNT_BALANCE, json!({ "list": [{ "sumMoney": "10" }] }));
    let client = relay_client(&relay);

    let request = ProviderRequest::post(paths::ACCOUNT_BALANCE)
        .header("token", "t")
        .data(json!({ "serviceCode": "0101143" }));
    let data = client.call(&request, true).await.unwrap();

    assert_eq!(data, json!({ "list": [{ "sumMoney": "10" }] }));

    let urls: Vec<String> = relay.envelopes().iter().map(|e| e.url.clone()).collect();
    assert_eq!(
        urls,
        vec![
            format!("{}/encrypt", RELAY),
            format!("{}/api{}", PROVIDER, paths::ACCOUNT_BALANCE),
            format!("{}/decrypt", RELAY),
        ]
    );

    let encrypt = &relay.envelopes()[0];
    let body: serde_json::Value = serde_json::from_str(encrypt.body_str().unwrap()).unwrap();
    assert_eq!(body["yuheng"]["url"], api(paths::ACCOUNT_BALANCE));
    assert_eq!(body["yuheng"]["method"], "post");
    assert_eq!(body["yuheng"]["data"]["serviceCode"], "0101143");
    assert_eq!(encrypt.header_value("content-type"), Some("application/json"));

    let provider = &relay.envelopes()[1];
    assert_eq!(provider.header_value("version"), Some("1"));
    assert_eq!(relay.provider_hops()[0].body.as_deref(), Some("\"cipher\""));

    let configs = relay.decrypt_configs_for(paths::ACCOUNT_BALANCE);
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0]["headers"]["token"], "t");
}

#[tokio::test]
async fn test_authorize_body_is_unquoted() {
    let relay = FakeRelay::new();
    relay.succeed(paths::AUTHORIZE, json!({ "redirect_url": "x?code=c" }));
    let client = relay_client(&relay);

    client
        .call(&ProviderRequest::post(paths::AUTHORIZE), true)
        .await
        .unwrap();

    assert_eq!(relay.provider_hops()[0].body.as_deref(), Some("cipher"));
}

#[tokio::test]
async fn test_key_exchange_decrypt_carries_encrypt_key() {
    let relay = FakeRelay::new();
    relay.succeed(paths::KEY_CODE, json!({ "keyCode": "kc", "publicKey": "pk" }));
    let client = relay_client(&relay);

    let request = ProviderRequest::post(paths::KEY_CODE).header("ignored", "yes");
    client.call(&request, false).await.unwrap();

    let configs = relay.decrypt_configs_for(paths::KEY_CODE);
    assert_eq!(configs[0]["headers"], json!({ "encryptKey": "ek-1" }));
}

#[tokio::test]
async fn test_raw_auth_code_short_circuits_decrypt() {
    let relay = FakeRelay::new();
    relay.raw_response(
        paths::ACCOUNT_BALANCE,
        json!({ "code": 10010, "message": "会话已失效" }),
    );
    let client = relay_client(&relay);

    let err = client
        .call(&ProviderRequest::post(paths::ACCOUNT_BALANCE), true)
        .await
        .unwrap_err();

    match &err {
        BridgeError::RecoverableAuth { kind, code, message } => {
            assert_eq!(*kind, AuthFailure::SessionExpired);
            assert_eq!(code.as_deref(), Some("10010"));
            assert_eq!(message, "会话已失效");
        }
        other => panic!("expected RecoverableAuth, got {:?}", other),
    }
    assert!(relay.decrypt_configs_for(paths::ACCOUNT_BALANCE).is_empty());
}

#[tokio::test]
async fn test_token_empty_only_counts_with_a_token() {
    let relay = FakeRelay::new();
    relay.raw_response(
        paths::SEARCH_USER,
        json!({ "code": 10002, "message": "Token 为空！" }),
    );
    relay.respond(paths::SEARCH_USER, json!(10002), "Token 为空！", json!(null));
    let client = relay_client(&relay);
    let request = ProviderRequest::post(paths::SEARCH_USER);

    let with_token = client.call(&request, true).await.unwrap_err();
    assert!(matches!(
        with_token,
        BridgeError::RecoverableAuth { kind: AuthFailure::TokenEmpty, .. }
    ));

    let without_token = client.call(&request, false).await.unwrap_err();
    assert!(matches!(without_token, BridgeError::Fatal { .. }));
}

#[tokio::test]
async fn test_authorize_codes_demand_reobtain() {
    let relay = FakeRelay::new();
    relay.respond(paths::AUTHORIZE, json!(10108), "授权失败", json!({ "detail": 1 }));
    let client = relay_client(&relay);

    let err = client
        .call(&ProviderRequest::post(paths::AUTHORIZE), true)
        .await
        .unwrap_err();

    assert!(err.is_recoverable_auth());
    assert_eq!(err.to_string(), "重新获取: 授权失败");
}

#[tokio::test]
async fn test_business_failure_is_fatal_with_provider_message() {
    let relay = FakeRelay::new();
    relay.respond(paths::ACCOUNT_BALANCE, json!("9999"), "系统繁忙", json!(null));
    let client = relay_client(&relay);

    let err = client
        .call(&ProviderRequest::post(paths::ACCOUNT_BALANCE), true)
        .await
        .unwrap_err();

    match err {
        BridgeError::Fatal { code, message } => {
            assert_eq!(code.as_deref(), Some("9999"));
            assert_eq!(message, "系统繁忙");
        }
        other => panic!("expected Fatal, got {:?}", other),
    }
}

#[tokio::test]
async fn test_recognize_returns_solved_code() {
    let relay = FakeRelay::new();
    relay.captcha_response(json!({ "data": 187 }));
    let client = relay_client(&relay);

    assert_eq!(client.recognize("data:image/png;base64,AAAA").await.unwrap(), "187");

    let envelope = &relay.envelopes()[0];
    assert_eq!(envelope.url, format!("{}/get_x", RELAY));
    let body: serde_json::Value = serde_json::from_str(envelope.body_str().unwrap()).unwrap();
    assert_eq!(body, json!({ "yuheng": "data:image/png;base64,AAAA" }));
}

#[tokio::test]
async fn test_recognize_without_code_is_protocol_error() {
    let relay = FakeRelay::new();
    relay.captcha_response(json!({ "msg": "busy" }));
    let client = relay_client(&relay);

    assert!(matches!(
        client.recognize("src").await,
        Err(BridgeError::Protocol(_))
    ));
}
