// Shared fixtures for integration tests
// FakeRelay plays relay and provider behind the Transport trait
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use wsgw_bridge::config::{AccountConfig, SessionConfig};
use wsgw_bridge::constants::provider::{paths, API_PREFIX};
use wsgw_bridge::error::TransportError;
use wsgw_bridge::models::{RequestEnvelope, TransportResponse};
use wsgw_bridge::services::{
    CredentialStore, MemoryBackend, MeterFetcher, RelayClient, SessionManager, Transport,
};
use wsgw_bridge::Config;

pub const RELAY: &str = "https://relay.test/wsgw";
pub const PROVIDER: &str = "https://provider.test";
pub const USERNAME: &str = "13800000000";
pub const PASSWORD: &str = "secret";

pub fn api(path: &str) -> String {
    format!("{}{}", API_PREFIX, path)
}

/// One request that reached the provider
#[derive(Debug, Clone)]
pub struct ProviderHop {
    pub path: String,
    pub body: Option<String>,
}

/// Scripted relay + provider
///
/// `/encrypt` echoes the logical request back with an opaque `"cipher"`
/// payload; `/decrypt` answers from per-path queues. The last queued answer
/// for a path repeats.
#[derive(Default)]
pub struct FakeRelay {
    decrypted: Mutex<HashMap<String, VecDeque<Value>>>,
    raw: Mutex<HashMap<String, VecDeque<Value>>>,
    captcha: Mutex<VecDeque<Value>>,
    requests: Mutex<Vec<Value>>,
    decrypt_configs: Mutex<Vec<Value>>,
    provider_hops: Mutex<Vec<ProviderHop>>,
    envelopes: Mutex<Vec<RequestEnvelope>>,
}

fn pop(queues: &Mutex<HashMap<String, VecDeque<Value>>>, path: &str) -> Option<Value> {
    let mut queues = queues.lock().unwrap();
    let queue = queues.get_mut(path)?;
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl FakeRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a decrypted `{code, message, data}` for a provider path
    pub fn respond(&self, path: &str, code: Value, message: &str, data: Value) {
        self.decrypted
            .lock()
            .unwrap()
            .entry(api(path))
            .or_default()
            .push_back(json!({ "code": code, "message": message, "data": data }));
    }

    pub fn succeed(&self, path: &str, data: Value) {
        self.respond(path, json!("1"), "成功", data);
    }

    /// Queue a raw provider body, seen before decryption
    pub fn raw_response(&self, path: &str, body: Value) {
        self.raw
            .lock()
            .unwrap()
            .entry(api(path))
            .or_default()
            .push_back(body);
    }

    pub fn captcha_response(&self, body: Value) {
        self.captcha.lock().unwrap().push_back(body);
    }

    /// Logical requests the relay was asked to encrypt for `path`
    pub fn requests_to(&self, path: &str) -> Vec<Value> {
        let url = api(path);
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req["url"] == url.as_str())
            .cloned()
            .collect()
    }

    pub fn all_requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn decrypt_configs_for(&self, path: &str) -> Vec<Value> {
        let url = api(path);
        self.decrypt_configs
            .lock()
            .unwrap()
            .iter()
            .filter(|config| config["url"] == url.as_str())
            .cloned()
            .collect()
    }

    pub fn provider_hops(&self) -> Vec<ProviderHop> {
        self.provider_hops.lock().unwrap().clone()
    }

    pub fn envelopes(&self) -> Vec<RequestEnvelope> {
        self.envelopes.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.envelopes.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeRelay {
    async fn send(&self, envelope: RequestEnvelope) -> Result<TransportResponse, TransportError> {
        let url = envelope.url.clone();
        let body: Value = envelope
            .body_str()
            .and_then(|b| serde_json::from_str(b).ok())
            .unwrap_or(Value::Null);
        self.envelopes.lock().unwrap().push(envelope.clone());

        let reply = if url == format!("{}/encrypt", RELAY) {
            let request = body["yuheng"].clone();
            self.requests.lock().unwrap().push(request.clone());
            json!({
                "code": 1,
                "data": {
                    "url": request["url"],
                    "method": "post",
                    "headers": { "content-type": "application/json", "version": 1 },
                    "data": "cipher",
                    "encryptKey": "ek-1",
                }
            })
        } else if url == format!("{}/decrypt", RELAY) {
            let config = body["yuheng"]["config"].clone();
            let path = config["url"].as_str().unwrap_or_default().to_string();
            self.decrypt_configs.lock().unwrap().push(config);
            let payload = pop(&self.decrypted, &path).unwrap_or_else(|| {
                json!({ "code": "0", "message": format!("no scripted response for {}", path) })
            });
            json!({ "data": payload })
        } else if url == format!("{}/get_x", RELAY) {
            let mut captcha = self.captcha.lock().unwrap();
            let reply = if captcha.len() > 1 {
                captcha.pop_front()
            } else {
                captcha.front().cloned()
            };
            reply.unwrap_or_else(|| json!({ "data": 153 }))
        } else if let Some(path) = url.strip_prefix(PROVIDER) {
            self.provider_hops.lock().unwrap().push(ProviderHop {
                path: path.to_string(),
                body: envelope.body_str().map(str::to_string),
            });
            pop(&self.raw, path).unwrap_or_else(|| json!({ "encryptData": "opaque" }))
        } else {
            return Err(TransportError::InvalidRequest(format!("unexpected url {}", url)));
        };

        Ok(TransportResponse::new(200, reply.to_string()))
    }
}

pub fn session_blob() -> Value {
    json!({
        "token": "tok-fresh",
        "userInfo": [{ "userId": "u-1", "loginAccount": USERNAME, "nickname": "home" }],
    })
}

/// Key exchange, captcha, login, authorize and web token all succeed
pub fn script_login(relay: &FakeRelay) {
    relay.succeed(paths::KEY_CODE, json!({ "keyCode": "kc-1", "publicKey": "pk-1" }));
    relay.succeed(
        paths::LOGIN_VERIFY_CODE,
        json!({ "ticket": "ticket-1", "canvasSrc": "data:image/png;base64,AAAA" }),
    );
    relay.succeed(paths::LOGIN_TEST_CODE, json!({ "bizrt": session_blob() }));
    relay.succeed(
        paths::AUTHORIZE,
        json!({ "redirect_url": "https://www.95598.cn/osgweb/index?code=auth-code-1" }),
    );
    relay.succeed(paths::WEB_TOKEN, json!({ "access_token": "acc-1" }));
}

pub fn binding(cons_no: &str, dst: &str) -> Value {
    json!({
        "consNo": cons_no,
        "consNo_dst": dst,
        "consName_dst": "家",
        "proNo": "33101",
        "orgNo": "33401",
        "orgName": "杭州供电公司",
        "constType": "01",
    })
}

pub fn months(year: i32, count: u32) -> Vec<Value> {
    (1..=count)
        .map(|m| json!({ "month": format!("{}{:02}", year, m), "monthEleNum": "100" }))
        .collect()
}

/// Bindings, balance, daily and a full year of monthly usage
pub fn script_meters(relay: &FakeRelay, bindings: Vec<Value>) {
    relay.succeed(paths::SEARCH_USER, json!({ "bizrt": { "powerUserList": bindings } }));
    relay.succeed(
        paths::ACCOUNT_BALANCE,
        json!({ "list": [{ "consNo": "3300000001", "sumMoney": "88.50", "totalPq": "120", "date": "2024-01-09" }] }),
    );
    relay.succeed(
        paths::BUSINESS_INFO,
        json!({
            "sevenEleList": [
                { "day": "20240107", "dayElePq": "3.1" },
                { "day": "20240108", "dayElePq": "-" },
            ],
            "totalPq": "3.1",
            "mothEleList": months(2024, 12),
            "dataInfo": { "totalEleNum": "1200", "totalEleCost": "600" },
        }),
    );
}

pub fn account() -> AccountConfig {
    AccountConfig {
        username: USERNAME.to_string(),
        password: PASSWORD.to_string(),
    }
}

pub fn memory_store() -> CredentialStore {
    CredentialStore::new(Arc::new(MemoryBackend::new()))
}

pub fn relay_client(relay: &Arc<FakeRelay>) -> RelayClient {
    let transport: Arc<dyn Transport> = relay.clone();
    RelayClient::new(transport, RELAY, PROVIDER)
}

pub fn session_manager(relay: &Arc<FakeRelay>, store: &CredentialStore) -> SessionManager {
    SessionManager::new(
        relay_client(relay),
        store.clone(),
        account(),
        &SessionConfig::default(),
    )
}

pub fn meter_fetcher(relay: &Arc<FakeRelay>) -> MeterFetcher {
    MeterFetcher::new(relay_client(relay))
}

/// Config pointed at the fake hosts and a scratch data dir
pub fn test_config(data_dir: &Path, extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("WSGW_USERNAME", USERNAME),
        ("WSGW_PASSWORD", PASSWORD),
        ("WSGW_RELAY_HOST", RELAY),
        ("WSGW_PROVIDER_BASE", PROVIDER),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    vars.insert(
        "DATA_STORE_DIR".to_string(),
        data_dir.to_string_lossy().to_string(),
    );
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(move |key| vars.get(key).cloned()).unwrap()
}
