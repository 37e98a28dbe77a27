use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::constants::credentials;
use crate::error::StoreError;
use crate::models::Session;

/// Key/value persistence of opaque strings
///
/// No caching: every call round-trips to the backend.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn clear(&self, key: &str) -> Result<(), StoreError>;
    fn name(&self) -> &'static str;
}

/// One file per key inside a namespace directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(file_name)
    }
}

#[async_trait]
impl CredentialBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, value)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Redis-backed credentials, keys prefixed with the namespace
#[derive(Clone)]
pub struct RedisBackend {
    connection_manager: ConnectionManager,
    prefix: String,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        info!("Initializing Redis credential backend");

        let client = Client::open(redis_url)?;
        let connection_manager = ConnectionManager::new(client).await?;

        let mut conn = connection_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("✅ Redis credential backend connected");

        Ok(Self {
            connection_manager,
            prefix: credentials::NAMESPACE.to_string(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl CredentialBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = conn.get(self.namespaced(key)).await?;
        debug!("Credential GET {} -> {}", key, value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        let _: () = conn.set(self.namespaced(key), value).await?;
        debug!("Credential SET {}", key);
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        let deleted: i32 = conn.del(self.namespaced(key)).await?;
        debug!("Credential DELETE {} (deleted: {})", key, deleted);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Process-local backend for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CredentialBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.values().remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Credential store with typed session helpers
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn CredentialBackend>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn CredentialBackend>) -> Self {
        Self { backend }
    }

    /// Redis when configured, else key files under `<data dir>/ONZ3V`
    pub async fn for_config(config: &StorageConfig) -> Result<Self, StoreError> {
        let backend: Arc<dyn CredentialBackend> = match &config.credential_redis_url {
            Some(url) => Arc::new(RedisBackend::connect(url).await?),
            None => Arc::new(FileBackend::new(
                config.data_dir.join(credentials::NAMESPACE),
            )?),
        };
        info!("Credential backend: {}", backend.name());
        Ok(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.backend.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.backend.set(key, value).await
    }

    pub async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.backend.clear(key).await
    }

    /// Stored session with its save time, `None` when absent or unreadable
    pub async fn load_session(&self) -> Result<Option<Session>, StoreError> {
        let blob = match self.get(credentials::SESSION_KEY).await? {
            Some(blob) if !blob.trim().is_empty() => blob,
            _ => return Ok(None),
        };

        let mut session: Session = match serde_json::from_str(&blob) {
            Ok(session) => session,
            Err(e) => {
                warn!("Discarding unreadable cached session: {}", e);
                return Ok(None);
            }
        };

        session.saved_at_epoch_millis = self
            .get(credentials::SESSION_TIME_KEY)
            .await?
            .and_then(|raw| raw.trim().parse::<i64>().ok());

        Ok(Some(session))
    }

    pub async fn save_session(&self, session: &Session, now_millis: i64) -> Result<(), StoreError> {
        let blob = serde_json::to_string(session)?;
        self.set(credentials::SESSION_KEY, &blob).await?;
        self.set(credentials::SESSION_TIME_KEY, &now_millis.to_string())
            .await?;
        Ok(())
    }

    pub async fn clear_session(&self) -> Result<(), StoreError> {
        self.clear(credentials::SESSION_KEY).await?;
        self.clear(credentials::SESSION_TIME_KEY).await?;
        Ok(())
    }
}
