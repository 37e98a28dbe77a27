// Bridge services
// Transport, credential store, relay protocol, session, meter data, history, publishing

pub mod credential_store;
pub mod history;
pub mod meter_fetcher;
pub mod publisher;
pub mod relay;
pub mod runner;
pub mod session_manager;
pub mod transport;

pub use credential_store::{
    CredentialBackend, CredentialStore, FileBackend, MemoryBackend, RedisBackend,
};
pub use history::{HistoryArchive, HistoryStore};
pub use meter_fetcher::{select_targets, MeterFetcher};
pub use publisher::{build_payload, MeterPayload, MqttPublisher, PublishOutcome};
pub use relay::{ProviderRequest, RelayClient};
pub use runner::{BridgeRunner, MeterReport, RunSummary};
pub use session_manager::SessionManager;
pub use transport::{HostRuntime, HttpTransport, TimeoutStrategy, Transport};
