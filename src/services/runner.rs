use chrono::{Datelike, Local, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::models::{BalanceSnapshot, DailyUsage, MonthlyUsage, RunContext};
use crate::services::credential_store::CredentialStore;
use crate::services::history::HistoryStore;
use crate::services::meter_fetcher::{select_targets, MeterFetcher};
use crate::services::publisher::{build_payload, MqttPublisher, PublishOutcome};
use crate::services::relay::RelayClient;
use crate::services::session_manager::SessionManager;
use crate::services::transport::{HostRuntime, HttpTransport, Transport};

/// What one meter produced during a run
#[derive(Debug, Clone)]
pub struct MeterReport {
    /// Position in the account's binding list
    pub index: usize,
    pub meter_id: String,
    pub balance: BalanceSnapshot,
    pub daily: DailyUsage,
    pub monthly: MonthlyUsage,
    /// Daily records in the archive after merging, `None` when not saved
    pub stored_days: Option<usize>,
    pub publish: Option<PublishOutcome>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub meters: Vec<MeterReport>,
    /// The run had to log in again after a recoverable auth failure
    pub relogged_in: bool,
}

/// Orchestrates authentication, the meter loop, archiving and publishing
pub struct BridgeRunner {
    config: Config,
    sessions: SessionManager,
    fetcher: MeterFetcher,
    history: HistoryStore,
    publisher: MqttPublisher,
}

impl BridgeRunner {
    pub fn new(config: Config, transport: Arc<dyn Transport>, store: CredentialStore) -> Self {
        let relay = RelayClient::from_config(transport, &config.transport);
        let sessions = SessionManager::new(
            relay.clone(),
            store,
            config.account.clone(),
            &config.session,
        );

        Self {
            sessions,
            fetcher: MeterFetcher::new(relay),
            history: HistoryStore::new(&config.history),
            publisher: MqttPublisher::new(config.mqtt.clone()),
            config,
        }
    }

    /// Wire the HTTP transport and credential backend for `runtime`
    pub async fn from_config(config: Config, runtime: HostRuntime) -> Result<Self> {
        let transport = HttpTransport::for_runtime(runtime, config.transport.timeout())?;
        let store = CredentialStore::for_config(&config.storage).await?;
        Ok(Self::new(config, Arc::new(transport), store))
    }

    pub async fn run(&self) -> Result<RunSummary> {
        if !self.config.account.is_configured() {
            return Err(BridgeError::CredentialsMissing);
        }

        match self.run_once(false).await {
            Ok(summary) => Ok(summary),
            // the verification retry already happened inside login
            Err(e) if e.is_recoverable_auth() && !e.is_verification_failure() => {
                self.invalidate(&e).await;
                warn!("Authentication rejected, retrying with a fresh login: {}", e);

                match self.run_once(true).await {
                    Ok(mut summary) => {
                        summary.relogged_in = true;
                        Ok(summary)
                    }
                    Err(e) => {
                        error!("Run failed after fresh login: {}", e);
                        self.invalidate(&e).await;
                        Err(e)
                    }
                }
            }
            Err(e) => {
                self.invalidate(&e).await;
                Err(e)
            }
        }
    }

    async fn invalidate(&self, e: &BridgeError) {
        if !e.invalidates_session() {
            return;
        }
        match self.sessions.store().clear_session().await {
            Ok(()) => info!("✅ Cleared cached session"),
            Err(store_err) => warn!("Failed to clear cached session: {}", store_err),
        }
    }

    async fn run_once(&self, force_fresh: bool) -> Result<RunSummary> {
        let mut ctx = RunContext::new();
        self.sessions.authenticate(&mut ctx, force_fresh).await?;

        let bindings = self.fetcher.fetch_bindings(&mut ctx).await?;
        if bindings.is_empty() {
            warn!("No meter is bound to this account");
            return Ok(RunSummary::default());
        }

        let targets = select_targets(&bindings, &self.config.meter_filter);
        let today = Local::now().date_naive();

        let mut summary = RunSummary::default();
        for index in targets {
            summary
                .meters
                .push(self.process_meter(&ctx, index, today).await?);
        }

        info!("✅ Run complete, {} meters processed", summary.meters.len());
        Ok(summary)
    }

    async fn process_meter(
        &self,
        ctx: &RunContext,
        index: usize,
        today: NaiveDate,
    ) -> Result<MeterReport> {
        let balance = self.fetcher.fetch_balance(ctx, index).await?;
        let window = self.config.query.window(today);
        let daily = self
            .fetcher
            .fetch_daily(ctx, index, window, today.year())
            .await?;
        let monthly = self.fetcher.fetch_monthly(ctx, index, today.year()).await?;

        let binding = &ctx.bindings[index];
        let meter_id = balance
            .cons_no
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| binding.cons_no.clone());

        self.log_summary(ctx, index, &balance, &daily, &monthly);

        let samples = daily.samples();
        let stored_days = match self.history.record(
            &meter_id,
            &samples,
            &monthly.samples(),
            Utc::now(),
            today,
        ) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to save history for {}: {}", meter_id, e);
                None
            }
        };

        let payload = build_payload(&balance, &samples, &monthly);
        let publish = match self.publisher.publish(&meter_id, &payload).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Failed to publish {}: {}", meter_id, e);
                None
            }
        };

        Ok(MeterReport {
            index,
            meter_id,
            balance,
            daily,
            monthly,
            stored_days,
            publish,
        })
    }

    fn log_summary(
        &self,
        ctx: &RunContext,
        index: usize,
        balance: &BalanceSnapshot,
        daily: &DailyUsage,
        monthly: &MonthlyUsage,
    ) {
        let binding = &ctx.bindings[index];
        let mut lines = Vec::new();

        if let Some(total_pq) = balance.total_pq.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("period usage: {} kWh", total_pq));
        }
        if let Some(sum_money) = balance.sum_money.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("balance: {} CNY", sum_money));
        }
        lines.push(format!(
            "as of: {}",
            balance.date.as_deref().unwrap_or("-")
        ));
        if let Some(totals) = &monthly.data_info {
            if let (Some(num), Some(cost)) = (&totals.total_ele_num, &totals.total_ele_cost) {
                lines.push(format!("year: {} kWh, {} CNY", num, cost));
            }
        }
        if !binding.cons_no_dst.is_empty() {
            match &binding.cons_name_dst {
                Some(name) => lines.push(format!("account: {}|{}", binding.cons_no_dst, name)),
                None => lines.push(format!("account: {}", binding.cons_no_dst)),
            }
        }
        if let Some(org_name) = &binding.org_name {
            lines.push(format!("supplier: {}", org_name));
        }
        if let Some(total) = daily.total_pq.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("window usage: {} kWh", total));
        }

        info!("📊 Meter {}: {}", index + 1, lines.join(", "));
    }
}
