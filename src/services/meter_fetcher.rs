use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::DateWindow;
use crate::constants::{provider::paths, request};
use crate::error::{BridgeError, Result};
use crate::models::{
    BalanceSnapshot, DailyUsage, MeterBinding, MonthlyUsage, RunContext, UserIdentity,
};
use crate::services::relay::{ProviderRequest, RelayClient};

/// Authenticated pieces every data request carries
struct Credentials<'a> {
    token: &'a str,
    access_token: &'a str,
    identity: &'a UserIdentity,
}

/// Reads bindings, balance and usage series for the authenticated account
#[derive(Clone)]
pub struct MeterFetcher {
    relay: RelayClient,
}

/// Indices of the bindings to process, in binding order
///
/// An empty filter selects every meter; a filter matching nothing falls
/// back to every meter with a warning.
pub fn select_targets(bindings: &[MeterBinding], filter: &[String]) -> Vec<usize> {
    let all: Vec<usize> = (0..bindings.len()).collect();
    if filter.is_empty() {
        return all;
    }

    let selected: Vec<usize> = bindings
        .iter()
        .enumerate()
        .filter(|(_, binding)| filter.iter().any(|id| binding.matches(id)))
        .map(|(index, _)| index)
        .collect();

    if selected.is_empty() {
        warn!(
            "QUERY_CONS_NO {:?} matches no bound meter, processing all {} meters",
            filter,
            bindings.len()
        );
        return all;
    }
    info!("Processing {} of {} meters", selected.len(), bindings.len());
    selected
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| BridgeError::protocol(format!("unexpected {} response: {}", what, e)))
}

impl MeterFetcher {
    pub fn new(relay: RelayClient) -> Self {
        Self { relay }
    }

    fn credentials<'a>(&self, ctx: &'a RunContext) -> Result<Credentials<'a>> {
        let (true, Some(token), Some(access_token)) = (
            ctx.is_authenticated(),
            ctx.token(),
            ctx.access_token.as_deref(),
        ) else {
            return Err(BridgeError::protocol(
                "meter data requested before authentication completed",
            ));
        };
        let identity = ctx
            .session
            .as_ref()
            .and_then(|session| session.primary_identity())
            .ok_or_else(|| BridgeError::protocol("session carries no account identity"))?;

        Ok(Credentials {
            token,
            access_token,
            identity,
        })
    }

    fn binding<'a>(&self, ctx: &'a RunContext, index: usize) -> Result<&'a MeterBinding> {
        ctx.bindings.get(index).ok_or_else(|| {
            BridgeError::protocol(format!(
                "meter index {} out of range ({} bound)",
                index,
                ctx.bindings.len()
            ))
        })
    }

    fn data_request(&self, ctx: &RunContext, creds: &Credentials<'_>, path: &str) -> ProviderRequest {
        ProviderRequest::post(path)
            .with_key(ctx.request_key.as_ref())
            .header("token", creds.token)
            .header("acctoken", creds.access_token)
    }

    fn member_info(creds: &Credentials<'_>) -> Value {
        json!({
            "serviceCode": request::SERVICE_CODE,
            "source": request::SOURCE,
            "target": request::TARGET,
            "uscInfo": {
                "member": request::MEMBER,
                "devciceIp": "",
                "devciceId": "",
                "tenant": request::TENANT,
            },
            "quInfo": { "userId": creds.identity.user_id },
            "token": creds.token,
        })
    }

    /// Stores the account's meter bindings in the context and returns them
    pub async fn fetch_bindings(&self, ctx: &mut RunContext) -> Result<Vec<MeterBinding>> {
        info!("Fetching bound meters");
        let bindings = {
            let creds = self.credentials(ctx)?;
            let mut member = Self::member_info(&creds);
            member["serviceCode"] = json!(request::USER_INFORM_SERVICE_CODE);
            member["Channels"] = json!(request::CHANNELS);

            let req = self.data_request(ctx, &creds, paths::SEARCH_USER).data(member);
            let data = self
                .relay
                .call(&req, true)
                .await
                .map_err(|e| e.context("failed to fetch bound meters"))?;

            let list = data
                .get("bizrt")
                .ok_or_else(|| BridgeError::protocol("bind info response carries no bizrt"))?
                .get("powerUserList")
                .cloned()
                .unwrap_or_else(|| json!([]));
            decode::<Vec<MeterBinding>>(list, "bind info")?
        };

        info!("✅ {} meters bound", bindings.len());
        debug!("Bindings: {:?}", bindings);
        ctx.bindings = bindings.clone();
        Ok(bindings)
    }

    /// Current balance of one meter
    pub async fn fetch_balance(&self, ctx: &RunContext, index: usize) -> Result<BalanceSnapshot> {
        let creds = self.credentials(ctx)?;
        let binding = self.binding(ctx, index)?;
        info!("Fetching balance for meter {}", binding.cons_no_dst);

        let req = self.data_request(ctx, &creds, paths::ACCOUNT_BALANCE).data(json!({
            "data": {
                "srvCode": "",
                "serialNo": "",
                "channelCode": request::CHANNEL_CODE,
                "funcCode": request::ACCOUNT_FUNC_CODE,
                "acctId": creds.identity.user_id,
                "userName": creds.identity.account_name(),
                "promotType": request::PROMOT_TYPE,
                "promotCode": request::PROMOT_CODE,
                "userAccountId": creds.identity.user_id,
                "list": [{
                    "consNoSrc": binding.cons_no_dst,
                    "proCode": binding.pro_no,
                    "sceneType": binding.meter_type,
                    "consNo": binding.cons_no,
                    "orgNo": binding.org_no,
                }],
            },
            "serviceCode": request::USER_INFORM_SERVICE_CODE,
            "source": request::SOURCE,
            "target": binding.province_code(),
        }));

        let data = self
            .relay
            .call(&req, true)
            .await
            .map_err(|e| e.context("failed to fetch balance"))?;
        let first = data
            .get("list")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .cloned()
            .ok_or_else(|| BridgeError::protocol("balance response carries an empty list"))?;

        let balance: BalanceSnapshot = decode(first, "balance")?;
        info!("✅ Balance fetched");
        debug!("Balance: {:?}", balance);
        Ok(balance)
    }

    /// Daily consumption of one meter inside `window`
    ///
    /// The series may contain "no reading" entries; callers filter them.
    pub async fn fetch_daily(
        &self,
        ctx: &RunContext,
        index: usize,
        window: DateWindow,
        current_year: i32,
    ) -> Result<DailyUsage> {
        let creds = self.credentials(ctx)?;
        let binding = self.binding(ctx, index)?;
        info!(
            "Fetching daily usage {} ~ {}",
            window.start_str(),
            window.end_str()
        );

        let req = self.data_request(ctx, &creds, paths::BUSINESS_INFO).data(json!({
            "params1": Self::member_info(&creds),
            "params3": {
                "data": {
                    "acctId": creds.identity.user_id,
                    "consNo": binding.cons_no_dst,
                    "consType": binding.usage_cons_type(),
                    "endTime": window.end_str(),
                    "orgNo": binding.org_no,
                    "queryYear": current_year.to_string(),
                    "proCode": binding.province_code(),
                    "serialNo": "",
                    "srvCode": "",
                    "startTime": window.start_str(),
                    "userName": creds.identity.display_name(),
                    "funcCode": request::USAGE_FUNC_CODE,
                    "channelCode": request::CHANNEL_CODE,
                    "clearCache": request::CLEAR_CACHE,
                    "promotCode": request::PROMOT_CODE,
                    "promotType": request::PROMOT_TYPE,
                },
                "serviceCode": request::USAGE_SERVICE_CODE,
                "source": request::USAGE_SOURCE,
                "target": binding.province_code(),
            },
            "params4": request::DAILY_SERIES,
        }));

        let data = self
            .relay
            .call(&req, true)
            .await
            .map_err(|e| e.context("failed to fetch daily usage"))?;
        let usage: DailyUsage = decode(data, "daily usage")?;
        info!("✅ Daily usage fetched ({} entries)", usage.seven_ele_list.len());
        Ok(usage)
    }

    fn monthly_request(
        &self,
        ctx: &RunContext,
        creds: &Credentials<'_>,
        binding: &MeterBinding,
        year: i32,
    ) -> ProviderRequest {
        self.data_request(ctx, creds, paths::BUSINESS_INFO).data(json!({
            "params1": Self::member_info(creds),
            "params3": {
                "data": {
                    "acctId": creds.identity.user_id,
                    "consNo": binding.cons_no_dst,
                    "consType": binding.usage_cons_type(),
                    "orgNo": binding.org_no,
                    "proCode": binding.province_code(),
                    "provinceCode": binding.province_code(),
                    "queryYear": year.to_string(),
                    "serialNo": "",
                    "srvCode": "",
                    "userName": creds.identity.display_name(),
                    "funcCode": request::USAGE_FUNC_CODE,
                    "channelCode": request::CHANNEL_CODE,
                    "clearCache": request::CLEAR_CACHE,
                    "promotCode": request::PROMOT_CODE,
                    "promotType": request::PROMOT_TYPE,
                },
                "serviceCode": request::USAGE_SERVICE_CODE,
                "source": request::USAGE_SOURCE,
                "target": binding.province_code(),
            },
            "params4": request::MONTHLY_SERIES,
        }))
    }

    /// Monthly consumption for `year`, backfilled once from the prior year
    /// when the year has fewer than twelve entries
    pub async fn fetch_monthly(
        &self,
        ctx: &RunContext,
        index: usize,
        year: i32,
    ) -> Result<MonthlyUsage> {
        let creds = self.credentials(ctx)?;
        let binding = self.binding(ctx, index)?;
        info!("Fetching monthly usage for {}", year);

        let req = self.monthly_request(ctx, &creds, binding, year);
        let data = self
            .relay
            .call(&req, true)
            .await
            .map_err(|e| e.context("failed to fetch monthly usage"))?;
        let mut usage: MonthlyUsage = decode(data, "monthly usage")?;

        if usage.is_short_year() {
            debug!(
                "{} has {} monthly entries, backfilling from {}",
                year,
                usage.moth_ele_list.len(),
                year - 1
            );
            let req = self.monthly_request(ctx, &creds, binding, year - 1);
            let data = self
                .relay
                .call(&req, true)
                .await
                .map_err(|e| e.context("failed to fetch monthly usage"))?;
            let previous: MonthlyUsage = decode(data, "monthly usage")?;

            let mut combined = previous.moth_ele_list;
            combined.append(&mut usage.moth_ele_list);
            usage.moth_ele_list = combined;
        }

        info!("✅ Monthly usage fetched ({} entries)", usage.moth_ele_list.len());
        Ok(usage)
    }
}
