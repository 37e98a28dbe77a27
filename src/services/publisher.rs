use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MqttConfig;
use crate::constants::mqtt;
use crate::error::PublishError;
use crate::models::{BalanceSnapshot, DailySample, MonthlySample, MonthlyUsage};

/// One retained message per meter
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeterPayload {
    #[serde(flatten)]
    pub balance: BalanceSnapshot,
    pub day_list: Vec<DailySample>,
    pub month_list: Vec<MonthlySample>,
    pub total_ele_num: Value,
    pub total_ele_cost: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    Disabled,
    NoHost,
}

fn total_or_zero(value: Option<&String>) -> Value {
    match value {
        Some(total) if !total.is_empty() => json!(total),
        _ => json!(0),
    }
}

/// Balance fields plus the readable daily and monthly series
pub fn build_payload(
    balance: &BalanceSnapshot,
    daily: &[DailySample],
    monthly: &MonthlyUsage,
) -> MeterPayload {
    let totals = monthly.data_info.as_ref();
    MeterPayload {
        balance: balance.clone(),
        day_list: daily
            .iter()
            .filter(|sample| !sample.is_no_reading())
            .cloned()
            .collect(),
        month_list: monthly.samples(),
        total_ele_num: total_or_zero(totals.and_then(|t| t.total_ele_num.as_ref())),
        total_ele_cost: total_or_zero(totals.and_then(|t| t.total_ele_cost.as_ref())),
    }
}

/// Short-lived MQTT publisher: connect, publish retained, linger, disconnect
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    config: MqttConfig,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    pub fn topic(&self, meter_id: &str) -> String {
        format!("{}/{}", self.config.topic_prefix, meter_id)
    }

    fn options(&self, host: &str) -> MqttOptions {
        let client_id = format!("{}{}", mqtt::CLIENT_ID_PREFIX, Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, host, self.config.port);
        options.set_keep_alive(Duration::from_secs(mqtt::KEEP_ALIVE_SECS));
        options.set_clean_session(true);
        if let Some(username) = &self.config.username {
            options.set_credentials(
                username.clone(),
                self.config.password.clone().unwrap_or_default(),
            );
        }
        options
    }

    pub async fn publish(
        &self,
        meter_id: &str,
        payload: &MeterPayload,
    ) -> Result<PublishOutcome, PublishError> {
        if !self.config.enabled {
            info!("MQTT disabled, skipping publish");
            return Ok(PublishOutcome::Disabled);
        }
        let Some(host) = self.config.host.as_deref() else {
            warn!("MQTT host not configured, skipping publish");
            return Ok(PublishOutcome::NoHost);
        };

        let topic = self.topic(meter_id);
        let body = serde_json::to_vec(payload)?;
        let (client, mut eventloop) =
            AsyncClient::new(self.options(host), mqtt::CHANNEL_CAPACITY);

        client
            .publish(topic.as_str(), QoS::AtMostOnce, true, body)
            .await?;

        let connect_timeout = Duration::from_millis(mqtt::CONNECT_TIMEOUT_MS);
        tokio::time::timeout(
            connect_timeout,
            poll_until(&mut eventloop, |event| {
                matches!(event, Event::Outgoing(Outgoing::Publish(_)))
            }),
        )
        .await
        .map_err(|_| PublishError::Timeout(connect_timeout))??;
        info!("✅ Published to {}", topic);

        // post-publish linger
        let drain = Duration::from_millis(mqtt::DRAIN_INTERVAL_MS);
        if let Ok(Err(e)) = tokio::time::timeout(
            drain,
            poll_until(&mut eventloop, |_| false),
        )
        .await
        {
            debug!("MQTT event loop ended while draining: {}", e);
        }

        client.disconnect().await?;
        match tokio::time::timeout(
            drain,
            poll_until(&mut eventloop, |event| {
                matches!(event, Event::Outgoing(Outgoing::Disconnect))
            }),
        )
        .await
        {
            Ok(Ok(())) => debug!("MQTT disconnected"),
            Ok(Err(e)) => debug!("MQTT event loop ended while disconnecting: {}", e),
            Err(_) => debug!("MQTT disconnect not flushed within {:?}", drain),
        }

        Ok(PublishOutcome::Published)
    }
}

async fn poll_until<F>(eventloop: &mut EventLoop, done: F) -> Result<(), PublishError>
where
    F: Fn(&Event) -> bool,
{
    loop {
        let event = eventloop.poll().await?;
        if let Event::Incoming(Packet::ConnAck(_)) = &event {
            debug!("MQTT connected");
        }
        if done(&event) {
            return Ok(());
        }
    }
}
