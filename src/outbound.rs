use crate::classifier::CallAnalysis;
use crate::config::Config;
use crate::event::CallEvent;
use crate::queue::{QueueItem, SyncSink};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::Duration;

/// Delivers queued tracking records to the spreadsheet ingestion endpoint.
pub struct SheetsSink {
    client: Client,
    url: String,
}

impl SheetsSink {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .context("build sheets http client")?;

        Ok(Self {
            client,
            url: config.sheets_webhook_url.clone(),
        })
    }
}

#[async_trait]
impl SyncSink for SheetsSink {
    async fn deliver(&self, item: &QueueItem) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&item.payload)
            .send()
            .await
            .context("post tracking record to sheets endpoint")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("sheets endpoint returned {status}"));
        }

        Ok(())
    }
}

/// Flattened call-tracking record for the spreadsheet store. One row per
/// lifecycle event.
pub fn tracking_record(event: &CallEvent, analysis: Option<&CallAnalysis>) -> Value {
    let mut record = json!({
        "callId": event.call_id,
        "correlationId": event.correlation_id,
        "eventType": event.event_type.as_str(),
        "phone": event.phone,
        "agentId": event.agent_id,
        "synthesizedId": event.synthesized_id,
        "recordedAt": chrono::Utc::now().to_rfc3339(),
    });

    if let Some(analysis) = analysis {
        record["outcome"] = json!({
            "missed": analysis.missed,
            "status": analysis.status,
            "talkingTime": analysis.talking_time,
            "totalTime": analysis.total_time,
            "direction": analysis.direction,
            "recorded": analysis.recorded,
            "fromAnalytics": analysis.from_analytics,
        });
    }

    record
}

/// Fixed payload shape the CRM automation webhook expects for a missed call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissedCallNotification {
    pub call_id: String,
    pub correlation_id: String,
    pub phone: Option<String>,
    pub agent_id: Option<String>,
    pub attempt_count: Option<u32>,
    pub analytics: Value,
}

#[async_trait]
pub trait AutomationApi: Send + Sync {
    async fn notify_missed_call(&self, notification: &MissedCallNotification) -> Result<()>;
}

pub struct HttpAutomationClient {
    client: Client,
    url: String,
}

impl HttpAutomationClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .context("build automation http client")?;

        Ok(Self {
            client,
            url: config.automation_webhook_url.clone(),
        })
    }
}

#[async_trait]
impl AutomationApi for HttpAutomationClient {
    async fn notify_missed_call(&self, notification: &MissedCallNotification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .context("post missed-call notification to automation webhook")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("automation webhook returned {status}"));
        }

        Ok(())
    }
}

pub fn analytics_snapshot(analysis: &CallAnalysis) -> Value {
    json!({
        "status": analysis.status,
        "talkingTime": analysis.talking_time,
        "totalTime": analysis.total_time,
        "direction": analysis.direction,
        "recorded": analysis.recorded,
        "fromAnalytics": analysis.from_analytics,
        "failureReason": analysis.failure_reason,
    })
}
