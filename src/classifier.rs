use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::warn;

/// Status strings the analytics platform reports for unconnected calls.
const MISSED_STATUSES: &[&str] = &["missed", "no-answer", "busy", "failed", "rejected"];

/// One call record as returned by the telephony analytics service.
#[derive(Debug, Clone, Deserialize)]
pub struct CallRecord {
    pub status: String,
    #[serde(default)]
    pub talking_time: Option<u64>,
    #[serde(default)]
    pub total_time: Option<u64>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub recorded: bool,
}

/// Outcome of classifying one completed call. Never persisted; recomputed
/// for every call-ended event.
#[derive(Debug, Clone)]
pub struct CallAnalysis {
    pub missed: bool,
    pub status: String,
    pub talking_time: Option<u64>,
    pub total_time: Option<u64>,
    pub direction: Option<String>,
    pub recorded: bool,
    /// True when the authoritative analytics lookup supplied the answer,
    /// false when the talk-time heuristic had to stand in.
    pub from_analytics: bool,
    pub failure_reason: Option<String>,
}

#[async_trait]
pub trait AnalyticsApi: Send + Sync {
    async fn call_by_id(&self, call_id: &str) -> Result<CallRecord>;
}

pub struct HttpAnalyticsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpAnalyticsClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .context("build analytics http client")?;

        Ok(Self {
            client,
            base_url: config.analytics_base_url.trim_end_matches('/').to_string(),
            api_key: config.analytics_api_key.clone(),
        })
    }
}

#[async_trait]
impl AnalyticsApi for HttpAnalyticsClient {
    async fn call_by_id(&self, call_id: &str) -> Result<CallRecord> {
        let url = format!("{}/calls/{call_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .context("request call record from analytics")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("analytics returned {status} for call {call_id}"));
        }

        response
            .json::<CallRecord>()
            .await
            .context("decode analytics call record")
    }
}

pub struct OutcomeClassifier {
    analytics: Arc<dyn AnalyticsApi>,
}

impl OutcomeClassifier {
    pub fn new(analytics: Arc<dyn AnalyticsApi>) -> Self {
        Self { analytics }
    }

    /// Classifies a completed call, preferring the analytics record and
    /// degrading to the reported talk time when the lookup fails. Always
    /// returns an analysis; the two paths are distinguished by
    /// `from_analytics`.
    pub async fn analyze(&self, call_id: &str, reported_talk_time: Option<u64>) -> CallAnalysis {
        match self.analytics.call_by_id(call_id).await {
            Ok(record) => analysis_from_record(record),
            Err(error) => {
                warn!(
                    call_id,
                    error = %error,
                    "analytics lookup failed; falling back to talk-time heuristic"
                );
                fallback_analysis(reported_talk_time, error.to_string())
            }
        }
    }
}

pub fn is_missed_status(status: &str) -> bool {
    let status = status.trim().to_ascii_lowercase();
    MISSED_STATUSES.contains(&status.as_str())
}

fn analysis_from_record(record: CallRecord) -> CallAnalysis {
    CallAnalysis {
        missed: is_missed_status(&record.status),
        status: record.status,
        talking_time: record.talking_time,
        total_time: record.total_time,
        direction: record.direction,
        recorded: record.recorded,
        from_analytics: true,
        failure_reason: None,
    }
}

/// Heuristic used when analytics is unreachable: zero or absent talk time
/// means nobody answered.
pub fn fallback_analysis(reported_talk_time: Option<u64>, reason: String) -> CallAnalysis {
    let missed = reported_talk_time.unwrap_or(0) == 0;
    CallAnalysis {
        missed,
        status: if missed { "missed" } else { "answered" }.to_string(),
        talking_time: reported_talk_time,
        total_time: None,
        direction: None,
        recorded: false,
        from_analytics: false,
        failure_reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FixedAnalytics {
        record: CallRecord,
    }

    #[async_trait]
    impl AnalyticsApi for FixedAnalytics {
        async fn call_by_id(&self, _call_id: &str) -> Result<CallRecord> {
            Ok(self.record.clone())
        }
    }

    struct FailingAnalytics;

    #[async_trait]
    impl AnalyticsApi for FailingAnalytics {
        async fn call_by_id(&self, _call_id: &str) -> Result<CallRecord> {
            Err(anyhow!("connection refused"))
        }
    }

    #[test]
    fn missed_status_set_is_fixed() {
        for status in ["missed", "no-answer", "busy", "failed", "rejected"] {
            assert!(is_missed_status(status), "{status} should be missed");
        }
        assert!(is_missed_status(" Busy "));
        assert!(!is_missed_status("answered"));
        assert!(!is_missed_status("voicemail"));
    }

    #[test]
    fn fallback_marks_missed_iff_talk_time_zero_or_absent() {
        assert!(fallback_analysis(None, "down".to_string()).missed);
        assert!(fallback_analysis(Some(0), "down".to_string()).missed);
        assert!(!fallback_analysis(Some(45), "down".to_string()).missed);
    }

    #[tokio::test]
    async fn analyze_prefers_analytics_record() {
        let classifier = OutcomeClassifier::new(Arc::new(FixedAnalytics {
            record: CallRecord {
                status: "answered".to_string(),
                talking_time: Some(30),
                total_time: Some(42),
                direction: Some("inbound".to_string()),
                recorded: true,
            },
        }));

        // Reported talk time of zero would mean missed under the fallback;
        // the analytics record must win.
        let analysis = classifier.analyze("call-1", Some(0)).await;
        assert!(!analysis.missed);
        assert!(analysis.from_analytics);
        assert_eq!(analysis.total_time, Some(42));
        assert!(analysis.failure_reason.is_none());
    }

    #[tokio::test]
    async fn analyze_degrades_to_heuristic_on_lookup_failure() {
        let classifier = OutcomeClassifier::new(Arc::new(FailingAnalytics));

        let analysis = classifier.analyze("call-1", Some(0)).await;
        assert!(analysis.missed);
        assert!(!analysis.from_analytics);
        assert!(
            analysis
                .failure_reason
                .as_deref()
                .is_some_and(|reason| reason.contains("connection refused"))
        );

        let analysis = classifier.analyze("call-1", Some(45)).await;
        assert!(!analysis.missed);
        assert!(!analysis.from_analytics);
    }
}
