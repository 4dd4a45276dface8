use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct CrmContact {
    pub id: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// The CRM operations the pipeline depends on. The CRM is the system of
/// record for the attempt counter; the pipeline keeps no local copy.
#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<CrmContact>>;

    async fn read_attempt_count(&self, contact_id: &str) -> Result<u32>;

    async fn write_attempt_count(&self, contact_id: &str, attempts: u32) -> Result<()>;

    /// Replaces the contact's entire tag set. Full replacement keeps at most
    /// one lifecycle tag on the contact; merging would accumulate stale tags.
    async fn replace_tags(&self, contact_id: &str, tags: &[String]) -> Result<()>;
}

pub struct HttpCrmClient {
    client: Client,
    base_url: String,
    api_key: String,
    attempts_field: String,
}

#[derive(Debug, Deserialize)]
struct ContactSearchResponse {
    #[serde(default)]
    contacts: Vec<CrmContact>,
}

#[derive(Debug, Deserialize)]
struct CustomFieldResponse {
    #[serde(default)]
    value: Option<serde_json::Value>,
}

impl HttpCrmClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .context("build crm http client")?;

        Ok(Self {
            client,
            base_url: config.crm_base_url.trim_end_matches('/').to_string(),
            api_key: config.crm_api_key.clone(),
            attempts_field: config.crm_attempts_field.clone(),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Bearer {}", self.api_key))
    }
}

#[async_trait]
impl CrmApi for HttpCrmClient {
    async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<CrmContact>> {
        let url = format!("{}/contacts/search", self.base_url);
        let response = self
            .authorized(self.client.get(&url).query(&[("phone", phone)]))
            .send()
            .await
            .context("search crm contact by phone")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("crm contact search returned {status}"));
        }

        let body: ContactSearchResponse = response
            .json()
            .await
            .context("decode crm contact search response")?;

        Ok(body.contacts.into_iter().next())
    }

    async fn read_attempt_count(&self, contact_id: &str) -> Result<u32> {
        let url = format!(
            "{}/contacts/{contact_id}/fields/{}",
            self.base_url, self.attempts_field
        );
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .context("read crm attempt count field")?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Field never written: the contact has no recorded attempts yet.
            return Ok(0);
        }
        if !status.is_success() {
            return Err(anyhow!("crm field read returned {status}"));
        }

        let body: CustomFieldResponse = response
            .json()
            .await
            .context("decode crm custom field response")?;

        Ok(parse_attempt_value(body.value.as_ref()))
    }

    async fn write_attempt_count(&self, contact_id: &str, attempts: u32) -> Result<()> {
        let url = format!(
            "{}/contacts/{contact_id}/fields/{}",
            self.base_url, self.attempts_field
        );
        let response = self
            .authorized(self.client.put(&url).json(&json!({ "value": attempts })))
            .send()
            .await
            .context("write crm attempt count field")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("crm field write returned {status}"));
        }

        Ok(())
    }

    async fn replace_tags(&self, contact_id: &str, tags: &[String]) -> Result<()> {
        let url = format!("{}/contacts/{contact_id}/tags", self.base_url);
        let response = self
            .authorized(self.client.put(&url).json(&json!({ "tags": tags })))
            .send()
            .await
            .context("replace crm contact tags")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("crm tag replacement returned {status}"));
        }

        Ok(())
    }
}

/// Custom fields come back as whatever type the CRM stored: number, numeric
/// string, or null.
fn parse_attempt_value(value: Option<&serde_json::Value>) -> u32 {
    let Some(value) = value else {
        return 0;
    };

    if let Some(number) = value.as_u64() {
        return u32::try_from(number).unwrap_or(u32::MAX);
    }

    value
        .as_str()
        .and_then(|text| text.trim().parse::<u32>().ok())
        .unwrap_or(0)
}
