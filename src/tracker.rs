use crate::crm::CrmApi;
use crate::lifecycle::{self, LeadTag};
use crate::phone;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one attempt-tracking pass. The attempt increment and the tag
/// replacement are two independent remote writes with independent results;
/// there is no rollback between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptReport {
    /// No contact matched the normalized phone number. Soft outcome: the
    /// caller logs it and moves on, since redelivery would not help.
    ContactNotFound { normalized_phone: String },
    Advanced {
        contact_id: String,
        previous_attempts: u32,
        new_attempts: u32,
        tag: LeadTag,
        /// None when no threshold was crossed, Some(true) when the tag set
        /// was replaced, Some(false) when the replacement call failed.
        tag_updated: Option<bool>,
    },
}

/// Drives the per-contact attempt counter and lead tag against the CRM.
pub struct AttemptTracker {
    crm: Arc<dyn CrmApi>,
}

impl AttemptTracker {
    pub fn new(crm: Arc<dyn CrmApi>) -> Self {
        Self { crm }
    }

    /// Increments the contact's attempt counter and replaces its lifecycle
    /// tag when a stage threshold is crossed.
    ///
    /// Errors from the contact lookup, field read, or field write propagate
    /// so the webhook handler can answer with a retryable failure. A failed
    /// tag replacement after a committed increment is logged and reported,
    /// not propagated: the increment already happened and must stand.
    pub async fn record_attempt(&self, raw_phone: &str, correlation_id: &str) -> Result<AttemptReport> {
        let normalized = phone::normalize(raw_phone);

        let Some(contact) = self
            .crm
            .find_contact_by_phone(&normalized)
            .await
            .context("locate contact for attempt tracking")?
        else {
            warn!(
                correlation_id,
                phone = %normalized,
                "no crm contact matches phone; skipping attempt tracking"
            );
            return Ok(AttemptReport::ContactNotFound {
                normalized_phone: normalized,
            });
        };

        let previous_attempts = self
            .crm
            .read_attempt_count(&contact.id)
            .await
            .context("read current attempt count")?;

        let advanced = lifecycle::advance(previous_attempts);

        self.crm
            .write_attempt_count(&contact.id, advanced.new_attempts)
            .await
            .context("persist incremented attempt count")?;

        let tag_updated = match advanced.tag_change {
            None => None,
            Some(tag) => {
                let replacement = vec![tag.as_str().to_string()];
                match self.crm.replace_tags(&contact.id, &replacement).await {
                    Ok(()) => {
                        info!(
                            correlation_id,
                            contact_id = %contact.id,
                            tag = tag.as_str(),
                            attempts = advanced.new_attempts,
                            "contact advanced to new lifecycle stage"
                        );
                        Some(true)
                    }
                    Err(error) => {
                        // Attempt count already committed; report the partial
                        // failure instead of unwinding.
                        warn!(
                            correlation_id,
                            contact_id = %contact.id,
                            tag = tag.as_str(),
                            error = %error,
                            "tag replacement failed after attempt count was written"
                        );
                        Some(false)
                    }
                }
            }
        };

        Ok(AttemptReport::Advanced {
            contact_id: contact.id,
            previous_attempts,
            new_attempts: advanced.new_attempts,
            tag: advanced.tag,
            tag_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::CrmContact;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCrm {
        contact: Option<CrmContact>,
        attempts: Mutex<u32>,
        tags: Mutex<Vec<String>>,
        fail_tag_update: bool,
        fail_attempt_write: bool,
        tag_calls: Mutex<u32>,
    }

    #[async_trait]
    impl CrmApi for FakeCrm {
        async fn find_contact_by_phone(&self, _phone: &str) -> Result<Option<CrmContact>> {
            Ok(self.contact.clone())
        }

        async fn read_attempt_count(&self, _contact_id: &str) -> Result<u32> {
            Ok(*self.attempts.lock().expect("attempts lock"))
        }

        async fn write_attempt_count(&self, _contact_id: &str, attempts: u32) -> Result<()> {
            if self.fail_attempt_write {
                return Err(anyhow!("crm field write returned 503"));
            }
            *self.attempts.lock().expect("attempts lock") = attempts;
            Ok(())
        }

        async fn replace_tags(&self, _contact_id: &str, tags: &[String]) -> Result<()> {
            *self.tag_calls.lock().expect("tag calls lock") += 1;
            if self.fail_tag_update {
                return Err(anyhow!("crm tag replacement returned 500"));
            }
            *self.tags.lock().expect("tags lock") = tags.to_vec();
            Ok(())
        }
    }

    fn contact() -> Option<CrmContact> {
        Some(CrmContact {
            id: "contact-9".to_string(),
            phone: Some("+15551234567".to_string()),
        })
    }

    #[tokio::test]
    async fn first_attempt_writes_count_and_new_lead_tag() {
        let crm = Arc::new(FakeCrm {
            contact: contact(),
            ..FakeCrm::default()
        });
        let tracker = AttemptTracker::new(crm.clone());

        let report = tracker
            .record_attempt("5551234567", "corr-1")
            .await
            .expect("record attempt");

        assert_eq!(
            report,
            AttemptReport::Advanced {
                contact_id: "contact-9".to_string(),
                previous_attempts: 0,
                new_attempts: 1,
                tag: LeadTag::NewLead,
                tag_updated: Some(true),
            }
        );
        assert_eq!(*crm.attempts.lock().expect("attempts"), 1);
        assert_eq!(
            *crm.tags.lock().expect("tags"),
            vec!["new-lead".to_string()]
        );
    }

    #[tokio::test]
    async fn mid_stage_attempt_skips_tag_replacement() {
        let crm = Arc::new(FakeCrm {
            contact: contact(),
            attempts: Mutex::new(4),
            ..FakeCrm::default()
        });
        let tracker = AttemptTracker::new(crm.clone());

        let report = tracker
            .record_attempt("+15551234567", "corr-2")
            .await
            .expect("record attempt");

        match report {
            AttemptReport::Advanced {
                new_attempts,
                tag_updated,
                ..
            } => {
                assert_eq!(new_attempts, 5);
                assert_eq!(tag_updated, None);
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert_eq!(*crm.tag_calls.lock().expect("tag calls"), 0);
    }

    #[tokio::test]
    async fn tag_failure_keeps_attempt_increment() {
        let crm = Arc::new(FakeCrm {
            contact: contact(),
            attempts: Mutex::new(2),
            fail_tag_update: true,
            ..FakeCrm::default()
        });
        let tracker = AttemptTracker::new(crm.clone());

        let report = tracker
            .record_attempt("+15551234567", "corr-3")
            .await
            .expect("partial failure still succeeds");

        match report {
            AttemptReport::Advanced {
                new_attempts,
                tag,
                tag_updated,
                ..
            } => {
                assert_eq!(new_attempts, 3);
                assert_eq!(tag, LeadTag::FollowUp);
                assert_eq!(tag_updated, Some(false));
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert_eq!(*crm.attempts.lock().expect("attempts"), 3);
    }

    #[tokio::test]
    async fn attempt_write_failure_propagates() {
        let crm = Arc::new(FakeCrm {
            contact: contact(),
            fail_attempt_write: true,
            ..FakeCrm::default()
        });
        let tracker = AttemptTracker::new(crm);

        assert!(tracker.record_attempt("+15551234567", "corr-4").await.is_err());
    }

    #[tokio::test]
    async fn missing_contact_is_soft_outcome() {
        let tracker = AttemptTracker::new(Arc::new(FakeCrm::default()));

        let report = tracker
            .record_attempt("5551234567", "corr-5")
            .await
            .expect("soft outcome");

        assert_eq!(
            report,
            AttemptReport::ContactNotFound {
                normalized_phone: "+5551234567".to_string()
            }
        );
    }
}
