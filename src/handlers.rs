use crate::classifier::OutcomeClassifier;
use crate::dedupe::{DedupeCache, DedupeDecision};
use crate::event::{self, EventType};
use crate::outbound::{self, AutomationApi, MissedCallNotification};
use crate::queue::SyncQueue;
use crate::tracker::{AttemptReport, AttemptTracker};
use axum::http::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, warn};

const CALL_ENDED_TRACKING_PRIORITY: u8 = 1;
const CALL_STARTED_TRACKING_PRIORITY: u8 = 2;
const AUXILIARY_TRACKING_PRIORITY: u8 = 3;

/// Everything a webhook handler composes: dedup cache, outcome classifier,
/// attempt tracker, automation webhook client, and the outbound sync queue.
/// Owns no global state; tests build isolated pipelines from fakes.
pub struct Pipeline {
    pub dedupe: DedupeCache,
    pub classifier: OutcomeClassifier,
    pub tracker: AttemptTracker,
    pub automation: Arc<dyn AutomationApi>,
    pub queue: Arc<SyncQueue>,
}

pub struct HandlerResponse {
    pub status: StatusCode,
    pub body: Value,
}

fn ok(body: Value) -> HandlerResponse {
    HandlerResponse {
        status: StatusCode::OK,
        body,
    }
}

fn bad_request(message: &str) -> HandlerResponse {
    HandlerResponse {
        status: StatusCode::BAD_REQUEST,
        body: json!({"success": false, "error": message}),
    }
}

fn retryable_failure(message: String) -> HandlerResponse {
    HandlerResponse {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: json!({"success": false, "retryable": true, "error": message}),
    }
}

impl Pipeline {
    /// call-started: validate, atomically dedupe, push a tracking-only
    /// record. Never touches the CRM automation webhook or the attempt
    /// counter.
    pub async fn handle_call_started(&self, payload: Value, now_epoch: i64) -> HandlerResponse {
        let validated = match event::validate(payload, EventType::CallStarted, now_epoch) {
            Ok(validated) => validated,
            Err(failure) => return bad_request(failure.message()),
        };
        let event = validated.event;

        if self
            .dedupe
            .check_and_mark(&event.call_id, EventType::CallStarted, now_epoch)
            == DedupeDecision::Duplicate
        {
            info!(
                call_id = %event.call_id,
                correlation_id = %event.correlation_id,
                "duplicate call-started delivery ignored"
            );
            return ok(json!({
                "success": true,
                "duplicate": true,
                "callId": event.call_id,
            }));
        }

        let queue_item_id = self.queue.enqueue(
            outbound::tracking_record(&event, None),
            "call-tracking",
            CALL_STARTED_TRACKING_PRIORITY,
        );

        info!(
            call_id = %event.call_id,
            correlation_id = %event.correlation_id,
            queue_item_id = %queue_item_id,
            "call-started tracked"
        );

        ok(json!({
            "success": true,
            "duplicate": false,
            "callId": event.call_id,
            "correlationId": event.correlation_id,
            "warnings": validated.warnings,
            "googleSheetsTracking": {"success": true, "queued": true, "queueItemId": queue_item_id},
        }))
    }

    /// call-ended: validate, dedupe-check, classify, advance the attempt
    /// counter, notify automation for missed calls, queue the tracking
    /// record, and only then mark the event processed. A tracker error
    /// leaves the event unmarked so the source's redelivery retries the
    /// whole unit of work.
    pub async fn handle_call_ended(&self, payload: Value, now_epoch: i64) -> HandlerResponse {
        let validated = match event::validate(payload, EventType::CallEnded, now_epoch) {
            Ok(validated) => validated,
            Err(failure) => return bad_request(failure.message()),
        };
        let event = validated.event;

        if self
            .dedupe
            .is_processed(&event.call_id, EventType::CallEnded, now_epoch)
        {
            info!(
                call_id = %event.call_id,
                correlation_id = %event.correlation_id,
                "duplicate call-ended delivery ignored"
            );
            return ok(json!({
                "success": true,
                "duplicate": true,
                "callId": event.call_id,
            }));
        }

        let analysis = self
            .classifier
            .analyze(&event.call_id, event.talking_time)
            .await;

        let attempt_result = match &event.phone {
            Some(phone) => match self.tracker.record_attempt(phone, &event.correlation_id).await {
                Ok(report) => Some(report),
                Err(failure) => {
                    error!(
                        call_id = %event.call_id,
                        correlation_id = %event.correlation_id,
                        error = %failure,
                        "attempt tracking failed; answering retryable so the event is redelivered"
                    );
                    return retryable_failure(format!("attempt tracking failed: {failure}"));
                }
            },
            None => {
                warn!(
                    call_id = %event.call_id,
                    correlation_id = %event.correlation_id,
                    "call-ended event has no phone number; attempt tracking skipped"
                );
                None
            }
        };

        let attempt_count = match &attempt_result {
            Some(AttemptReport::Advanced { new_attempts, .. }) => Some(*new_attempts),
            _ => None,
        };

        let automation_result = if analysis.missed {
            let notification = MissedCallNotification {
                call_id: event.call_id.clone(),
                correlation_id: event.correlation_id.clone(),
                phone: event.phone.clone(),
                agent_id: event.agent_id.clone(),
                attempt_count,
                analytics: outbound::analytics_snapshot(&analysis),
            };
            match self.automation.notify_missed_call(&notification).await {
                Ok(()) => json!({"success": true, "skipped": false}),
                Err(failure) => {
                    warn!(
                        call_id = %event.call_id,
                        correlation_id = %event.correlation_id,
                        error = %failure,
                        "missed-call automation webhook failed"
                    );
                    json!({"success": false, "skipped": false, "error": failure.to_string()})
                }
            }
        } else {
            json!({"success": true, "skipped": true})
        };

        let queue_item_id = self.queue.enqueue(
            outbound::tracking_record(&event, Some(&analysis)),
            "call-tracking",
            CALL_ENDED_TRACKING_PRIORITY,
        );

        self.dedupe
            .mark_processed(&event.call_id, EventType::CallEnded, now_epoch);

        info!(
            call_id = %event.call_id,
            correlation_id = %event.correlation_id,
            missed = analysis.missed,
            from_analytics = analysis.from_analytics,
            "call-ended processed"
        );

        ok(json!({
            "success": true,
            "duplicate": false,
            "callId": event.call_id,
            "correlationId": event.correlation_id,
            "warnings": validated.warnings,
            "outcome": {
                "missed": analysis.missed,
                "status": analysis.status,
                "fromAnalytics": analysis.from_analytics,
            },
            "attemptTracking": attempt_tracking_json(attempt_result.as_ref()),
            "campaignAutomation": automation_result,
            "googleSheetsTracking": {"success": true, "queued": true, "queueItemId": queue_item_id},
        }))
    }

    /// Auxiliary event types (tag-created, contact-updated, note-added):
    /// structurally identical to call-started, no state machine involvement.
    pub async fn handle_auxiliary(
        &self,
        event_type: EventType,
        payload: Value,
        now_epoch: i64,
    ) -> HandlerResponse {
        let validated = match event::validate(payload, event_type, now_epoch) {
            Ok(validated) => validated,
            Err(failure) => return bad_request(failure.message()),
        };
        let event = validated.event;

        if self
            .dedupe
            .check_and_mark(&event.call_id, event_type, now_epoch)
            == DedupeDecision::Duplicate
        {
            return ok(json!({
                "success": true,
                "duplicate": true,
                "callId": event.call_id,
            }));
        }

        let queue_item_id = self.queue.enqueue(
            outbound::tracking_record(&event, None),
            event_type.as_str(),
            AUXILIARY_TRACKING_PRIORITY,
        );

        ok(json!({
            "success": true,
            "duplicate": false,
            "callId": event.call_id,
            "correlationId": event.correlation_id,
            "googleSheetsTracking": {"success": true, "queued": true, "queueItemId": queue_item_id},
        }))
    }
}

fn attempt_tracking_json(report: Option<&AttemptReport>) -> Value {
    match report {
        None => json!({"success": false, "skipped": true}),
        Some(AttemptReport::ContactNotFound { normalized_phone }) => json!({
            "success": false,
            "skipped": false,
            "contactFound": false,
            "phone": normalized_phone,
        }),
        Some(AttemptReport::Advanced {
            contact_id,
            previous_attempts,
            new_attempts,
            tag,
            tag_updated,
        }) => json!({
            "success": true,
            "skipped": false,
            "contactFound": true,
            "contactId": contact_id,
            "previousAttempts": previous_attempts,
            "newAttempts": new_attempts,
            "tag": tag.as_str(),
            "tagUpdated": tag_updated,
        }),
    }
}
