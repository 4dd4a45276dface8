use serde_json::Value;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

/// Window used when synthesizing a call id from phone + agent, so repeated
/// deliveries of the same malformed event land on the same dedup key.
const SYNTHESIS_BUCKET_SECONDS: i64 = 300;

const CALL_ID_FIELDS: &[&str] = &["call_id", "callId", "call_uuid", "id"];
const PHONE_FIELDS: &[&str] = &["phone_number", "phone", "caller_number", "client_number"];
const AGENT_FIELDS: &[&str] = &["agent_id", "agent", "user_id"];
const TALK_TIME_FIELDS: &[&str] = &["talking_time", "talk_time"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    CallStarted,
    CallEnded,
    TagCreated,
    ContactUpdated,
    NoteAdded,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::CallStarted => "call-started",
            EventType::CallEnded => "call-ended",
            EventType::TagCreated => "tag-created",
            EventType::ContactUpdated => "contact-updated",
            EventType::NoteAdded => "note-added",
        }
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "call-started" => Ok(EventType::CallStarted),
            "call-ended" => Ok(EventType::CallEnded),
            "tag-created" => Ok(EventType::TagCreated),
            "contact-updated" => Ok(EventType::ContactUpdated),
            "note-added" => Ok(EventType::NoteAdded),
            _ => Err(()),
        }
    }
}

/// An inbound webhook event after validation: the call id is guaranteed
/// non-empty and a correlation id is attached for log tracing.
#[derive(Debug, Clone)]
pub struct CallEvent {
    pub event_type: EventType,
    pub call_id: String,
    pub correlation_id: String,
    pub phone: Option<String>,
    pub agent_id: Option<String>,
    pub talking_time: Option<u64>,
    pub synthesized_id: bool,
    pub payload: Value,
}

#[derive(Debug)]
pub struct Validated {
    pub event: CallEvent,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// No call id, no phone, no agent: nothing identifies the contact.
    NoContactIdentity,
    NotAnObject,
}

impl ValidationFailure {
    pub fn message(&self) -> &'static str {
        match self {
            ValidationFailure::NoContactIdentity => {
                "payload carries no call id, phone number, or agent id"
            }
            ValidationFailure::NotAnObject => "payload must be a JSON object",
        }
    }
}

/// Normalizes a raw webhook payload into a [`CallEvent`].
///
/// Missing call ids are synthesized deterministically from the phone number,
/// agent id, and a coarse time bucket. The synthesis can collide across
/// distinct calls sharing a bucket, or split one logical call across two ids
/// when its started and ended events straddle a bucket boundary; both are
/// accepted as the cost of keeping malformed redeliveries deduplicable.
pub fn validate(payload: Value, event_type: EventType, now_epoch: i64) -> Result<Validated, ValidationFailure> {
    if !payload.is_object() {
        return Err(ValidationFailure::NotAnObject);
    }

    let mut warnings = Vec::new();

    let phone = first_string_field(&payload, PHONE_FIELDS);
    let agent_id = first_string_field(&payload, AGENT_FIELDS);
    let talking_time = first_u64_field(&payload, TALK_TIME_FIELDS);

    let (call_id, synthesized_id) = match first_string_field(&payload, CALL_ID_FIELDS) {
        Some(id) => (id, false),
        None => {
            if phone.is_none() && agent_id.is_none() {
                return Err(ValidationFailure::NoContactIdentity);
            }

            let id = synthesize_call_id(
                phone.as_deref(),
                agent_id.as_deref(),
                now_epoch,
            );
            warn!(
                event_type = event_type.as_str(),
                synthesized_id = %id,
                "payload carried no call id; synthesized one from phone/agent/time"
            );
            warnings.push(format!("call id missing; synthesized {id}"));
            (id, true)
        }
    };

    if phone.is_none() {
        warnings.push("no phone number field recognized".to_string());
    }

    Ok(Validated {
        event: CallEvent {
            event_type,
            call_id,
            correlation_id: Uuid::new_v4().to_string(),
            phone,
            agent_id,
            talking_time,
            synthesized_id,
            payload,
        },
        warnings,
    })
}

fn synthesize_call_id(phone: Option<&str>, agent_id: Option<&str>, now_epoch: i64) -> String {
    let bucket = now_epoch / SYNTHESIS_BUCKET_SECONDS;
    format!(
        "synth-{}-{}-{bucket}",
        phone.unwrap_or("nophone"),
        agent_id.unwrap_or("noagent"),
    )
}

fn first_string_field(payload: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        payload
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    })
}

fn first_u64_field(payload: &Value, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| {
        let value = payload.get(name)?;
        if let Some(number) = value.as_u64() {
            return Some(number);
        }
        value.as_str().and_then(|text| text.trim().parse::<u64>().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_existing_call_id() {
        let payload = json!({"call_id": "abc-123", "phone_number": "+15551234567"});
        let validated = validate(payload, EventType::CallEnded, 1_700_000_000).expect("valid");

        assert_eq!(validated.event.call_id, "abc-123");
        assert!(!validated.event.synthesized_id);
        assert!(validated.warnings.is_empty());
    }

    #[test]
    fn recognizes_alternate_id_fields() {
        let payload = json!({"callId": "xyz", "phone": "+15551234567"});
        let validated = validate(payload, EventType::CallStarted, 1_700_000_000).expect("valid");
        assert_eq!(validated.event.call_id, "xyz");
    }

    #[test]
    fn synthesized_id_is_deterministic_for_identical_payloads() {
        let payload = json!({"phone_number": "+15551234567", "agent_id": "agent-7"});
        let first =
            validate(payload.clone(), EventType::CallEnded, 1_700_000_010).expect("valid");
        let second = validate(payload, EventType::CallEnded, 1_700_000_020).expect("valid");

        assert!(first.event.synthesized_id);
        assert_eq!(first.event.call_id, second.event.call_id);
        assert_eq!(first.warnings.len(), 1);
    }

    #[test]
    fn synthesized_id_changes_across_time_buckets() {
        let payload = json!({"phone_number": "+15551234567", "agent_id": "agent-7"});
        let first =
            validate(payload.clone(), EventType::CallEnded, 1_700_000_000).expect("valid");
        let second = validate(payload, EventType::CallEnded, 1_700_000_400).expect("valid");

        assert_ne!(first.event.call_id, second.event.call_id);
    }

    #[test]
    fn rejects_payload_with_no_contact_identity() {
        let payload = json!({"direction": "inbound"});
        assert_eq!(
            validate(payload, EventType::CallEnded, 1_700_000_000).unwrap_err(),
            ValidationFailure::NoContactIdentity
        );
    }

    #[test]
    fn rejects_non_object_payload() {
        assert_eq!(
            validate(json!([1, 2, 3]), EventType::CallEnded, 1_700_000_000).unwrap_err(),
            ValidationFailure::NotAnObject
        );
    }

    #[test]
    fn parses_talking_time_from_number_or_string() {
        let numeric = json!({"call_id": "a", "talking_time": 45});
        let validated = validate(numeric, EventType::CallEnded, 0).expect("valid");
        assert_eq!(validated.event.talking_time, Some(45));

        let text = json!({"call_id": "a", "talk_time": "45"});
        let validated = validate(text, EventType::CallEnded, 0).expect("valid");
        assert_eq!(validated.event.talking_time, Some(45));
    }

    #[test]
    fn event_type_round_trips_from_str() {
        for event_type in [
            EventType::CallStarted,
            EventType::CallEnded,
            EventType::TagCreated,
            EventType::ContactUpdated,
            EventType::NoteAdded,
        ] {
            assert_eq!(event_type.as_str().parse::<EventType>(), Ok(event_type));
        }
        assert!("call-answered".parse::<EventType>().is_err());
    }
}
