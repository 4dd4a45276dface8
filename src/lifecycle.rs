use serde::{Deserialize, Serialize};

/// Lead-qualification stage derived purely from the attempt count. A contact
/// holds exactly one of these at a time; updates replace the whole tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeadTag {
    NewLead,
    FollowUp,
    NoResponse,
}

impl LeadTag {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadTag::NewLead => "new-lead",
            LeadTag::FollowUp => "follow-up",
            LeadTag::NoResponse => "no-response",
        }
    }
}

/// Result of advancing the attempt counter by one processed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub new_attempts: u32,
    pub tag: LeadTag,
    /// Set only when the new count lands in a different stage than the old
    /// one did, i.e. the contact's tag set must be replaced.
    pub tag_change: Option<LeadTag>,
}

/// Stage for a given attempt count. Zero attempts means the pipeline has
/// never touched the contact and no stage applies yet.
pub fn tag_for_attempts(attempts: u32) -> Option<LeadTag> {
    match attempts {
        0 => None,
        1..=2 => Some(LeadTag::NewLead),
        3..=9 => Some(LeadTag::FollowUp),
        _ => Some(LeadTag::NoResponse),
    }
}

pub fn advance(current_attempts: u32) -> Advance {
    let new_attempts = current_attempts.saturating_add(1);
    let tag = tag_for_attempts(new_attempts)
        .unwrap_or(LeadTag::NewLead);

    let tag_change = if tag_for_attempts(new_attempts) != tag_for_attempts(current_attempts) {
        Some(tag)
    } else {
        None
    };

    Advance {
        new_attempts,
        tag,
        tag_change,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_table_matches_ranges() {
        assert_eq!(tag_for_attempts(0), None);
        assert_eq!(tag_for_attempts(1), Some(LeadTag::NewLead));
        assert_eq!(tag_for_attempts(2), Some(LeadTag::NewLead));
        assert_eq!(tag_for_attempts(3), Some(LeadTag::FollowUp));
        assert_eq!(tag_for_attempts(9), Some(LeadTag::FollowUp));
        assert_eq!(tag_for_attempts(10), Some(LeadTag::NoResponse));
        assert_eq!(tag_for_attempts(250), Some(LeadTag::NoResponse));
    }

    #[test]
    fn advance_always_increments_by_one() {
        for current in 0..20 {
            assert_eq!(advance(current).new_attempts, current + 1);
        }
    }

    #[test]
    fn first_attempt_assigns_new_lead() {
        let advanced = advance(0);
        assert_eq!(advanced.new_attempts, 1);
        assert_eq!(advanced.tag, LeadTag::NewLead);
        assert_eq!(advanced.tag_change, Some(LeadTag::NewLead));
    }

    #[test]
    fn tag_changes_only_at_threshold_crossings() {
        for current in 1..30 {
            let advanced = advance(current);
            match advanced.new_attempts {
                3 => assert_eq!(advanced.tag_change, Some(LeadTag::FollowUp)),
                10 => assert_eq!(advanced.tag_change, Some(LeadTag::NoResponse)),
                _ => assert_eq!(
                    advanced.tag_change, None,
                    "unexpected tag change at {}",
                    advanced.new_attempts
                ),
            }
        }
    }

    #[test]
    fn tag_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&LeadTag::NewLead).expect("serialize"),
            "\"new-lead\""
        );
        assert_eq!(LeadTag::NoResponse.as_str(), "no-response");
    }
}
