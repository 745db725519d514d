//! Monotonic merge rules for interaction attributes.

use std::cmp::Ordering;

use chrono::DateTime;

use super::{InteractionAttribute, InteractionAttributes, InteractionEvent};

/// Orders two timestamps by instant, falling back to text when either does
/// not parse.
fn compare_timestamps(left: &str, right: &str) -> Ordering {
    let parsed = (
        DateTime::parse_from_rfc3339(left).map(|dt| dt.timestamp_millis()),
        DateTime::parse_from_rfc3339(right).map(|dt| dt.timestamp_millis()),
    );
    match parsed {
        (Ok(l), Ok(r)) => l.cmp(&r),
        _ => left.cmp(right),
    }
}

/// Whether writing `value` would move `attribute` forward.
pub fn is_forward_change(
    attributes: &InteractionAttributes,
    attribute: InteractionAttribute,
    value: &str,
) -> bool {
    match attributes.get(attribute) {
        None => true,
        Some(current) => {
            let order = compare_timestamps(value, current);
            if attribute.keeps_earliest() {
                order == Ordering::Less
            } else {
                order == Ordering::Greater
            }
        }
    }
}

/// Applies `value` if it is a forward change. Returns whether it was applied.
pub fn merge_attribute(
    attributes: &mut InteractionAttributes,
    attribute: InteractionAttribute,
    value: &str,
) -> bool {
    if !is_forward_change(attributes, attribute, value) {
        return false;
    }
    attributes.set(attribute, value.to_string());
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub attributes: InteractionAttributes,
    /// Still ahead of the server; stay pending.
    pub kept: Vec<InteractionEvent>,
    /// Acknowledged or overtaken by the server; drop.
    pub pruned: Vec<InteractionEvent>,
}

/// Replays pending local events on top of a server snapshot.
pub fn reconcile(server: &InteractionAttributes, pending: Vec<InteractionEvent>) -> Reconciliation {
    let mut attributes = server.clone();
    let mut kept = Vec::new();
    let mut pruned = Vec::new();

    for event in pending {
        if merge_attribute(&mut attributes, event.attribute, &event.value) {
            kept.push(event);
        } else {
            pruned.push(event);
        }
    }

    Reconciliation {
        attributes,
        kept,
        pruned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: &str = "2026-03-01T10:00:00.000Z";
    const T2: &str = "2026-03-01T11:00:00.000Z";
    const T3: &str = "2026-03-01T12:00:00.000Z";

    fn event(attribute: InteractionAttribute, value: &str) -> InteractionEvent {
        InteractionEvent {
            node_id: "n1".to_string(),
            root_id: "r1".to_string(),
            attribute,
            value: value.to_string(),
            event_id: format!("e-{}", value),
            created_at: value.to_string(),
            sent_at: None,
            sent_count: 0,
        }
    }

    #[test]
    fn last_attributes_only_move_forward() {
        let mut attributes = InteractionAttributes::default();
        assert!(merge_attribute(&mut attributes, InteractionAttribute::LastSeenAt, T2));
        assert!(!merge_attribute(&mut attributes, InteractionAttribute::LastSeenAt, T1));
        assert!(!merge_attribute(&mut attributes, InteractionAttribute::LastSeenAt, T2));
        assert!(merge_attribute(&mut attributes, InteractionAttribute::LastSeenAt, T3));
        assert_eq!(attributes.last_seen_at.as_deref(), Some(T3));
    }

    #[test]
    fn first_attributes_only_move_backward() {
        let mut attributes = InteractionAttributes::default();
        assert!(merge_attribute(&mut attributes, InteractionAttribute::FirstSeenAt, T2));
        assert!(!merge_attribute(&mut attributes, InteractionAttribute::FirstSeenAt, T3));
        assert!(merge_attribute(&mut attributes, InteractionAttribute::FirstSeenAt, T1));
        assert_eq!(attributes.first_seen_at.as_deref(), Some(T1));
    }

    #[test]
    fn timestamps_compare_by_instant() {
        let mut attributes = InteractionAttributes::default();
        merge_attribute(
            &mut attributes,
            InteractionAttribute::LastOpenedAt,
            "2026-03-01T12:00:00+02:00",
        );
        // 11:00Z is later than 10:00Z even though it sorts lower as text.
        assert!(merge_attribute(
            &mut attributes,
            InteractionAttribute::LastOpenedAt,
            "2026-03-01T11:00:00.000Z"
        ));
    }

    #[test]
    fn stale_pending_event_is_pruned_against_newer_snapshot() {
        let server = InteractionAttributes {
            last_seen_at: Some(T2.to_string()),
            ..Default::default()
        };
        let outcome = reconcile(&server, vec![event(InteractionAttribute::LastSeenAt, T1)]);

        assert_eq!(outcome.attributes.last_seen_at.as_deref(), Some(T2));
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.pruned.len(), 1);
    }

    #[test]
    fn forward_pending_events_are_kept_and_reapplied() {
        let server = InteractionAttributes {
            last_seen_at: Some(T2.to_string()),
            first_seen_at: Some(T2.to_string()),
            ..Default::default()
        };
        let outcome = reconcile(
            &server,
            vec![
                event(InteractionAttribute::LastSeenAt, T3),
                event(InteractionAttribute::FirstSeenAt, T1),
                event(InteractionAttribute::LastOpenedAt, T2),
            ],
        );

        assert_eq!(outcome.attributes.last_seen_at.as_deref(), Some(T3));
        assert_eq!(outcome.attributes.first_seen_at.as_deref(), Some(T1));
        assert_eq!(outcome.attributes.last_opened_at.as_deref(), Some(T2));
        assert_eq!(outcome.kept.len(), 3);
        assert!(outcome.pruned.is_empty());
    }

    #[test]
    fn acknowledged_event_is_pruned() {
        let server = InteractionAttributes {
            last_seen_at: Some(T2.to_string()),
            ..Default::default()
        };
        let outcome = reconcile(&server, vec![event(InteractionAttribute::LastSeenAt, T2)]);
        assert_eq!(outcome.pruned.len(), 1);
    }
}
