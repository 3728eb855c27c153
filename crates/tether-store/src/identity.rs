//! Stable event identity.
//!
//! A persisted event's ID must survive reconnects, replays, and reordering
//! of the in-memory history. The server-assigned ID wins when present;
//! otherwise the ID is derived from content that does not change between
//! observations of the same event: session, timestamp, type, and a short
//! content digest. Array position is never part of the identity.

use sha2::{Digest, Sha256};

use tether_core::{NormalizedEvent, SessionId};

/// Number of hex characters kept from the content digest.
const DIGEST_LEN: usize = 12;

/// Compute the stable ID for an event within a session.
#[must_use]
pub fn stable_event_id(session_id: &SessionId, event: &NormalizedEvent) -> String {
    if let Some(server_id) = &event.server_id {
        return server_id.clone();
    }
    format!(
        "evt_{}_{}_{}_{}",
        session_id,
        event.timestamp,
        event.kind.name(),
        content_digest(event)
    )
}

/// Short hex digest of the event's serialized kind.
fn content_digest(event: &NormalizedEvent) -> String {
    let payload = serde_json::to_string(&event.kind).unwrap_or_default();
    let digest = Sha256::digest(payload.as_bytes());
    let hex = format!("{digest:x}");
    hex[..DIGEST_LEN].to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::EventKind;

    fn session() -> SessionId {
        SessionId::from("default-1000")
    }

    #[test]
    fn server_id_wins() {
        let event = NormalizedEvent::with_server_id(
            100,
            EventKind::User { text: "hi".into() },
            "evt-srv-9",
        );
        assert_eq!(stable_event_id(&session(), &event), "evt-srv-9");
    }

    #[test]
    fn derived_id_is_deterministic() {
        let event = NormalizedEvent::new(100, EventKind::User { text: "hi".into() });
        let a = stable_event_id(&session(), &event);
        let b = stable_event_id(&session(), &event.clone());
        assert_eq!(a, b);
        assert!(a.starts_with("evt_default-1000_100_user_"));
    }

    #[test]
    fn derived_id_varies_with_content() {
        let a = NormalizedEvent::new(100, EventKind::User { text: "hi".into() });
        let b = NormalizedEvent::new(100, EventKind::User { text: "ho".into() });
        assert_ne!(stable_event_id(&session(), &a), stable_event_id(&session(), &b));
    }

    #[test]
    fn derived_id_varies_with_timestamp_and_type() {
        let a = NormalizedEvent::new(100, EventKind::User { text: "hi".into() });
        let b = NormalizedEvent::new(101, EventKind::User { text: "hi".into() });
        let c = NormalizedEvent::new(100, EventKind::System { text: "hi".into() });
        let id_a = stable_event_id(&session(), &a);
        assert_ne!(id_a, stable_event_id(&session(), &b));
        assert_ne!(id_a, stable_event_id(&session(), &c));
    }

    #[test]
    fn derived_id_varies_with_session() {
        let event = NormalizedEvent::new(100, EventKind::User { text: "hi".into() });
        let other = SessionId::from("default-2000");
        assert_ne!(
            stable_event_id(&session(), &event),
            stable_event_id(&other, &event)
        );
    }
}
