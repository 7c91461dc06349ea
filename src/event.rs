//! Stored-event envelope and the codec between domain events and the log.
//!
//! This module provides the data types and pure functions that the actor
//! and log modules depend on. No I/O occurs here.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::command::CommandContext;

/// Infrastructure metadata stamped on every appended event.
///
/// The `aggregate_type` and `instance_id` fields make each event
/// self-describing, so a stream can be attributed to its aggregate without
/// an external registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Aggregate type name (e.g., "portfolio").
    pub aggregate_type: String,
    /// Aggregate instance identifier (e.g., "p-1").
    pub instance_id: String,
    /// Actor identity from the command context, if provided.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actor: Option<String>,
    /// Correlation ID from the command context, if provided.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,
}

/// An event as it lives in the log: the domain payload plus the envelope
/// the infrastructure needs (identity, ordering, provenance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Client-assigned event ID (UUID v4, generated at encode time).
    pub event_id: Uuid,
    /// Aggregate type name (e.g., "portfolio").
    pub aggregate_type: String,
    /// Instance ID within the aggregate type (e.g., "p-1").
    pub instance_id: String,
    /// Zero-based position within the stream.
    pub stream_version: u64,
    /// Event type tag (e.g., "FundsDebited").
    pub event_type: String,
    /// JSON payload (the `"data"` portion of the adjacently-tagged enum;
    /// `null` for fieldless variants).
    pub payload: serde_json::Value,
    /// Provenance metadata (actor, correlation id).
    pub metadata: EventMetadata,
    /// Timestamp assigned at encode time (Unix epoch milliseconds).
    pub recorded_at: u64,
}

/// Encode a domain event into a [`StoredEvent`] ready for appending.
///
/// Serializes the adjacently-tagged domain event
/// (`#[serde(tag = "type", content = "data")]`), extracts the `"type"` and
/// `"data"` fields, builds [`EventMetadata`] from the command context and
/// aggregate identity, and generates a fresh UUID v4 event ID.
///
/// # Errors
///
/// Returns `serde_json::Error` if the domain event cannot be serialized.
pub fn encode_domain_event<A: Aggregate>(
    event: &A::DomainEvent,
    ctx: &CommandContext,
    instance_id: &str,
    stream_version: u64,
) -> serde_json::Result<StoredEvent> {
    // Serialize the adjacently-tagged domain event. This produces JSON like:
    //   {"type": "LiquidationStarted"}                 (unit variant)
    //   {"type": "FundsDebited", "data": {...}}        (variant with fields)
    let value = serde_json::to_value(event)?;
    let obj = value
        .as_object()
        .expect("adjacently tagged enum must serialize to a JSON object");

    let event_type = obj["type"]
        .as_str()
        .expect("adjacently tagged enum must have a string 'type' field")
        .to_string();

    // The "data" field is absent for fieldless variants.
    let payload = obj.get("data").cloned().unwrap_or(serde_json::Value::Null);

    let metadata = EventMetadata {
        aggregate_type: A::AGGREGATE_TYPE.to_string(),
        instance_id: instance_id.to_string(),
        actor: ctx.actor.clone(),
        correlation_id: ctx.correlation_id.clone(),
    };

    let recorded_at = SystemTime::UNIX_EPOCH
        .elapsed()
        .expect("system clock is before Unix epoch")
        .as_millis() as u64;

    Ok(StoredEvent {
        event_id: Uuid::new_v4(),
        aggregate_type: A::AGGREGATE_TYPE.to_string(),
        instance_id: instance_id.to_string(),
        stream_version,
        event_type,
        payload,
        metadata,
        recorded_at,
    })
}

/// Decode a [`StoredEvent`] back into a domain event.
///
/// Reconstructs the adjacently-tagged JSON object from the envelope's
/// `event_type` and `payload` fields and deserializes it. Returns `None`
/// for unknown or malformed event types, so replay skips events this
/// version of the domain does not understand.
pub fn decode_domain_event<A: Aggregate>(stored: &StoredEvent) -> Option<A::DomainEvent> {
    let tagged = if stored.payload.is_null() {
        // Fieldless variant: just `{"type": "VariantName"}`.
        serde_json::json!({ "type": stored.event_type })
    } else {
        serde_json::json!({
            "type": stored.event_type,
            "data": stored.payload,
        })
    };

    serde_json::from_value::<A::DomainEvent>(tagged).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::{PortfolioEvent, PortfolioState};
    use rust_decimal_macros::dec;

    #[test]
    fn encode_stamps_envelope_fields() {
        let ctx = CommandContext::default();
        let stored = encode_domain_event::<PortfolioState>(
            &PortfolioEvent::FundsDebited { amount: dec!(100) },
            &ctx,
            "p-1",
            7,
        )
        .expect("encode should succeed");

        assert_eq!(stored.event_type, "FundsDebited");
        assert_eq!(stored.aggregate_type, "portfolio");
        assert_eq!(stored.instance_id, "p-1");
        assert_eq!(stored.stream_version, 7);
        assert_eq!(stored.metadata.aggregate_type, "portfolio");
        assert_eq!(
            stored.event_id.get_version(),
            Some(uuid::Version::Random),
            "event_id should be UUID v4"
        );
    }

    #[test]
    fn encode_fieldless_variant_has_null_payload() {
        let stored = encode_domain_event::<PortfolioState>(
            &PortfolioEvent::LiquidationStarted,
            &CommandContext::default(),
            "p-1",
            0,
        )
        .expect("encode should succeed");
        assert_eq!(stored.event_type, "LiquidationStarted");
        assert!(stored.payload.is_null());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let original = PortfolioEvent::SharesCredited {
            symbol: "ACME".into(),
            shares: 5,
        };
        let stored = encode_domain_event::<PortfolioState>(
            &original,
            &CommandContext::default(),
            "p-1",
            0,
        )
        .expect("encode should succeed");

        let decoded =
            decode_domain_event::<PortfolioState>(&stored).expect("decode should succeed");
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_fieldless_variant_roundtrip() {
        let stored = encode_domain_event::<PortfolioState>(
            &PortfolioEvent::LiquidationStarted,
            &CommandContext::default(),
            "p-1",
            0,
        )
        .expect("encode should succeed");
        let decoded =
            decode_domain_event::<PortfolioState>(&stored).expect("decode should succeed");
        assert_eq!(decoded, PortfolioEvent::LiquidationStarted);
    }

    #[test]
    fn decode_unknown_event_type_returns_none() {
        let mut stored = encode_domain_event::<PortfolioState>(
            &PortfolioEvent::LiquidationStarted,
            &CommandContext::default(),
            "p-1",
            0,
        )
        .expect("encode should succeed");
        stored.event_type = "DividendPaid".into();
        assert!(decode_domain_event::<PortfolioState>(&stored).is_none());
    }

    #[test]
    fn context_propagates_into_metadata() {
        let ctx = CommandContext::default()
            .with_actor("broker-svc")
            .with_correlation_id("req-abc");
        let stored = encode_domain_event::<PortfolioState>(
            &PortfolioEvent::FundsCredited { amount: dec!(1) },
            &ctx,
            "p-1",
            0,
        )
        .expect("encode should succeed");

        assert_eq!(stored.metadata.actor.as_deref(), Some("broker-svc"));
        assert_eq!(stored.metadata.correlation_id.as_deref(), Some("req-abc"));
    }

    #[test]
    fn metadata_skips_none_fields_in_serialization() {
        let meta = EventMetadata {
            aggregate_type: "portfolio".to_string(),
            instance_id: "p-1".to_string(),
            actor: None,
            correlation_id: None,
        };
        let json = serde_json::to_string(&meta).expect("serialize should succeed");
        assert!(!json.contains("actor"), "actor should be omitted when None");
        assert!(
            !json.contains("correlation_id"),
            "correlation_id should be omitted when None"
        );
    }

    #[test]
    fn stored_event_serde_roundtrip() {
        let stored = encode_domain_event::<PortfolioState>(
            &PortfolioEvent::Opened {
                name: "alice".into(),
            },
            &CommandContext::default().with_actor("test"),
            "p-1",
            0,
        )
        .expect("encode should succeed");

        let line = serde_json::to_string(&stored).expect("serialize should succeed");
        let back: StoredEvent = serde_json::from_str(&line).expect("deserialize should succeed");
        assert_eq!(back.event_id, stored.event_id);
        assert_eq!(back.event_type, "Opened");
        assert_eq!(back.payload, stored.payload);
        assert_eq!(back.metadata, stored.metadata);
    }
}
