use serde::Serialize;

/// Pre-serialized outbound frame. The payload is rendered once and shared by
/// every fan-out target.
pub(crate) struct GatewayEvent {
    pub(crate) event_type: &'static str,
    pub(crate) payload: String,
}

#[derive(Serialize)]
struct OutboundFrame<'a, T> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: T,
}

pub(super) fn try_build_event<T: Serialize>(
    event_type: &'static str,
    payload: T,
) -> anyhow::Result<GatewayEvent> {
    let payload = serde_json::to_string(&OutboundFrame {
        kind: event_type,
        payload,
    })?;
    Ok(GatewayEvent {
        event_type,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use serde::Serialize;
    use serde_json::Value;

    use super::{try_build_event, GatewayEvent};

    #[derive(Serialize)]
    struct EnvelopeTestPayload<'a> {
        value: &'a str,
    }

    fn parse_envelope(event: &GatewayEvent) -> Value {
        serde_json::from_str(&event.payload).expect("event payload should be valid json")
    }

    #[test]
    fn build_event_wraps_typed_payload_in_frame_envelope() {
        let event = try_build_event("test:event", EnvelopeTestPayload { value: "ok" })
            .expect("event should serialize");
        let envelope = parse_envelope(&event);
        assert_eq!(envelope["type"], Value::from("test:event"));
        assert_eq!(envelope["payload"]["value"], Value::from("ok"));
    }
}
