mod channel;
mod connection;
mod envelope;
mod message;
mod presence;
mod sfu;
mod voice;

pub(crate) use channel::{try_channel_joined, try_channel_left};
pub(crate) use connection::{try_auth_ok, try_error, try_pong};
pub(crate) use envelope::GatewayEvent;
pub(crate) use message::{
    try_message_deleted, try_message_new, try_message_reaction, try_message_updated,
};
pub(crate) use presence::{try_presence_update, PresenceEntry};
pub(crate) use sfu::{try_sfu_event, try_sfu_response_error, try_sfu_response_ok};
pub(crate) use voice::{try_voice_signal, try_voice_state, VoiceStateEntry};

#[cfg(test)]
mod tests {
    use confab_core::{ChannelId, PresenceState, UserId};
    use serde_json::Value;

    use super::*;

    fn parse_event(event: &GatewayEvent) -> Value {
        let value: Value =
            serde_json::from_str(&event.payload).expect("event payload should be valid json");
        assert_eq!(value["type"], Value::from(event.event_type));
        assert!(value["payload"].is_object());
        value["payload"].clone()
    }

    #[test]
    fn auth_ok_event_carries_user_id() {
        let user_id = UserId::new();
        let event = try_auth_ok(user_id).expect("auth:ok should serialize");
        assert_eq!(event.event_type, "auth:ok");
        let payload = parse_event(&event);
        assert_eq!(payload["userId"], Value::from(user_id.to_string()));
    }

    #[test]
    fn error_event_carries_code_and_message() {
        let event = try_error("CHANNEL_NOT_FOUND", "channel not found")
            .expect("error should serialize");
        let payload = parse_event(&event);
        assert_eq!(payload["code"], Value::from("CHANNEL_NOT_FOUND"));
        assert_eq!(payload["message"], Value::from("channel not found"));
    }

    #[test]
    fn pong_event_has_empty_payload() {
        let event = try_pong().expect("pong should serialize");
        let payload = parse_event(&event);
        assert_eq!(payload, serde_json::json!({}));
    }

    #[test]
    fn presence_update_lists_users_with_state() {
        let user_id = UserId::new();
        let event = try_presence_update(vec![PresenceEntry {
            id: user_id.to_string(),
            username: String::from("ada"),
            avatar_url: None,
            state: PresenceState::Dnd,
        }])
        .expect("presence:update should serialize");

        let payload = parse_event(&event);
        assert_eq!(payload["users"][0]["id"], Value::from(user_id.to_string()));
        assert_eq!(payload["users"][0]["state"], Value::from("dnd"));
        assert!(payload["users"][0].get("avatarUrl").is_none());
    }

    #[test]
    fn channel_events_carry_channel_id() {
        let channel_id = ChannelId::new();
        let joined = try_channel_joined(channel_id).expect("channel:joined should serialize");
        let left = try_channel_left(channel_id).expect("channel:left should serialize");
        assert_eq!(
            parse_event(&joined)["channelId"],
            Value::from(channel_id.to_string())
        );
        assert_eq!(
            parse_event(&left)["channelId"],
            Value::from(channel_id.to_string())
        );
    }

    #[test]
    fn voice_state_event_lists_participants() {
        let channel_id = ChannelId::new();
        let user_id = UserId::new();
        let event = try_voice_state(
            channel_id,
            vec![VoiceStateEntry {
                user_id: user_id.to_string(),
                username: String::from("ada"),
                avatar_url: Some(String::from("https://cdn/a.png")),
                muted: true,
                deafened: true,
            }],
        )
        .expect("voice:state should serialize");

        let payload = parse_event(&event);
        assert_eq!(payload["channelId"], Value::from(channel_id.to_string()));
        assert_eq!(
            payload["participants"][0]["userId"],
            Value::from(user_id.to_string())
        );
        assert_eq!(payload["participants"][0]["muted"], Value::from(true));
        assert_eq!(
            payload["participants"][0]["avatarUrl"],
            Value::from("https://cdn/a.png")
        );
    }

    #[test]
    fn voice_signal_event_names_the_sender() {
        let channel_id = ChannelId::new();
        let from = UserId::new();
        let event = try_voice_signal(channel_id, from, &serde_json::json!({"sdp": "offer"}))
            .expect("voice:signal should serialize");

        let payload = parse_event(&event);
        assert_eq!(payload["fromUserId"], Value::from(from.to_string()));
        assert_eq!(payload["data"]["sdp"], Value::from("offer"));
    }

    #[test]
    fn sfu_response_events_correlate_by_request_id() {
        let ok = try_sfu_response_ok("r1", serde_json::json!({"transportId": "t1"}))
            .expect("ok response should serialize");
        let err = try_sfu_response_error("r1", "VOICE_NOT_JOINED", "no active voice channel")
            .expect("error response should serialize");

        let ok_payload = parse_event(&ok);
        assert_eq!(ok_payload["requestId"], Value::from("r1"));
        assert_eq!(ok_payload["ok"], Value::from(true));
        assert_eq!(ok_payload["data"]["transportId"], Value::from("t1"));

        let err_payload = parse_event(&err);
        assert_eq!(err_payload["requestId"], Value::from("r1"));
        assert_eq!(err_payload["ok"], Value::from(false));
        assert_eq!(err_payload["code"], Value::from("VOICE_NOT_JOINED"));
    }

    #[test]
    fn sfu_event_flattens_event_data() {
        let channel_id = ChannelId::new();
        let event = try_sfu_event(
            channel_id,
            "producer-added",
            serde_json::json!({"producerId": "p1", "kind": "audio"}),
        )
        .expect("sfu event should serialize");

        let payload = parse_event(&event);
        assert_eq!(payload["channelId"], Value::from(channel_id.to_string()));
        assert_eq!(payload["event"], Value::from("producer-added"));
        assert_eq!(payload["producerId"], Value::from("p1"));
    }

    #[test]
    fn message_events_wrap_the_message_body() {
        let channel_id = ChannelId::new();
        let message = crate::server::directory::MessageResponse {
            id: String::from("01ARZ3NDEKTSV4RRFFQ69G5FAV"),
            channel_id: channel_id.to_string(),
            author_id: UserId::new().to_string(),
            author_username: String::from("ada"),
            content: String::from("hi"),
            created_at_unix: 7,
        };

        let created = try_message_new(&message).expect("message:new should serialize");
        let payload = parse_event(&created);
        assert_eq!(payload["message"]["content"], Value::from("hi"));

        let deleted = try_message_deleted(channel_id, &message.id)
            .expect("message:deleted should serialize");
        let payload = parse_event(&deleted);
        assert_eq!(payload["messageId"], Value::from(message.id.clone()));

        let reaction = try_message_reaction(channel_id, &message.id, "👍", UserId::new(), 2)
            .expect("message:reaction should serialize");
        let payload = parse_event(&reaction);
        assert_eq!(payload["count"], Value::from(2));
    }
}
