use confab_core::{ChannelId, PresenceState, UserId};
use confab_protocol::Envelope;
use serde::Deserialize;
use serde_json::Value;

use crate::server::errors::{ErrorCode, GatewayError};

use super::sfu_contract::SfuAction;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthDto {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PresenceSetDto {
    state: PresenceState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ChannelDto {
    channel_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct VoiceJoinDto {
    channel_id: String,
    #[serde(default)]
    muted: bool,
    #[serde(default)]
    deafened: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct VoiceLeaveDto {
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct VoiceSelfStateDto {
    channel_id: Option<String>,
    muted: Option<bool>,
    deafened: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SfuRequestDto {
    request_id: String,
    channel_id: String,
    action: String,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct VoiceSignalDto {
    channel_id: String,
    target_user_id: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MessageSendDto {
    channel_id: String,
    content: String,
}

#[derive(Debug)]
pub(crate) struct SfuRequestCommand {
    pub(crate) request_id: String,
    pub(crate) channel_id: ChannelId,
    pub(crate) action: SfuAction,
    pub(crate) data: Value,
}

/// Typed view of one inbound frame. Parsing validates payload shape and
/// identifier syntax; semantic checks happen at dispatch.
#[derive(Debug)]
pub(crate) enum ClientCommand {
    Auth {
        token: String,
    },
    PresenceSet {
        state: PresenceState,
    },
    ChannelJoin {
        channel_id: ChannelId,
    },
    ChannelLeave {
        channel_id: ChannelId,
    },
    VoiceJoin {
        channel_id: ChannelId,
        muted: bool,
        deafened: bool,
    },
    VoiceLeave {
        channel_id: Option<ChannelId>,
    },
    VoiceSelfState {
        channel_id: Option<ChannelId>,
        muted: Option<bool>,
        deafened: Option<bool>,
    },
    SfuRequest(SfuRequestCommand),
    VoiceSignal {
        channel_id: ChannelId,
        target_user_id: UserId,
        data: Value,
    },
    MessageSend {
        channel_id: ChannelId,
        content: String,
    },
    Ping,
}

impl ClientCommand {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::PresenceSet { .. } => "presence:set",
            Self::ChannelJoin { .. } => "channel:join",
            Self::ChannelLeave { .. } => "channel:leave",
            Self::VoiceJoin { .. } => "voice:join",
            Self::VoiceLeave { .. } => "voice:leave",
            Self::VoiceSelfState { .. } => "voice:self-state",
            Self::SfuRequest(_) => "voice:sfu:request",
            Self::VoiceSignal { .. } => "voice:signal",
            Self::MessageSend { .. } => "message:send",
            Self::Ping => "ping",
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, GatewayError> {
    serde_json::from_value(payload).map_err(|_| GatewayError::new(ErrorCode::InvalidEvent))
}

fn parse_channel_id(value: &str) -> Result<ChannelId, GatewayError> {
    value
        .parse()
        .map_err(|_| GatewayError::new(ErrorCode::InvalidChannel))
}

fn parse_optional_channel_id(value: Option<String>) -> Result<Option<ChannelId>, GatewayError> {
    value.as_deref().map(parse_channel_id).transpose()
}

pub(crate) fn parse_client_command(
    envelope: Envelope<Value>,
) -> Result<ClientCommand, GatewayError> {
    match envelope.kind.as_str() {
        "auth" => {
            let dto: AuthDto = parse_payload(envelope.payload)?;
            Ok(ClientCommand::Auth { token: dto.token })
        }
        "presence:set" => {
            let dto: PresenceSetDto = parse_payload(envelope.payload)?;
            Ok(ClientCommand::PresenceSet { state: dto.state })
        }
        "channel:join" => {
            let dto: ChannelDto = parse_payload(envelope.payload)?;
            Ok(ClientCommand::ChannelJoin {
                channel_id: parse_channel_id(&dto.channel_id)?,
            })
        }
        "channel:leave" => {
            let dto: ChannelDto = parse_payload(envelope.payload)?;
            Ok(ClientCommand::ChannelLeave {
                channel_id: parse_channel_id(&dto.channel_id)?,
            })
        }
        "voice:join" => {
            let dto: VoiceJoinDto = parse_payload(envelope.payload)?;
            Ok(ClientCommand::VoiceJoin {
                channel_id: parse_channel_id(&dto.channel_id)?,
                muted: dto.muted,
                deafened: dto.deafened,
            })
        }
        "voice:leave" => {
            let dto: VoiceLeaveDto = parse_payload(envelope.payload)?;
            Ok(ClientCommand::VoiceLeave {
                channel_id: parse_optional_channel_id(dto.channel_id)?,
            })
        }
        "voice:self-state" => {
            let dto: VoiceSelfStateDto = parse_payload(envelope.payload)?;
            Ok(ClientCommand::VoiceSelfState {
                channel_id: parse_optional_channel_id(dto.channel_id)?,
                muted: dto.muted,
                deafened: dto.deafened,
            })
        }
        "voice:sfu:request" => {
            let dto: SfuRequestDto = parse_payload(envelope.payload)?;
            if dto.request_id.is_empty() {
                return Err(GatewayError::new(ErrorCode::InvalidSfuRequest));
            }
            let action = SfuAction::parse(&dto.action)
                .ok_or_else(|| GatewayError::new(ErrorCode::InvalidSfuRequest))?;
            Ok(ClientCommand::SfuRequest(SfuRequestCommand {
                request_id: dto.request_id,
                channel_id: parse_channel_id(&dto.channel_id)?,
                action,
                data: dto.data.unwrap_or(Value::Null),
            }))
        }
        "voice:signal" => {
            let dto: VoiceSignalDto = parse_payload(envelope.payload)?;
            let target_user_id = dto
                .target_user_id
                .parse()
                .map_err(|_| GatewayError::new(ErrorCode::InvalidSignal))?;
            Ok(ClientCommand::VoiceSignal {
                channel_id: parse_channel_id(&dto.channel_id)?,
                target_user_id,
                data: dto.data,
            })
        }
        "message:send" => {
            let dto: MessageSendDto = parse_payload(envelope.payload)?;
            if dto.content.is_empty() {
                return Err(GatewayError::new(ErrorCode::InvalidEvent));
            }
            Ok(ClientCommand::MessageSend {
                channel_id: parse_channel_id(&dto.channel_id)?,
                content: dto.content,
            })
        }
        "ping" => Ok(ClientCommand::Ping),
        other => Err(GatewayError::with_message(
            ErrorCode::UnknownEvent,
            format!("unknown frame kind: {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use confab_core::{ChannelId, PresenceState, UserId};
    use confab_protocol::{Envelope, FrameKind};
    use serde_json::{json, Value};

    use super::{parse_client_command, ClientCommand};
    use crate::server::errors::ErrorCode;

    fn envelope(kind: &str, payload: Value) -> Envelope<Value> {
        Envelope {
            kind: FrameKind::try_from(kind.to_owned()).expect("frame kind should be valid"),
            payload,
        }
    }

    #[test]
    fn parses_auth_frame() {
        let command = parse_client_command(envelope("auth", json!({ "token": "T" })))
            .expect("auth should parse");
        assert!(matches!(command, ClientCommand::Auth { token } if token == "T"));
    }

    #[test]
    fn parses_presence_set_with_valid_state() {
        let command = parse_client_command(envelope("presence:set", json!({ "state": "dnd" })))
            .expect("presence:set should parse");
        assert!(matches!(
            command,
            ClientCommand::PresenceSet {
                state: PresenceState::Dnd
            }
        ));
    }

    #[test]
    fn rejects_presence_set_with_unknown_state() {
        let error = parse_client_command(envelope("presence:set", json!({ "state": "away" })))
            .expect_err("unknown state should fail");
        assert_eq!(error.code, ErrorCode::InvalidEvent);
    }

    #[test]
    fn parses_channel_join_with_ulid_id() {
        let channel_id = ChannelId::new();
        let command = parse_client_command(envelope(
            "channel:join",
            json!({ "channelId": channel_id.to_string() }),
        ))
        .expect("channel:join should parse");
        assert!(matches!(
            command,
            ClientCommand::ChannelJoin { channel_id: parsed } if parsed == channel_id
        ));
    }

    #[test]
    fn rejects_malformed_channel_id() {
        let error =
            parse_client_command(envelope("channel:join", json!({ "channelId": "nope" })))
                .expect_err("malformed id should fail");
        assert_eq!(error.code, ErrorCode::InvalidChannel);
    }

    #[test]
    fn voice_join_defaults_mute_flags() {
        let channel_id = ChannelId::new();
        let command = parse_client_command(envelope(
            "voice:join",
            json!({ "channelId": channel_id.to_string() }),
        ))
        .expect("voice:join should parse");
        assert!(matches!(
            command,
            ClientCommand::VoiceJoin {
                muted: false,
                deafened: false,
                ..
            }
        ));
    }

    #[test]
    fn voice_leave_allows_empty_payload() {
        let command = parse_client_command(envelope("voice:leave", json!({})))
            .expect("voice:leave should parse");
        assert!(matches!(command, ClientCommand::VoiceLeave { channel_id: None }));
    }

    #[test]
    fn sfu_request_requires_a_request_id() {
        let channel_id = ChannelId::new();
        let error = parse_client_command(envelope(
            "voice:sfu:request",
            json!({
                "requestId": "",
                "channelId": channel_id.to_string(),
                "action": "produce"
            }),
        ))
        .expect_err("empty request id should fail");
        assert_eq!(error.code, ErrorCode::InvalidSfuRequest);
    }

    #[test]
    fn sfu_request_rejects_unknown_action() {
        let channel_id = ChannelId::new();
        let error = parse_client_command(envelope(
            "voice:sfu:request",
            json!({
                "requestId": "r1",
                "channelId": channel_id.to_string(),
                "action": "mute-peer"
            }),
        ))
        .expect_err("unknown action should fail");
        assert_eq!(error.code, ErrorCode::InvalidSfuRequest);
    }

    #[test]
    fn sfu_request_parses_with_optional_data() {
        let channel_id = ChannelId::new();
        let command = parse_client_command(envelope(
            "voice:sfu:request",
            json!({
                "requestId": "r1",
                "channelId": channel_id.to_string(),
                "action": "get-rtp-capabilities"
            }),
        ))
        .expect("sfu request should parse");
        match command {
            ClientCommand::SfuRequest(request) => {
                assert_eq!(request.request_id, "r1");
                assert_eq!(request.data, Value::Null);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn voice_signal_rejects_malformed_target() {
        let channel_id = ChannelId::new();
        let error = parse_client_command(envelope(
            "voice:signal",
            json!({
                "channelId": channel_id.to_string(),
                "targetUserId": "not-a-user",
                "data": {}
            }),
        ))
        .expect_err("malformed target should fail");
        assert_eq!(error.code, ErrorCode::InvalidSignal);
    }

    #[test]
    fn voice_signal_parses_with_opaque_data() {
        let channel_id = ChannelId::new();
        let target = UserId::new();
        let command = parse_client_command(envelope(
            "voice:signal",
            json!({
                "channelId": channel_id.to_string(),
                "targetUserId": target.to_string(),
                "data": { "sdp": "offer" }
            }),
        ))
        .expect("voice:signal should parse");
        assert!(matches!(
            command,
            ClientCommand::VoiceSignal { target_user_id, .. } if target_user_id == target
        ));
    }

    #[test]
    fn message_send_rejects_empty_content() {
        let channel_id = ChannelId::new();
        let error = parse_client_command(envelope(
            "message:send",
            json!({ "channelId": channel_id.to_string(), "content": "" }),
        ))
        .expect_err("empty content should fail");
        assert_eq!(error.code, ErrorCode::InvalidEvent);
    }

    #[test]
    fn ping_ignores_its_payload() {
        let command = parse_client_command(envelope("ping", json!({ "anything": 1 })))
            .expect("ping should parse");
        assert!(matches!(command, ClientCommand::Ping));
    }

    #[test]
    fn unknown_kind_is_reported_as_unknown_event() {
        let error = parse_client_command(envelope("typing:start", json!({})))
            .expect_err("unknown kind should fail");
        assert_eq!(error.code, ErrorCode::UnknownEvent);
    }

    #[test]
    fn unknown_payload_fields_are_rejected() {
        let channel_id = ChannelId::new();
        let error = parse_client_command(envelope(
            "channel:join",
            json!({ "channelId": channel_id.to_string(), "extra": 1 }),
        ))
        .expect_err("unknown field should fail");
        assert_eq!(error.code, ErrorCode::InvalidEvent);
    }
}
