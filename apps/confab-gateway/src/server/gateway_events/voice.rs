use confab_core::{ChannelId, UserId};
use serde::Serialize;
use serde_json::Value;

use super::{envelope::try_build_event, GatewayEvent};

pub(crate) const VOICE_STATE_EVENT: &str = "voice:state";
pub(crate) const VOICE_SIGNAL_EVENT: &str = "voice:signal";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VoiceStateEntry {
    pub(crate) user_id: String,
    pub(crate) username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) avatar_url: Option<String>,
    pub(crate) muted: bool,
    pub(crate) deafened: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceStatePayload {
    channel_id: String,
    participants: Vec<VoiceStateEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSignalPayload<'a> {
    channel_id: String,
    from_user_id: String,
    data: &'a Value,
}

pub(crate) fn try_voice_state(
    channel_id: ChannelId,
    participants: Vec<VoiceStateEntry>,
) -> anyhow::Result<GatewayEvent> {
    try_build_event(
        VOICE_STATE_EVENT,
        VoiceStatePayload {
            channel_id: channel_id.to_string(),
            participants,
        },
    )
}

pub(crate) fn try_voice_signal(
    channel_id: ChannelId,
    from_user_id: UserId,
    data: &Value,
) -> anyhow::Result<GatewayEvent> {
    try_build_event(
        VOICE_SIGNAL_EVENT,
        VoiceSignalPayload {
            channel_id: channel_id.to_string(),
            from_user_id: from_user_id.to_string(),
            data,
        },
    )
}
