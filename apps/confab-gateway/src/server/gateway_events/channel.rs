use confab_core::ChannelId;
use serde::Serialize;

use super::{envelope::try_build_event, GatewayEvent};

pub(crate) const CHANNEL_JOINED_EVENT: &str = "channel:joined";
pub(crate) const CHANNEL_LEFT_EVENT: &str = "channel:left";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelPayload {
    channel_id: String,
}

pub(crate) fn try_channel_joined(channel_id: ChannelId) -> anyhow::Result<GatewayEvent> {
    try_build_event(
        CHANNEL_JOINED_EVENT,
        ChannelPayload {
            channel_id: channel_id.to_string(),
        },
    )
}

pub(crate) fn try_channel_left(channel_id: ChannelId) -> anyhow::Result<GatewayEvent> {
    try_build_event(
        CHANNEL_LEFT_EVENT,
        ChannelPayload {
            channel_id: channel_id.to_string(),
        },
    )
}
