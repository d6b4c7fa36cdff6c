use confab_core::{ChannelId, UserId};
use serde::Serialize;

use super::{envelope::try_build_event, GatewayEvent};
use crate::server::directory::MessageResponse;

pub(crate) const MESSAGE_NEW_EVENT: &str = "message:new";
pub(crate) const MESSAGE_UPDATED_EVENT: &str = "message:updated";
pub(crate) const MESSAGE_DELETED_EVENT: &str = "message:deleted";
pub(crate) const MESSAGE_REACTION_EVENT: &str = "message:reaction";

#[derive(Serialize)]
struct MessagePayload<'a> {
    message: &'a MessageResponse,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageDeletedPayload<'a> {
    channel_id: String,
    message_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageReactionPayload<'a> {
    channel_id: String,
    message_id: &'a str,
    emoji: &'a str,
    user_id: String,
    count: usize,
}

pub(crate) fn try_message_new(message: &MessageResponse) -> anyhow::Result<GatewayEvent> {
    try_build_event(MESSAGE_NEW_EVENT, MessagePayload { message })
}

pub(crate) fn try_message_updated(message: &MessageResponse) -> anyhow::Result<GatewayEvent> {
    try_build_event(MESSAGE_UPDATED_EVENT, MessagePayload { message })
}

pub(crate) fn try_message_deleted(
    channel_id: ChannelId,
    message_id: &str,
) -> anyhow::Result<GatewayEvent> {
    try_build_event(
        MESSAGE_DELETED_EVENT,
        MessageDeletedPayload {
            channel_id: channel_id.to_string(),
            message_id,
        },
    )
}

pub(crate) fn try_message_reaction(
    channel_id: ChannelId,
    message_id: &str,
    emoji: &str,
    user_id: UserId,
    count: usize,
) -> anyhow::Result<GatewayEvent> {
    try_build_event(
        MESSAGE_REACTION_EVENT,
        MessageReactionPayload {
            channel_id: channel_id.to_string(),
            message_id,
            emoji,
            user_id: user_id.to_string(),
            count,
        },
    )
}
