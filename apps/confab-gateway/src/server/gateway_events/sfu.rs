use confab_core::ChannelId;
use serde::Serialize;
use serde_json::Value;

use super::{envelope::try_build_event, GatewayEvent};

pub(crate) const SFU_RESPONSE_EVENT: &str = "voice:sfu:response";
pub(crate) const SFU_EVENT_EVENT: &str = "voice:sfu:event";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SfuResponseOkPayload<'a> {
    request_id: &'a str,
    ok: bool,
    data: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SfuResponseErrorPayload<'a> {
    request_id: &'a str,
    ok: bool,
    code: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SfuEventPayload<'a> {
    channel_id: String,
    event: &'a str,
    #[serde(flatten)]
    data: Value,
}

pub(crate) fn try_sfu_response_ok(request_id: &str, data: Value) -> anyhow::Result<GatewayEvent> {
    try_build_event(
        SFU_RESPONSE_EVENT,
        SfuResponseOkPayload {
            request_id,
            ok: true,
            data,
        },
    )
}

pub(crate) fn try_sfu_response_error(
    request_id: &str,
    code: &str,
    message: &str,
) -> anyhow::Result<GatewayEvent> {
    try_build_event(
        SFU_RESPONSE_EVENT,
        SfuResponseErrorPayload {
            request_id,
            ok: false,
            code,
            message,
        },
    )
}

/// `data` must serialize to a JSON object; its fields are flattened next to
/// `channelId` and `event`.
pub(crate) fn try_sfu_event(
    channel_id: ChannelId,
    event: &str,
    data: Value,
) -> anyhow::Result<GatewayEvent> {
    try_build_event(
        SFU_EVENT_EVENT,
        SfuEventPayload {
            channel_id: channel_id.to_string(),
            event,
            data,
        },
    )
}
