use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::server::{
    core::AppState,
    errors::ErrorCode,
    gateway_events::{try_sfu_event, try_sfu_response_error, try_sfu_response_ok},
    metrics::record_event_dropped,
};

use super::{
    fanout::broadcast_to_users,
    ingress_command::SfuRequestCommand,
    sfu_contract::{ProducerDescriptor, SfuAnnounce},
    voice_rooms::participant_user_ids,
};

/// Handles one `voice:sfu:request`. Exactly one `voice:sfu:response` frame
/// carrying the original request id is enqueued, success or failure.
pub(crate) async fn handle_sfu_request(
    state: &AppState,
    session_id: Uuid,
    outbound_tx: &mpsc::Sender<String>,
    request: SfuRequestCommand,
) {
    let SfuRequestCommand {
        request_id,
        channel_id,
        action,
        data,
    } = request;
    tracing::debug!(
        event = "gateway.sfu.request",
        request_id = %request_id,
        channel_id = %channel_id,
        action = action.as_str()
    );

    if !state.runtime.sfu_enabled {
        respond_error(outbound_tx, &request_id, ErrorCode::SfuDisabled);
        return;
    }

    let user_id = {
        let sessions = state.sessions.read().await;
        sessions.get(&session_id).and_then(|session| session.user_id())
    };
    let Some(user_id) = user_id else {
        respond_error(outbound_tx, &request_id, ErrorCode::InvalidSession);
        return;
    };

    let active = {
        let rooms = state.voice.read().await;
        rooms.active_channel.get(&user_id).copied()
    };
    if active != Some(channel_id) {
        respond_error(outbound_tx, &request_id, ErrorCode::VoiceNotJoined);
        return;
    }

    match state.sfu.request(channel_id, user_id, action, data).await {
        Ok(outcome) => {
            enqueue_response(outbound_tx, try_sfu_response_ok(&request_id, outcome.data));
            for announce in outcome.announce {
                broadcast_announce(state, channel_id, user_id, announce).await;
            }
        }
        Err(error) => {
            enqueue_response(
                outbound_tx,
                try_sfu_response_error(&request_id, error.code().as_str(), &error.message()),
            );
        }
    }
}

fn respond_error(outbound_tx: &mpsc::Sender<String>, request_id: &str, code: ErrorCode) {
    enqueue_response(
        outbound_tx,
        try_sfu_response_error(request_id, code.as_str(), code.default_message()),
    );
}

fn enqueue_response(
    outbound_tx: &mpsc::Sender<String>,
    event: anyhow::Result<crate::server::gateway_events::GatewayEvent>,
) {
    match event {
        Ok(event) => {
            if outbound_tx.try_send(event.payload).is_err() {
                record_event_dropped("session", event.event_type, "full_queue");
            }
        }
        Err(error) => {
            tracing::error!(
                event = "gateway.sfu_dispatch.serialize_failed",
                error = %error
            );
        }
    }
}

/// Producer announcements go to the other participants of the channel, not
/// back to the originator.
async fn broadcast_announce(
    state: &AppState,
    channel_id: confab_core::ChannelId,
    originator: confab_core::UserId,
    announce: SfuAnnounce,
) {
    let (event_name, descriptor) = match announce {
        SfuAnnounce::ProducerAdded(descriptor) => ("producer-added", descriptor),
        SfuAnnounce::ProducerRemoved(descriptor) => ("producer-removed", descriptor),
    };

    let targets: Vec<confab_core::UserId> = {
        let rooms = state.voice.read().await;
        participant_user_ids(&rooms, channel_id)
            .into_iter()
            .filter(|user_id| *user_id != originator)
            .collect()
    };
    if targets.is_empty() {
        return;
    }

    match try_sfu_event(channel_id, event_name, producer_payload(&descriptor)) {
        Ok(event) => broadcast_to_users(state, &targets, &event).await,
        Err(error) => {
            tracing::error!(
                event = "gateway.sfu_dispatch.serialize_failed",
                error = %error
            );
        }
    }
}

fn producer_payload(descriptor: &ProducerDescriptor) -> serde_json::Value {
    json!({
        "producerId": descriptor.producer_id,
        "userId": descriptor.user_id.to_string(),
        "kind": descriptor.kind.as_str(),
    })
}
