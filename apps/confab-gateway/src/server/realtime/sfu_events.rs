use serde_json::json;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::server::{core::AppState, gateway_events::try_sfu_event};

use super::{
    fanout::broadcast_to_users,
    sfu_contract::SfuLifecycleEvent,
    voice_cleanup::invalidate_rooms,
    voice_rooms::participant_user_ids,
};

/// Consumes control-plane lifecycle events and propagates them to the
/// affected channel participants.
pub(crate) fn spawn_sfu_event_task(
    state: AppState,
    mut events: mpsc::Receiver<SfuLifecycleEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            handle_lifecycle_event(&state, event).await;
        }
    })
}

async fn handle_lifecycle_event(state: &AppState, event: SfuLifecycleEvent) {
    match event {
        SfuLifecycleEvent::ProducerClose {
            channel_id,
            user_id,
            producer_id,
        } => {
            relay_channel_event(
                state,
                channel_id,
                "producer-close",
                json!({ "producerId": producer_id, "userId": user_id.to_string() }),
            )
            .await;
        }
        SfuLifecycleEvent::ConsumerClose {
            channel_id,
            user_id,
            consumer_id,
        } => {
            relay_channel_event(
                state,
                channel_id,
                "consumer-close",
                json!({ "consumerId": consumer_id, "userId": user_id.to_string() }),
            )
            .await;
        }
        SfuLifecycleEvent::TransportClose {
            channel_id,
            user_id,
            transport_id,
        } => {
            relay_channel_event(
                state,
                channel_id,
                "transport-close",
                json!({ "transportId": transport_id, "userId": user_id.to_string() }),
            )
            .await;
        }
        SfuLifecycleEvent::RoomClose { channel_id } => {
            relay_channel_event(state, channel_id, "room-close", json!({})).await;
        }
        SfuLifecycleEvent::WorkerDied { channel_ids } => {
            invalidate_rooms(state, channel_ids).await;
        }
    }
}

async fn relay_channel_event(
    state: &AppState,
    channel_id: confab_core::ChannelId,
    event_name: &str,
    data: serde_json::Value,
) {
    let targets = {
        let rooms = state.voice.read().await;
        participant_user_ids(&rooms, channel_id)
    };
    if targets.is_empty() {
        return;
    }
    match try_sfu_event(channel_id, event_name, data) {
        Ok(event) => broadcast_to_users(state, &targets, &event).await,
        Err(error) => {
            tracing::error!(
                event = "gateway.sfu_events.serialize_failed",
                channel_id = %channel_id,
                error = %error
            );
        }
    }
}
