use confab_core::{ChannelId, UserId};
use serde_json::json;

use crate::server::{core::AppState, gateway_events::try_sfu_event};

use super::{
    fanout::{broadcast_to_users, broadcast_voice_state},
    voice_grace::cancel_grace_timer,
    voice_rooms::{apply_force_leave, participant_user_ids},
};

/// Finishes a terminal voice removal after the participant map has already
/// been mutated: removes the SFU peer, announces the removed producers to
/// the remaining participants, then broadcasts the channel's new state.
pub(crate) async fn teardown_voice_peer(state: &AppState, user_id: UserId, channel_id: ChannelId) {
    let removed_producers = state.sfu.remove_peer(channel_id, user_id).await;

    if !removed_producers.is_empty() {
        let targets = {
            let rooms = state.voice.read().await;
            participant_user_ids(&rooms, channel_id)
        };
        for descriptor in removed_producers {
            match try_sfu_event(
                channel_id,
                "producer-removed",
                json!({
                    "producerId": descriptor.producer_id,
                    "userId": descriptor.user_id.to_string(),
                    "kind": descriptor.kind.as_str(),
                }),
            ) {
                Ok(event) => broadcast_to_users(state, &targets, &event).await,
                Err(error) => {
                    tracing::error!(
                        event = "gateway.voice_cleanup.serialize_failed",
                        channel_id = %channel_id,
                        error = %error
                    );
                }
            }
        }
    }

    broadcast_voice_state(state, channel_id).await;
}

/// Treats every participant of the listed channels as force-left. Used when
/// the media worker dies; the SFU side is already gone.
pub(crate) async fn invalidate_rooms(state: &AppState, channel_ids: Vec<ChannelId>) {
    for channel_id in channel_ids {
        let removed_users = {
            let mut rooms = state.voice.write().await;
            let users = participant_user_ids(&rooms, channel_id);
            for user_id in &users {
                apply_force_leave(&mut rooms, *user_id, channel_id);
            }
            users
        };
        if removed_users.is_empty() {
            continue;
        }

        {
            let mut sessions = state.sessions.write().await;
            for session in sessions.values_mut() {
                if session.active_voice_channel == Some(channel_id) {
                    session.active_voice_channel = None;
                }
            }
        }
        {
            let mut grace = state.grace.write().await;
            for user_id in &removed_users {
                cancel_grace_timer(&mut grace, *user_id);
            }
        }

        broadcast_voice_state(state, channel_id).await;
    }
}
