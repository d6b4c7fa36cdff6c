use std::collections::HashSet;

use confab_core::{ChannelId, UserId};
use uuid::Uuid;

use crate::server::{
    core::{AppState, SessionControl},
    gateway_events::{try_presence_update, try_voice_state, GatewayEvent},
    metrics::record_event_emitted,
};

use super::{
    channel_subscriptions::sessions_of_channel,
    fanout_dispatch::dispatch_payload,
    presence_aggregate::compute_presence_snapshot,
    session_registry::sessions_of_user,
    voice_rooms::collect_voice_snapshots,
};

async fn close_slow_sessions(state: &AppState, slow_sessions: Vec<Uuid>) {
    if slow_sessions.is_empty() {
        return;
    }
    let controls = state.controls.read().await;
    for session_id in slow_sessions {
        if let Some(control) = controls.get(&session_id) {
            let _ = control.send(SessionControl::Close);
        }
    }
}

async fn dispatch_to_targets(
    state: &AppState,
    targets: &[Uuid],
    event: &GatewayEvent,
    scope: &'static str,
) {
    if targets.is_empty() {
        return;
    }
    let mut slow_sessions = Vec::new();
    let delivered = {
        let mut senders = state.senders.write().await;
        dispatch_payload(
            &mut senders,
            targets,
            &event.payload,
            event.event_type,
            scope,
            &mut slow_sessions,
        )
    };

    close_slow_sessions(state, slow_sessions).await;
    record_event_emitted(scope, event.event_type, delivered);
}

/// Delivers a frame to every subscriber of a text channel.
pub(crate) async fn broadcast_to_channel(
    state: &AppState,
    channel_id: ChannelId,
    event: &GatewayEvent,
) {
    let targets = {
        let channel_sessions = state.channel_sessions.read().await;
        sessions_of_channel(&channel_sessions, channel_id)
    };
    dispatch_to_targets(state, &targets, event, "channel").await;
}

/// Delivers a frame to every session of the listed users, each session at
/// most once.
pub(crate) async fn broadcast_to_users(state: &AppState, user_ids: &[UserId], event: &GatewayEvent) {
    let targets: Vec<Uuid> = {
        let user_sessions = state.user_sessions.read().await;
        let mut seen = HashSet::new();
        user_ids
            .iter()
            .flat_map(|user_id| sessions_of_user(&user_sessions, *user_id))
            .filter(|session_id| seen.insert(*session_id))
            .collect()
    };
    dispatch_to_targets(state, &targets, event, "user").await;
}

/// Delivers a frame to every authenticated session exactly once.
pub(crate) async fn broadcast_to_all(state: &AppState, event: &GatewayEvent) {
    let targets: Vec<Uuid> = {
        let user_sessions = state.user_sessions.read().await;
        user_sessions
            .values()
            .flat_map(|sessions| sessions.iter().copied())
            .collect()
    };
    dispatch_to_targets(state, &targets, event, "all").await;
}

/// Computes the presence snapshot and delivers it to every connected
/// session.
pub(crate) async fn broadcast_presence_snapshot(state: &AppState) {
    let users = {
        let sessions = state.sessions.read().await;
        compute_presence_snapshot(&sessions)
    };
    match try_presence_update(users) {
        Ok(event) => broadcast_to_all(state, &event).await,
        Err(error) => {
            tracing::error!(
                event = "gateway.presence.serialize_failed",
                error = %error
            );
        }
    }
}

/// Broadcasts the current participant list of a voice channel to everyone.
pub(crate) async fn broadcast_voice_state(state: &AppState, channel_id: ChannelId) {
    let participants = {
        let rooms = state.voice.read().await;
        collect_voice_snapshots(&rooms, channel_id)
    };
    match try_voice_state(channel_id, participants) {
        Ok(event) => broadcast_to_all(state, &event).await,
        Err(error) => {
            tracing::error!(
                event = "gateway.voice_state.serialize_failed",
                channel_id = %channel_id,
                error = %error
            );
        }
    }
}
