use std::collections::HashMap;

use confab_core::{ChannelId, UserId};

use crate::server::core::{AppState, GraceEntry};

use super::{voice_cleanup::teardown_voice_peer, voice_rooms::apply_force_leave};

/// Cancels a pending teardown. Returns the channel preserved through the
/// grace window so a resuming session can rebind to it.
pub(crate) fn cancel_grace_timer(
    grace: &mut HashMap<UserId, GraceEntry>,
    user_id: UserId,
) -> Option<ChannelId> {
    let entry = grace.remove(&user_id)?;
    entry.task.abort();
    Some(entry.channel_id)
}

/// Arms the disconnect-to-teardown timer for a user, replacing any pending
/// one. At most one timer exists per user.
pub(crate) async fn arm_grace_timer(state: &AppState, user_id: UserId, channel_id: ChannelId) {
    let task = tokio::spawn({
        let state = state.clone();
        async move {
            tokio::time::sleep(state.runtime.grace_period).await;
            fire_grace_timer(&state, user_id, channel_id).await;
        }
    });

    let mut grace = state.grace.write().await;
    if let Some(previous) = grace.insert(user_id, GraceEntry { channel_id, task }) {
        previous.task.abort();
    }
}

/// Timer expiry. Both this path and re-auth re-check the user's binding
/// under the lock; the timer is a no-op when the binding moved on or a
/// socket reclaimed it meanwhile.
async fn fire_grace_timer(state: &AppState, user_id: UserId, channel_id: ChannelId) {
    {
        let mut grace = state.grace.write().await;
        match grace.get(&user_id) {
            Some(entry) if entry.channel_id == channel_id => {
                grace.remove(&user_id);
            }
            _ => return,
        }
    }

    let removed = {
        let mut rooms = state.voice.write().await;
        if rooms.active_channel.get(&user_id) != Some(&channel_id) {
            return;
        }
        if rooms.session_counts.get(&user_id).copied().unwrap_or(0) > 0 {
            return;
        }
        apply_force_leave(&mut rooms, user_id, channel_id)
    };

    if removed.is_some() {
        tracing::info!(
            event = "gateway.voice_grace.expired",
            user_id = %user_id,
            channel_id = %channel_id
        );
        teardown_voice_peer(state, user_id, channel_id).await;
    }
}
