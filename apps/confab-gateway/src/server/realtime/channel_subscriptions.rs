use std::collections::{HashMap, HashSet};

use confab_core::ChannelId;
use uuid::Uuid;

/// Binds a session to a text channel in both directions. Returns false when
/// the session was already subscribed.
pub(crate) fn add_channel_subscription(
    channel_sessions: &mut HashMap<ChannelId, HashSet<Uuid>>,
    joined: &mut HashSet<ChannelId>,
    channel_id: ChannelId,
    session_id: Uuid,
) -> bool {
    let inserted = channel_sessions
        .entry(channel_id)
        .or_default()
        .insert(session_id);
    joined.insert(channel_id);
    inserted
}

/// Unbinds a session from a text channel. Empty channel buckets are pruned.
pub(crate) fn remove_channel_subscription(
    channel_sessions: &mut HashMap<ChannelId, HashSet<Uuid>>,
    joined: &mut HashSet<ChannelId>,
    channel_id: ChannelId,
    session_id: Uuid,
) -> bool {
    joined.remove(&channel_id);
    let Some(sessions) = channel_sessions.get_mut(&channel_id) else {
        return false;
    };
    let removed = sessions.remove(&session_id);
    if sessions.is_empty() {
        channel_sessions.remove(&channel_id);
    }
    removed
}

/// Unwinds every subscription of a closing session.
pub(crate) fn clear_session_subscriptions(
    channel_sessions: &mut HashMap<ChannelId, HashSet<Uuid>>,
    joined: &HashSet<ChannelId>,
    session_id: Uuid,
) {
    for channel_id in joined {
        if let Some(sessions) = channel_sessions.get_mut(channel_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                channel_sessions.remove(channel_id);
            }
        }
    }
}

pub(crate) fn sessions_of_channel(
    channel_sessions: &HashMap<ChannelId, HashSet<Uuid>>,
    channel_id: ChannelId,
) -> Vec<Uuid> {
    channel_sessions
        .get(&channel_id)
        .into_iter()
        .flat_map(|sessions| sessions.iter().copied())
        .collect()
}
