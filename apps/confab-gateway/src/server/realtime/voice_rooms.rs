use confab_core::{ChannelId, UserId};

use crate::server::{
    core::{VoiceParticipant, VoiceRooms},
    gateway_events::VoiceStateEntry,
};

pub(crate) struct VoiceJoinOutcome {
    /// Channel the user was forcibly removed from before joining, if any.
    pub(crate) forced_leave: Option<ChannelId>,
    pub(crate) session_count: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum VoiceLeaveOutcome {
    /// The user holds no active channel matching the request.
    NotJoined,
    /// Other sockets of the user still claim the channel.
    RemainingSessions(u32),
    /// Terminal removal; the peer must be torn down and the state broadcast.
    Removed,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DisconnectVoiceOutcome {
    NotInVoice,
    RemainingSessions(u32),
    /// Last claiming socket closed; preserve the participant and arm the
    /// grace timer for the recorded channel.
    ArmGrace(ChannelId),
}

/// Installs the user in a voice channel. An active binding to a different
/// channel is torn down first; the caller must finish that teardown (peer
/// removal, broadcasts) before broadcasting the new channel's state.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply_voice_join(
    rooms: &mut VoiceRooms,
    session_active: &mut Option<ChannelId>,
    user_id: UserId,
    channel_id: ChannelId,
    username: &str,
    avatar_url: Option<&str>,
    muted: bool,
    deafened: bool,
) -> VoiceJoinOutcome {
    let previous_active = rooms.active_channel.get(&user_id).copied();
    let mut forced_leave = None;
    if let Some(previous) = previous_active {
        if previous != channel_id {
            apply_force_leave(rooms, user_id, previous);
            forced_leave = Some(previous);
        }
    }

    let held_same = *session_active == Some(channel_id) && previous_active == Some(channel_id);
    if !held_same {
        *rooms.session_counts.entry(user_id).or_insert(0) += 1;
    }
    *session_active = Some(channel_id);
    rooms.active_channel.insert(user_id, channel_id);

    rooms.participants.entry(channel_id).or_default().insert(
        user_id,
        VoiceParticipant {
            username: username.to_owned(),
            avatar_url: avatar_url.map(ToOwned::to_owned),
            muted: muted || deafened,
            deafened,
        },
    );

    VoiceJoinOutcome {
        forced_leave,
        session_count: rooms.session_counts.get(&user_id).copied().unwrap_or(0),
    }
}

/// Handles an explicit `voice:leave` for one socket. The participant is only
/// removed when the last claiming socket leaves.
pub(crate) fn apply_voice_leave(
    rooms: &mut VoiceRooms,
    session_active: &mut Option<ChannelId>,
    user_id: UserId,
    target: Option<ChannelId>,
) -> VoiceLeaveOutcome {
    let Some(channel_id) = target.or(*session_active) else {
        return VoiceLeaveOutcome::NotJoined;
    };
    if rooms.active_channel.get(&user_id) != Some(&channel_id) {
        return VoiceLeaveOutcome::NotJoined;
    }

    *session_active = None;
    let count = rooms.session_counts.entry(user_id).or_insert(0);
    *count = count.saturating_sub(1);
    if *count > 0 {
        return VoiceLeaveOutcome::RemainingSessions(*count);
    }

    if apply_force_leave(rooms, user_id, channel_id).is_some() {
        VoiceLeaveOutcome::Removed
    } else {
        VoiceLeaveOutcome::NotJoined
    }
}

/// Unconditional removal from a channel, ignoring the session counter. Used
/// by grace-timer expiry, channel switching and room invalidation.
pub(crate) fn apply_force_leave(
    rooms: &mut VoiceRooms,
    user_id: UserId,
    channel_id: ChannelId,
) -> Option<VoiceParticipant> {
    if rooms.active_channel.get(&user_id) == Some(&channel_id) {
        rooms.active_channel.remove(&user_id);
        rooms.session_counts.remove(&user_id);
    }
    let bucket = rooms.participants.get_mut(&channel_id)?;
    let participant = bucket.remove(&user_id);
    if bucket.is_empty() {
        rooms.participants.remove(&channel_id);
    }
    participant
}

/// Applies a mute/deafen update to the user's participant entry. A deafened
/// participant is always muted.
pub(crate) fn apply_self_state(
    rooms: &mut VoiceRooms,
    user_id: UserId,
    channel_id: Option<ChannelId>,
    muted: Option<bool>,
    deafened: Option<bool>,
) -> Option<ChannelId> {
    let active = rooms.active_channel.get(&user_id).copied()?;
    if channel_id.is_some_and(|requested| requested != active) {
        return None;
    }
    let participant = rooms.participants.get_mut(&active)?.get_mut(&user_id)?;
    if let Some(muted) = muted {
        participant.muted = muted;
    }
    if let Some(deafened) = deafened {
        participant.deafened = deafened;
    }
    if participant.deafened {
        participant.muted = true;
    }
    Some(active)
}

/// Records a socket close for a session that claimed an active channel.
pub(crate) fn apply_session_disconnect(
    rooms: &mut VoiceRooms,
    session_active: Option<ChannelId>,
    user_id: UserId,
) -> DisconnectVoiceOutcome {
    let Some(channel_id) = session_active else {
        return DisconnectVoiceOutcome::NotInVoice;
    };
    if rooms.active_channel.get(&user_id) != Some(&channel_id) {
        return DisconnectVoiceOutcome::NotInVoice;
    }

    let count = rooms.session_counts.entry(user_id).or_insert(0);
    *count = count.saturating_sub(1);
    if *count > 0 {
        DisconnectVoiceOutcome::RemainingSessions(*count)
    } else {
        DisconnectVoiceOutcome::ArmGrace(channel_id)
    }
}

/// Rebinds a resuming session to the channel preserved through the grace
/// window. Fails when the binding changed or was torn down meanwhile.
pub(crate) fn apply_grace_restore(
    rooms: &mut VoiceRooms,
    user_id: UserId,
    channel_id: ChannelId,
) -> bool {
    if rooms.active_channel.get(&user_id) != Some(&channel_id) {
        return false;
    }
    *rooms.session_counts.entry(user_id).or_insert(0) += 1;
    true
}

pub(crate) fn collect_voice_snapshots(
    rooms: &VoiceRooms,
    channel_id: ChannelId,
) -> Vec<VoiceStateEntry> {
    let mut entries: Vec<VoiceStateEntry> = rooms
        .participants
        .get(&channel_id)
        .into_iter()
        .flatten()
        .map(|(user_id, participant)| VoiceStateEntry {
            user_id: user_id.to_string(),
            username: participant.username.clone(),
            avatar_url: participant.avatar_url.clone(),
            muted: participant.muted,
            deafened: participant.deafened,
        })
        .collect();
    entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    entries
}

pub(crate) fn populated_channels(rooms: &VoiceRooms) -> Vec<ChannelId> {
    let mut channels: Vec<ChannelId> = rooms.participants.keys().copied().collect();
    channels.sort();
    channels
}

pub(crate) fn participant_user_ids(rooms: &VoiceRooms, channel_id: ChannelId) -> Vec<UserId> {
    rooms
        .participants
        .get(&channel_id)
        .into_iter()
        .flat_map(|participants| participants.keys().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use confab_core::{ChannelId, UserId};

    use super::{
        apply_force_leave, apply_grace_restore, apply_self_state, apply_session_disconnect,
        apply_voice_join, apply_voice_leave, collect_voice_snapshots, participant_user_ids,
        populated_channels, DisconnectVoiceOutcome, VoiceLeaveOutcome,
    };
    use crate::server::core::VoiceRooms;

    fn join(
        rooms: &mut VoiceRooms,
        session_active: &mut Option<ChannelId>,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> super::VoiceJoinOutcome {
        apply_voice_join(rooms, session_active, user_id, channel_id, "ada", None, false, false)
    }

    #[test]
    fn first_join_installs_participant_with_count_one() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();

        let outcome = join(&mut rooms, &mut session_active, user_id, channel_id);

        assert!(outcome.forced_leave.is_none());
        assert_eq!(outcome.session_count, 1);
        assert_eq!(session_active, Some(channel_id));
        assert_eq!(rooms.active_channel.get(&user_id), Some(&channel_id));
        assert_eq!(participant_user_ids(&rooms, channel_id), vec![user_id]);
    }

    #[test]
    fn second_socket_joining_same_channel_raises_count_to_two() {
        let mut rooms = VoiceRooms::default();
        let mut first_active = None;
        let mut second_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();

        join(&mut rooms, &mut first_active, user_id, channel_id);
        let outcome = join(&mut rooms, &mut second_active, user_id, channel_id);

        assert_eq!(outcome.session_count, 2);
        assert_eq!(participant_user_ids(&rooms, channel_id).len(), 1);
    }

    #[test]
    fn rejoin_from_the_same_socket_is_idempotent() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();

        join(&mut rooms, &mut session_active, user_id, channel_id);
        let outcome = join(&mut rooms, &mut session_active, user_id, channel_id);

        assert_eq!(outcome.session_count, 1);
    }

    #[test]
    fn join_enforces_deafened_implies_muted() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();

        apply_voice_join(
            &mut rooms,
            &mut session_active,
            user_id,
            channel_id,
            "ada",
            None,
            false,
            true,
        );

        let snapshot = collect_voice_snapshots(&rooms, channel_id);
        assert!(snapshot[0].deafened);
        assert!(snapshot[0].muted);
    }

    #[test]
    fn switching_channels_forces_leave_of_the_previous_one() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let first = ChannelId::new();
        let second = ChannelId::new();

        join(&mut rooms, &mut session_active, user_id, first);
        let outcome = join(&mut rooms, &mut session_active, user_id, second);

        assert_eq!(outcome.forced_leave, Some(first));
        assert_eq!(outcome.session_count, 1);
        assert!(participant_user_ids(&rooms, first).is_empty());
        assert_eq!(participant_user_ids(&rooms, second), vec![user_id]);
        assert_eq!(rooms.active_channel.get(&user_id), Some(&second));
    }

    #[test]
    fn switch_after_another_tab_moved_the_user_keeps_count_positive() {
        let mut rooms = VoiceRooms::default();
        let mut tab_a = None;
        let mut tab_b = None;
        let user_id = UserId::new();
        let first = ChannelId::new();
        let second = ChannelId::new();

        join(&mut rooms, &mut tab_a, user_id, first);
        join(&mut rooms, &mut tab_b, user_id, second);
        // Tab A rejoins its stale channel while the user's binding is on the
        // second channel.
        let outcome = join(&mut rooms, &mut tab_a, user_id, first);

        assert_eq!(outcome.forced_leave, Some(second));
        assert_eq!(outcome.session_count, 1);
        assert_eq!(participant_user_ids(&rooms, first), vec![user_id]);
    }

    #[test]
    fn leave_with_remaining_sessions_keeps_the_participant() {
        let mut rooms = VoiceRooms::default();
        let mut first_active = None;
        let mut second_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();
        join(&mut rooms, &mut first_active, user_id, channel_id);
        join(&mut rooms, &mut second_active, user_id, channel_id);

        let outcome = apply_voice_leave(&mut rooms, &mut first_active, user_id, None);

        assert_eq!(outcome, VoiceLeaveOutcome::RemainingSessions(1));
        assert_eq!(first_active, None);
        assert_eq!(participant_user_ids(&rooms, channel_id), vec![user_id]);
    }

    #[test]
    fn last_leave_removes_participant_and_bindings() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();
        join(&mut rooms, &mut session_active, user_id, channel_id);

        let outcome = apply_voice_leave(&mut rooms, &mut session_active, user_id, Some(channel_id));

        assert_eq!(outcome, VoiceLeaveOutcome::Removed);
        assert!(rooms.participants.is_empty());
        assert!(rooms.active_channel.is_empty());
        assert!(rooms.session_counts.is_empty());
    }

    #[test]
    fn leave_for_a_channel_the_user_is_not_in_reports_not_joined() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();
        join(&mut rooms, &mut session_active, user_id, channel_id);

        let outcome =
            apply_voice_leave(&mut rooms, &mut session_active, user_id, Some(ChannelId::new()));

        assert_eq!(outcome, VoiceLeaveOutcome::NotJoined);
        assert_eq!(participant_user_ids(&rooms, channel_id), vec![user_id]);
    }

    #[test]
    fn self_state_updates_only_the_active_channel() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();
        join(&mut rooms, &mut session_active, user_id, channel_id);

        assert_eq!(
            apply_self_state(&mut rooms, user_id, Some(ChannelId::new()), Some(true), None),
            None
        );
        assert_eq!(
            apply_self_state(&mut rooms, user_id, Some(channel_id), Some(true), None),
            Some(channel_id)
        );
        assert!(collect_voice_snapshots(&rooms, channel_id)[0].muted);
    }

    #[test]
    fn self_state_deafen_forces_mute_and_undeafen_keeps_explicit_mute() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();
        join(&mut rooms, &mut session_active, user_id, channel_id);

        apply_self_state(&mut rooms, user_id, None, Some(false), Some(true));
        let snapshot = collect_voice_snapshots(&rooms, channel_id);
        assert!(snapshot[0].muted);
        assert!(snapshot[0].deafened);

        apply_self_state(&mut rooms, user_id, None, None, Some(false));
        let snapshot = collect_voice_snapshots(&rooms, channel_id);
        assert!(snapshot[0].muted);
        assert!(!snapshot[0].deafened);
    }

    #[test]
    fn disconnect_of_one_socket_leaves_other_claims_intact() {
        let mut rooms = VoiceRooms::default();
        let mut first_active = None;
        let mut second_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();
        join(&mut rooms, &mut first_active, user_id, channel_id);
        join(&mut rooms, &mut second_active, user_id, channel_id);

        let outcome = apply_session_disconnect(&mut rooms, first_active, user_id);

        assert_eq!(outcome, DisconnectVoiceOutcome::RemainingSessions(1));
        assert_eq!(participant_user_ids(&rooms, channel_id), vec![user_id]);
    }

    #[test]
    fn disconnect_of_last_socket_arms_grace_and_preserves_the_participant() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();
        join(&mut rooms, &mut session_active, user_id, channel_id);

        let outcome = apply_session_disconnect(&mut rooms, session_active, user_id);

        assert_eq!(outcome, DisconnectVoiceOutcome::ArmGrace(channel_id));
        assert_eq!(participant_user_ids(&rooms, channel_id), vec![user_id]);
        assert_eq!(rooms.session_counts.get(&user_id), Some(&0));
        assert_eq!(rooms.active_channel.get(&user_id), Some(&channel_id));
    }

    #[test]
    fn grace_restore_reclaims_the_preserved_binding() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let channel_id = ChannelId::new();
        join(&mut rooms, &mut session_active, user_id, channel_id);
        apply_session_disconnect(&mut rooms, session_active, user_id);

        assert!(apply_grace_restore(&mut rooms, user_id, channel_id));
        assert_eq!(rooms.session_counts.get(&user_id), Some(&1));
    }

    #[test]
    fn grace_restore_fails_when_the_binding_changed() {
        let mut rooms = VoiceRooms::default();
        let user_id = UserId::new();

        assert!(!apply_grace_restore(&mut rooms, user_id, ChannelId::new()));
        assert!(rooms.session_counts.is_empty());
    }

    #[test]
    fn force_leave_prunes_empty_channels_and_clears_bindings() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let other = UserId::new();
        let mut other_active = None;
        let channel_id = ChannelId::new();
        join(&mut rooms, &mut session_active, user_id, channel_id);
        join(&mut rooms, &mut other_active, other, channel_id);

        let removed = apply_force_leave(&mut rooms, user_id, channel_id);

        assert!(removed.is_some());
        assert!(!rooms.active_channel.contains_key(&user_id));
        assert_eq!(participant_user_ids(&rooms, channel_id), vec![other]);

        apply_force_leave(&mut rooms, other, channel_id);
        assert!(rooms.participants.is_empty());
        assert!(populated_channels(&rooms).is_empty());
    }

    #[test]
    fn one_user_appears_in_exactly_one_channel() {
        let mut rooms = VoiceRooms::default();
        let mut session_active = None;
        let user_id = UserId::new();
        let first = ChannelId::new();
        let second = ChannelId::new();

        join(&mut rooms, &mut session_active, user_id, first);
        join(&mut rooms, &mut session_active, user_id, second);

        let mut appearances = 0;
        for channel_id in populated_channels(&rooms) {
            if participant_user_ids(&rooms, channel_id).contains(&user_id) {
                appearances += 1;
            }
        }
        assert_eq!(appearances, 1);
        assert!(rooms.session_counts.get(&user_id).copied().unwrap_or(0) >= 1);
    }
}
