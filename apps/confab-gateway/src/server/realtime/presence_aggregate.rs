use std::collections::HashMap;

use confab_core::{PresenceState, UserId};
use uuid::Uuid;

use crate::server::{core::SessionRecord, gateway_events::PresenceEntry};

/// Folds the states of one user's sessions into the visible aggregate.
/// DND wins over online, online wins over idle.
pub(crate) fn aggregate_presence<I>(states: I) -> Option<PresenceState>
where
    I: IntoIterator<Item = PresenceState>,
{
    let mut aggregate = None;
    for state in states {
        match state {
            PresenceState::Dnd => return Some(PresenceState::Dnd),
            PresenceState::Online => aggregate = Some(PresenceState::Online),
            PresenceState::Idle => {
                if aggregate.is_none() {
                    aggregate = Some(PresenceState::Idle);
                }
            }
        }
    }
    aggregate
}

/// Builds the sorted presence snapshot over every authenticated session.
pub(crate) fn compute_presence_snapshot(
    sessions: &HashMap<Uuid, SessionRecord>,
) -> Vec<PresenceEntry> {
    let mut by_user: HashMap<UserId, (PresenceEntry, Vec<PresenceState>)> = HashMap::new();
    for session in sessions.values() {
        let Some(identity) = &session.identity else {
            continue;
        };
        let entry = by_user.entry(identity.user_id).or_insert_with(|| {
            (
                PresenceEntry {
                    id: identity.user_id.to_string(),
                    username: identity.username.clone(),
                    avatar_url: identity.avatar_url.clone(),
                    state: PresenceState::Idle,
                },
                Vec::new(),
            )
        });
        entry.1.push(session.presence);
    }

    let mut users: Vec<PresenceEntry> = by_user
        .into_values()
        .filter_map(|(mut entry, states)| {
            entry.state = aggregate_presence(states)?;
            Some(entry)
        })
        .collect();
    users.sort_by(|a, b| a.username.cmp(&b.username).then_with(|| a.id.cmp(&b.id)));
    users
}

/// Applies an explicit `presence:set` across every session of the user and
/// refreshes their activity timestamps.
pub(crate) fn set_self_state(
    sessions: &mut HashMap<Uuid, SessionRecord>,
    targets: &[Uuid],
    state: PresenceState,
    now_unix: i64,
) {
    for session_id in targets {
        if let Some(session) = sessions.get_mut(session_id) {
            session.presence = state;
            session.last_activity_unix = now_unix;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use confab_core::{PresenceState, Role, UserId};
    use uuid::Uuid;

    use super::{aggregate_presence, compute_presence_snapshot, set_self_state};
    use crate::server::core::{IdentitySnapshot, SessionRecord};

    fn session(user_id: UserId, username: &str, state: PresenceState) -> SessionRecord {
        let mut record = SessionRecord::new(1);
        record.identity = Some(IdentitySnapshot {
            user_id,
            username: String::from(username),
            avatar_url: None,
            role: Role::Member,
        });
        record.presence = state;
        record
    }

    #[test]
    fn dnd_wins_over_online_and_idle() {
        let states = [PresenceState::Online, PresenceState::Dnd, PresenceState::Idle];
        assert_eq!(aggregate_presence(states), Some(PresenceState::Dnd));
    }

    #[test]
    fn online_wins_over_idle() {
        let states = [PresenceState::Idle, PresenceState::Online];
        assert_eq!(aggregate_presence(states), Some(PresenceState::Online));
    }

    #[test]
    fn all_idle_aggregates_to_idle() {
        assert_eq!(
            aggregate_presence([PresenceState::Idle, PresenceState::Idle]),
            Some(PresenceState::Idle)
        );
    }

    #[test]
    fn no_sessions_yields_no_aggregate() {
        assert_eq!(aggregate_presence([]), None);
    }

    #[test]
    fn snapshot_skips_unauthenticated_sessions_and_sorts_by_username() {
        let ada = UserId::new();
        let brin = UserId::new();
        let sessions = HashMap::from([
            (Uuid::new_v4(), session(brin, "brin", PresenceState::Idle)),
            (Uuid::new_v4(), session(ada, "ada", PresenceState::Online)),
            (Uuid::new_v4(), SessionRecord::new(1)),
        ]);

        let snapshot = compute_presence_snapshot(&sessions);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].username, "ada");
        assert_eq!(snapshot[0].state, PresenceState::Online);
        assert_eq!(snapshot[1].username, "brin");
        assert_eq!(snapshot[1].state, PresenceState::Idle);
    }

    #[test]
    fn multi_session_user_appears_once_with_aggregate() {
        let user_id = UserId::new();
        let sessions = HashMap::from([
            (Uuid::new_v4(), session(user_id, "ada", PresenceState::Idle)),
            (Uuid::new_v4(), session(user_id, "ada", PresenceState::Dnd)),
        ]);

        let snapshot = compute_presence_snapshot(&sessions);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, PresenceState::Dnd);
    }

    #[test]
    fn set_self_state_touches_every_targeted_session() {
        let user_id = UserId::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut sessions = HashMap::from([
            (first, session(user_id, "ada", PresenceState::Online)),
            (second, session(user_id, "ada", PresenceState::Idle)),
        ]);

        set_self_state(&mut sessions, &[first, second], PresenceState::Dnd, 99);

        assert_eq!(sessions[&first].presence, PresenceState::Dnd);
        assert_eq!(sessions[&second].presence, PresenceState::Dnd);
        assert_eq!(sessions[&second].last_activity_unix, 99);
    }
}
