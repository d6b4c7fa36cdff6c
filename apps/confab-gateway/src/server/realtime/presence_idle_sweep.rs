use std::{collections::HashMap, time::Duration};

use confab_core::{PresenceState, UserId};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::server::{
    auth::now_unix,
    core::{AppState, SessionRecord},
};

use super::{fanout::broadcast_presence_snapshot, presence_aggregate::aggregate_presence};

/// Demotes stale online sessions to idle. Returns true when any per-user
/// aggregate changed, which requires a presence rebroadcast.
pub(crate) fn sweep_idle_sessions(
    sessions: &mut HashMap<Uuid, SessionRecord>,
    now_unix: i64,
    threshold_secs: i64,
) -> bool {
    let before = user_aggregates(sessions);

    for session in sessions.values_mut() {
        if session.identity.is_none() {
            continue;
        }
        if session.presence == PresenceState::Online
            && now_unix - session.last_activity_unix > threshold_secs
        {
            session.presence = PresenceState::Idle;
        }
    }

    user_aggregates(sessions) != before
}

fn user_aggregates(
    sessions: &HashMap<Uuid, SessionRecord>,
) -> HashMap<UserId, Option<PresenceState>> {
    let mut states: HashMap<UserId, Vec<PresenceState>> = HashMap::new();
    for session in sessions.values() {
        if let Some(user_id) = session.user_id() {
            states.entry(user_id).or_default().push(session.presence);
        }
    }
    states
        .into_iter()
        .map(|(user_id, states)| (user_id, aggregate_presence(states)))
        .collect()
}

pub(crate) async fn run_idle_sweep(state: &AppState) {
    let threshold_secs = state.settings.idle_timeout_secs().await;
    let changed = {
        let mut sessions = state.sessions.write().await;
        sweep_idle_sessions(&mut sessions, now_unix(), threshold_secs)
    };
    if changed {
        broadcast_presence_snapshot(state).await;
    }
}

pub(crate) fn spawn_idle_sweep(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_idle_sweep(&state).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use confab_core::{PresenceState, Role, UserId};
    use uuid::Uuid;

    use super::sweep_idle_sessions;
    use crate::server::core::{IdentitySnapshot, SessionRecord};

    fn session(user_id: UserId, state: PresenceState, last_activity_unix: i64) -> SessionRecord {
        let mut record = SessionRecord::new(last_activity_unix);
        record.identity = Some(IdentitySnapshot {
            user_id,
            username: String::from("ada"),
            avatar_url: None,
            role: Role::Member,
        });
        record.presence = state;
        record
    }

    #[test]
    fn stale_online_session_is_demoted_and_reported() {
        let user_id = UserId::new();
        let session_id = Uuid::new_v4();
        let mut sessions =
            HashMap::from([(session_id, session(user_id, PresenceState::Online, 0))]);

        let changed = sweep_idle_sessions(&mut sessions, 901, 900);

        assert!(changed);
        assert_eq!(sessions[&session_id].presence, PresenceState::Idle);
    }

    #[test]
    fn fresh_session_is_untouched() {
        let user_id = UserId::new();
        let session_id = Uuid::new_v4();
        let mut sessions =
            HashMap::from([(session_id, session(user_id, PresenceState::Online, 500))]);

        let changed = sweep_idle_sessions(&mut sessions, 901, 900);

        assert!(!changed);
        assert_eq!(sessions[&session_id].presence, PresenceState::Online);
    }

    #[test]
    fn demotion_hidden_by_another_online_session_changes_nothing_visible() {
        let user_id = UserId::new();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let mut sessions = HashMap::from([
            (stale, session(user_id, PresenceState::Online, 0)),
            (fresh, session(user_id, PresenceState::Online, 890)),
        ]);

        let changed = sweep_idle_sessions(&mut sessions, 901, 900);

        assert!(!changed);
        assert_eq!(sessions[&stale].presence, PresenceState::Idle);
        assert_eq!(sessions[&fresh].presence, PresenceState::Online);
    }

    #[test]
    fn dnd_sessions_are_never_demoted() {
        let user_id = UserId::new();
        let session_id = Uuid::new_v4();
        let mut sessions = HashMap::from([(session_id, session(user_id, PresenceState::Dnd, 0))]);

        let changed = sweep_idle_sessions(&mut sessions, 901, 900);

        assert!(!changed);
        assert_eq!(sessions[&session_id].presence, PresenceState::Dnd);
    }
}
