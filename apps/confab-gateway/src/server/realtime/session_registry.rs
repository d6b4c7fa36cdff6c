use std::collections::{HashMap, HashSet};

use confab_core::UserId;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::server::core::{SessionControl, SessionRecord};

pub(crate) fn attach_session(
    user_sessions: &mut HashMap<UserId, HashSet<Uuid>>,
    user_id: UserId,
    session_id: Uuid,
) {
    user_sessions.entry(user_id).or_default().insert(session_id);
}

/// Detaches a session from its user. Returns true when the user's session
/// set became empty, which means the user went offline.
pub(crate) fn detach_session(
    user_sessions: &mut HashMap<UserId, HashSet<Uuid>>,
    user_id: UserId,
    session_id: Uuid,
) -> bool {
    let Some(sessions) = user_sessions.get_mut(&user_id) else {
        return false;
    };
    sessions.remove(&session_id);
    if sessions.is_empty() {
        user_sessions.remove(&user_id);
        return true;
    }
    false
}

pub(crate) fn sessions_of_user(
    user_sessions: &HashMap<UserId, HashSet<Uuid>>,
    user_id: UserId,
) -> Vec<Uuid> {
    user_sessions
        .get(&user_id)
        .into_iter()
        .flat_map(|sessions| sessions.iter().copied())
        .collect()
}

pub(crate) fn remove_session_state(
    sessions: &mut HashMap<Uuid, SessionRecord>,
    controls: &mut HashMap<Uuid, watch::Sender<SessionControl>>,
    senders: &mut HashMap<Uuid, mpsc::Sender<String>>,
    session_id: Uuid,
) -> Option<SessionRecord> {
    let removed = sessions.remove(&session_id);
    controls.remove(&session_id);
    senders.remove(&session_id);
    removed
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use confab_core::UserId;
    use tokio::sync::{mpsc, watch};
    use uuid::Uuid;

    use super::{attach_session, detach_session, remove_session_state, sessions_of_user};
    use crate::server::core::{SessionControl, SessionRecord};

    #[test]
    fn detach_reports_offline_only_when_last_session_goes() {
        let user_id = UserId::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut user_sessions = HashMap::new();
        attach_session(&mut user_sessions, user_id, first);
        attach_session(&mut user_sessions, user_id, second);

        assert!(!detach_session(&mut user_sessions, user_id, first));
        assert!(detach_session(&mut user_sessions, user_id, second));
        assert!(!user_sessions.contains_key(&user_id));
    }

    #[test]
    fn detach_of_unknown_user_is_a_no_op() {
        let mut user_sessions = HashMap::new();
        assert!(!detach_session(&mut user_sessions, UserId::new(), Uuid::new_v4()));
    }

    #[test]
    fn sessions_of_user_lists_only_that_user() {
        let target = UserId::new();
        let other = UserId::new();
        let target_session = Uuid::new_v4();
        let other_session = Uuid::new_v4();
        let mut user_sessions = HashMap::new();
        attach_session(&mut user_sessions, target, target_session);
        attach_session(&mut user_sessions, other, other_session);

        let listed = sessions_of_user(&user_sessions, target);
        assert_eq!(listed, vec![target_session]);
    }

    #[test]
    fn removes_session_controls_and_sender_together() {
        let session_id = Uuid::new_v4();
        let mut sessions = HashMap::from([(session_id, SessionRecord::new(1))]);
        let (control_tx, _control_rx) = watch::channel(SessionControl::Open);
        let mut controls = HashMap::from([(session_id, control_tx)]);
        let (sender_tx, _sender_rx) = mpsc::channel::<String>(1);
        let mut senders = HashMap::from([(session_id, sender_tx)]);

        let removed = remove_session_state(&mut sessions, &mut controls, &mut senders, session_id);

        assert!(removed.is_some());
        assert!(sessions.is_empty());
        assert!(controls.is_empty());
        assert!(senders.is_empty());
    }

    #[test]
    fn remove_returns_none_for_unknown_session_but_prunes_other_maps() {
        let session_id = Uuid::new_v4();
        let (control_tx, _control_rx) = watch::channel(SessionControl::Open);
        let mut controls = HashMap::from([(session_id, control_tx)]);
        let (sender_tx, _sender_rx) = mpsc::channel::<String>(1);
        let mut senders = HashMap::from([(session_id, sender_tx)]);

        let removed =
            remove_session_state(&mut HashMap::new(), &mut controls, &mut senders, session_id);

        assert!(removed.is_none());
        assert!(controls.is_empty());
        assert!(senders.is_empty());
    }
}
