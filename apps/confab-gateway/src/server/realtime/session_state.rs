use confab_core::PresenceState;

use crate::server::core::{IdentitySnapshot, SessionRecord};

/// Records activity on a session. Returns true when the session flipped from
/// idle back to online, which requires a presence rebroadcast.
pub(crate) fn bump_activity(session: &mut SessionRecord, now_unix: i64) -> bool {
    session.last_activity_unix = now_unix;
    if session.presence == PresenceState::Idle {
        session.presence = PresenceState::Online;
        return true;
    }
    false
}

/// Fills the identity of a freshly authenticated session. The snapshot must
/// be fully materialized before the session becomes visible to broadcasts.
pub(crate) fn install_identity(
    session: &mut SessionRecord,
    snapshot: IdentitySnapshot,
    now_unix: i64,
) {
    session.identity = Some(snapshot);
    session.presence = PresenceState::Online;
    session.last_activity_unix = now_unix;
}
