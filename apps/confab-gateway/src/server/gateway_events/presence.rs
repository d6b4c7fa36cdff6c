use confab_core::PresenceState;
use serde::Serialize;

use super::{envelope::try_build_event, GatewayEvent};

pub(crate) const PRESENCE_UPDATE_EVENT: &str = "presence:update";

/// One aggregated per-user row of the presence snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PresenceEntry {
    pub(crate) id: String,
    pub(crate) username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) avatar_url: Option<String>,
    pub(crate) state: PresenceState,
}

#[derive(Serialize)]
struct PresenceUpdatePayload {
    users: Vec<PresenceEntry>,
}

pub(crate) fn try_presence_update(users: Vec<PresenceEntry>) -> anyhow::Result<GatewayEvent> {
    try_build_event(PRESENCE_UPDATE_EVENT, PresenceUpdatePayload { users })
}
