//! Collaborator surface of the gateway. The HTTP tier, admin tooling and
//! tests drive user/channel setup and out-of-band notifications through this
//! handle instead of reaching into gateway state.

use std::collections::HashSet;

use confab_core::{ChannelId, ChannelKind, Role, UserId};

use super::{
    auth::issue_token,
    core::AppState,
    gateway_events::{try_message_deleted, try_message_reaction, try_message_updated},
    realtime::{
        broadcast_presence_snapshot, broadcast_to_channel, broadcast_voice_state,
        participant_user_ids, run_idle_sweep,
    },
};

#[derive(Clone)]
pub struct GatewayHandle {
    state: AppState,
}

impl GatewayHandle {
    pub(crate) fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Registers a user in the directory and returns its id.
    pub async fn register_user(
        &self,
        username: &str,
        avatar_url: Option<&str>,
        role: Role,
    ) -> UserId {
        self.state.users.insert(username, avatar_url, role).await
    }

    /// Mints a bearer token the user presents in an `auth` frame.
    ///
    /// # Errors
    /// Fails for unknown users or when token encryption fails.
    pub async fn issue_token(&self, user_id: UserId) -> anyhow::Result<String> {
        if self.state.users.get(user_id).await.is_none() {
            anyhow::bail!("unknown user");
        }
        issue_token(&self.state, user_id)
    }

    pub async fn suspend_user(&self, user_id: UserId) -> bool {
        self.state.users.suspend(user_id).await
    }

    pub async fn create_channel(&self, name: &str, kind: ChannelKind) -> ChannelId {
        self.state.channels.insert(name, kind, None).await
    }

    pub async fn create_private_channel(
        &self,
        name: &str,
        kind: ChannelKind,
        members: &[UserId],
    ) -> ChannelId {
        let allowed: HashSet<UserId> = members.iter().copied().collect();
        self.state.channels.insert(name, kind, Some(allowed)).await
    }

    /// Profile-update notification. Refreshes the identity snapshots cached
    /// by the user's sessions and any voice participant entry, then
    /// rebroadcasts the affected state.
    pub async fn update_profile(
        &self,
        user_id: UserId,
        username: &str,
        avatar_url: Option<&str>,
    ) -> bool {
        if !self
            .state
            .users
            .update_profile(user_id, username, avatar_url)
            .await
        {
            return false;
        }

        {
            let mut sessions = self.state.sessions.write().await;
            for session in sessions.values_mut() {
                if let Some(identity) = session.identity.as_mut() {
                    if identity.user_id == user_id {
                        username.clone_into(&mut identity.username);
                        identity.avatar_url = avatar_url.map(ToOwned::to_owned);
                    }
                }
            }
        }

        let voice_channel = {
            let mut rooms = self.state.voice.write().await;
            let channel = rooms.active_channel.get(&user_id).copied();
            if let Some(channel_id) = channel {
                if let Some(participant) = rooms
                    .participants
                    .get_mut(&channel_id)
                    .and_then(|participants| participants.get_mut(&user_id))
                {
                    username.clone_into(&mut participant.username);
                    participant.avatar_url = avatar_url.map(ToOwned::to_owned);
                }
            }
            channel
        };

        broadcast_presence_snapshot(&self.state).await;
        if let Some(channel_id) = voice_channel {
            broadcast_voice_state(&self.state, channel_id).await;
        }
        true
    }

    /// Settings-updated notification from the settings collaborator.
    pub async fn apply_settings_update(&self, idle_timeout_minutes: u64) {
        self.state.settings.apply_update(idle_timeout_minutes).await;
    }

    /// Runs one idle sweep immediately, outside the recurring cadence.
    pub async fn run_idle_sweep(&self) {
        run_idle_sweep(&self.state).await;
    }

    /// Current participants of a voice channel.
    pub async fn voice_participants(&self, channel_id: ChannelId) -> Vec<UserId> {
        let rooms = self.state.voice.read().await;
        participant_user_ids(&rooms, channel_id)
    }

    /// Message edit performed through the HTTP tier; fans out
    /// `message:updated` to the channel's subscribers.
    pub async fn update_message(
        &self,
        channel_id: ChannelId,
        message_id: &str,
        content: &str,
    ) -> bool {
        let Some(message) = self
            .state
            .messages
            .update(channel_id, message_id, content.to_owned())
            .await
        else {
            return false;
        };
        match try_message_updated(&message) {
            Ok(event) => broadcast_to_channel(&self.state, channel_id, &event).await,
            Err(error) => {
                tracing::error!(
                    event = "gateway.handle.serialize_failed",
                    channel_id = %channel_id,
                    error = %error
                );
            }
        }
        true
    }

    pub async fn delete_message(&self, channel_id: ChannelId, message_id: &str) -> bool {
        if !self.state.messages.remove(channel_id, message_id).await {
            return false;
        }
        match try_message_deleted(channel_id, message_id) {
            Ok(event) => broadcast_to_channel(&self.state, channel_id, &event).await,
            Err(error) => {
                tracing::error!(
                    event = "gateway.handle.serialize_failed",
                    channel_id = %channel_id,
                    error = %error
                );
            }
        }
        true
    }

    pub async fn react_to_message(
        &self,
        channel_id: ChannelId,
        message_id: &str,
        emoji: &str,
        user_id: UserId,
    ) -> bool {
        let Some(count) = self
            .state
            .messages
            .react(channel_id, message_id, emoji, user_id)
            .await
        else {
            return false;
        };
        match try_message_reaction(channel_id, message_id, emoji, user_id, count) {
            Ok(event) => broadcast_to_channel(&self.state, channel_id, &event).await,
            Err(error) => {
                tracing::error!(
                    event = "gateway.handle.serialize_failed",
                    channel_id = %channel_id,
                    error = %error
                );
            }
        }
        true
    }

    /// Kills the media worker. Affected rooms are invalidated and their
    /// participants treated as force-left.
    pub async fn fail_sfu_worker(&self) {
        self.state.sfu.fail_worker().await;
    }

    /// Cancels the recurring timers and any pending grace timers.
    pub async fn shutdown(&self) {
        if let Ok(mut tasks) = self.state.background.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        let mut grace = self.state.grace.write().await;
        for (_, entry) in grace.drain() {
            entry.task.abort();
        }
    }
}
