//! In-memory collaborator stores. The gateway consumes these through their
//! methods only; an external deployment swaps the backing storage without
//! touching the realtime layer.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use confab_core::{ChannelId, ChannelKind, Role, UserId};
use serde::Serialize;
use tokio::sync::RwLock;
use ulid::Ulid;

#[derive(Debug, Clone)]
pub(crate) struct UserProfile {
    pub(crate) username: String,
    pub(crate) avatar_url: Option<String>,
    pub(crate) role: Role,
    pub(crate) suspended: bool,
}

#[derive(Clone)]
pub(crate) struct UserDirectory {
    users: Arc<RwLock<HashMap<UserId, UserProfile>>>,
}

impl UserDirectory {
    pub(crate) fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub(crate) async fn insert(
        &self,
        username: &str,
        avatar_url: Option<&str>,
        role: Role,
    ) -> UserId {
        let user_id = UserId::new();
        self.users.write().await.insert(
            user_id,
            UserProfile {
                username: username.to_owned(),
                avatar_url: avatar_url.map(ToOwned::to_owned),
                role,
                suspended: false,
            },
        );
        user_id
    }

    pub(crate) async fn get(&self, user_id: UserId) -> Option<UserProfile> {
        self.users.read().await.get(&user_id).cloned()
    }

    pub(crate) async fn suspend(&self, user_id: UserId) -> bool {
        let mut users = self.users.write().await;
        match users.get_mut(&user_id) {
            Some(profile) => {
                profile.suspended = true;
                true
            }
            None => false,
        }
    }

    pub(crate) async fn update_profile(
        &self,
        user_id: UserId,
        username: &str,
        avatar_url: Option<&str>,
    ) -> bool {
        let mut users = self.users.write().await;
        match users.get_mut(&user_id) {
            Some(profile) => {
                username.clone_into(&mut profile.username);
                profile.avatar_url = avatar_url.map(ToOwned::to_owned);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ChannelRecord {
    pub(crate) name: String,
    pub(crate) kind: ChannelKind,
    /// `None` means the channel is open to every authenticated user.
    pub(crate) allowed: Option<HashSet<UserId>>,
}

#[derive(Clone)]
pub(crate) struct ChannelDirectory {
    channels: Arc<RwLock<HashMap<ChannelId, ChannelRecord>>>,
}

impl ChannelDirectory {
    pub(crate) fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub(crate) async fn insert(
        &self,
        name: &str,
        kind: ChannelKind,
        allowed: Option<HashSet<UserId>>,
    ) -> ChannelId {
        let channel_id = ChannelId::new();
        self.channels.write().await.insert(
            channel_id,
            ChannelRecord {
                name: name.to_owned(),
                kind,
                allowed,
            },
        );
        channel_id
    }

    pub(crate) async fn get(&self, channel_id: ChannelId) -> Option<ChannelRecord> {
        self.channels.read().await.get(&channel_id).cloned()
    }

    /// Access check used by channel subscription and message delivery. A
    /// missing channel and a restricted one are indistinguishable to the
    /// caller.
    pub(crate) async fn can_access(&self, channel_id: ChannelId, user_id: UserId) -> bool {
        let channels = self.channels.read().await;
        match channels.get(&channel_id) {
            Some(record) => record
                .allowed
                .as_ref()
                .is_none_or(|allowed| allowed.contains(&user_id)),
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MessageRecord {
    pub(crate) id: String,
    pub(crate) author_id: UserId,
    pub(crate) author_username: String,
    pub(crate) content: String,
    pub(crate) created_at_unix: i64,
    pub(crate) reactions: HashMap<String, HashSet<UserId>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageResponse {
    pub(crate) id: String,
    pub(crate) channel_id: String,
    pub(crate) author_id: String,
    pub(crate) author_username: String,
    pub(crate) content: String,
    pub(crate) created_at_unix: i64,
}

impl MessageResponse {
    fn from_record(channel_id: ChannelId, record: &MessageRecord) -> Self {
        Self {
            id: record.id.clone(),
            channel_id: channel_id.to_string(),
            author_id: record.author_id.to_string(),
            author_username: record.author_username.clone(),
            content: record.content.clone(),
            created_at_unix: record.created_at_unix,
        }
    }
}

#[derive(Clone)]
pub(crate) struct MessageStore {
    messages: Arc<RwLock<HashMap<ChannelId, Vec<MessageRecord>>>>,
}

impl MessageStore {
    pub(crate) fn new() -> Self {
        Self {
            messages: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub(crate) async fn append(
        &self,
        channel_id: ChannelId,
        author_id: UserId,
        author_username: &str,
        content: String,
        now_unix: i64,
    ) -> MessageResponse {
        let record = MessageRecord {
            id: Ulid::new().to_string(),
            author_id,
            author_username: author_username.to_owned(),
            content,
            created_at_unix: now_unix,
            reactions: HashMap::new(),
        };
        let response = MessageResponse::from_record(channel_id, &record);
        self.messages
            .write()
            .await
            .entry(channel_id)
            .or_default()
            .push(record);
        response
    }

    pub(crate) async fn update(
        &self,
        channel_id: ChannelId,
        message_id: &str,
        content: String,
    ) -> Option<MessageResponse> {
        let mut messages = self.messages.write().await;
        let record = messages
            .get_mut(&channel_id)?
            .iter_mut()
            .find(|record| record.id == message_id)?;
        record.content = content;
        Some(MessageResponse::from_record(channel_id, record))
    }

    pub(crate) async fn remove(&self, channel_id: ChannelId, message_id: &str) -> bool {
        let mut messages = self.messages.write().await;
        let Some(records) = messages.get_mut(&channel_id) else {
            return false;
        };
        let before = records.len();
        records.retain(|record| record.id != message_id);
        records.len() != before
    }

    /// Toggles the user's reaction; returns the new count for the emoji.
    pub(crate) async fn react(
        &self,
        channel_id: ChannelId,
        message_id: &str,
        emoji: &str,
        user_id: UserId,
    ) -> Option<usize> {
        let mut messages = self.messages.write().await;
        let record = messages
            .get_mut(&channel_id)?
            .iter_mut()
            .find(|record| record.id == message_id)?;
        let reactors = record.reactions.entry(emoji.to_owned()).or_default();
        if !reactors.insert(user_id) {
            reactors.remove(&user_id);
        }
        let count = reactors.len();
        if count == 0 {
            record.reactions.remove(emoji);
        }
        Some(count)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GatewaySettings {
    pub(crate) idle_timeout_minutes: u64,
}

/// Cached view of the settings collaborator. The cache survives collaborator
/// outages; `apply_update` is the settings-updated notification surface.
#[derive(Clone)]
pub(crate) struct SettingsStore {
    settings: Arc<RwLock<GatewaySettings>>,
}

impl SettingsStore {
    pub(crate) fn new(idle_timeout_minutes: u64) -> Self {
        Self {
            settings: Arc::new(RwLock::new(GatewaySettings {
                idle_timeout_minutes,
            })),
        }
    }

    pub(crate) async fn idle_timeout_secs(&self) -> i64 {
        let minutes = self.settings.read().await.idle_timeout_minutes;
        i64::try_from(minutes.saturating_mul(60)).unwrap_or(i64::MAX)
    }

    pub(crate) async fn apply_update(&self, idle_timeout_minutes: u64) {
        self.settings.write().await.idle_timeout_minutes = idle_timeout_minutes;
    }
}
