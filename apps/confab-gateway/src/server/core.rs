use std::{
    collections::{HashMap, HashSet},
    net::{IpAddr, Ipv4Addr},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use confab_core::{ChannelId, PresenceState, Role, UserId};
use pasetors::{keys::SymmetricKey, version4::V4};
use rand::{rngs::OsRng, TryRngCore};
use tokio::{
    sync::{mpsc, watch, RwLock},
    task::JoinHandle,
};
use uuid::Uuid;

use super::{
    directory::{ChannelDirectory, MessageStore, SettingsStore, UserDirectory},
    realtime::{spawn_sfu_control, SfuHandle, SfuLifecycleEvent},
};

pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_MAX_FRAME_BYTES: usize = confab_protocol::MAX_FRAME_BYTES;
pub const DEFAULT_IDLE_TIMEOUT_MINUTES: u64 = 15;
pub const GRACE_PERIOD_SECS: u64 = 15;
pub const VOICE_SIGNAL_WINDOW_SECS: i64 = 5;
pub const VOICE_SIGNAL_WINDOW_BUDGET: u32 = 400;
pub const IDLE_SWEEP_INTERVAL_SECS: u64 = 60;
pub const WS_PING_INTERVAL_SECS: u64 = 30;
pub const ACCESS_TOKEN_TTL_SECS: u64 = 15 * 60;
pub const DEFAULT_SFU_MAX_TRANSPORTS_PER_PEER: usize = 4;
pub const DEFAULT_SFU_MAX_PRODUCERS_PER_PEER: usize = 4;
pub const DEFAULT_SFU_PORT_RANGE: (u16, u16) = (40_000, 49_999);

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub outbound_queue: usize,
    pub max_frame_bytes: usize,
    pub grace_period: Duration,
    pub signal_window_secs: i64,
    pub signal_window_budget: u32,
    pub idle_sweep_interval: Duration,
    pub idle_timeout_minutes: u64,
    pub sfu: SfuConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            grace_period: Duration::from_secs(GRACE_PERIOD_SECS),
            signal_window_secs: VOICE_SIGNAL_WINDOW_SECS,
            signal_window_budget: VOICE_SIGNAL_WINDOW_BUDGET,
            idle_sweep_interval: Duration::from_secs(IDLE_SWEEP_INTERVAL_SECS),
            idle_timeout_minutes: DEFAULT_IDLE_TIMEOUT_MINUTES,
            sfu: SfuConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SfuConfig {
    pub enabled: bool,
    pub audio_only: bool,
    pub listen_ip: IpAddr,
    pub announced_ip: Option<IpAddr>,
    pub port_range: (u16, u16),
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_tcp: bool,
    pub max_transports_per_peer: usize,
    pub max_producers_per_peer: usize,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            audio_only: true,
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            announced_ip: None,
            port_range: DEFAULT_SFU_PORT_RANGE,
            enable_udp: true,
            enable_tcp: true,
            prefer_tcp: false,
            max_transports_per_peer: DEFAULT_SFU_MAX_TRANSPORTS_PER_PEER,
            max_producers_per_peer: DEFAULT_SFU_MAX_PRODUCERS_PER_PEER,
        }
    }
}

#[derive(Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) outbound_queue: usize,
    pub(crate) max_frame_bytes: usize,
    pub(crate) grace_period: Duration,
    pub(crate) signal_window_secs: i64,
    pub(crate) signal_window_budget: u32,
    pub(crate) sfu_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionControl {
    Open,
    Close,
}

#[derive(Debug, Clone)]
pub(crate) struct IdentitySnapshot {
    pub(crate) user_id: UserId,
    pub(crate) username: String,
    pub(crate) avatar_url: Option<String>,
    pub(crate) role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SignalWindow {
    pub(crate) started_unix: i64,
    pub(crate) count: u32,
    pub(crate) notified: bool,
}

impl SignalWindow {
    pub(crate) fn new(now_unix: i64) -> Self {
        Self {
            started_unix: now_unix,
            count: 0,
            notified: false,
        }
    }
}

/// Per-socket state. Created unauthenticated on accept; identity is filled
/// by a successful `auth` frame.
#[derive(Debug, Clone)]
pub(crate) struct SessionRecord {
    pub(crate) identity: Option<IdentitySnapshot>,
    pub(crate) presence: PresenceState,
    pub(crate) last_activity_unix: i64,
    pub(crate) joined_channels: HashSet<ChannelId>,
    pub(crate) active_voice_channel: Option<ChannelId>,
    pub(crate) signal_window: SignalWindow,
}

impl SessionRecord {
    pub(crate) fn new(now_unix: i64) -> Self {
        Self {
            identity: None,
            presence: PresenceState::Online,
            last_activity_unix: now_unix,
            joined_channels: HashSet::new(),
            active_voice_channel: None,
            signal_window: SignalWindow::new(now_unix),
        }
    }

    pub(crate) fn user_id(&self) -> Option<UserId> {
        self.identity.as_ref().map(|identity| identity.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VoiceParticipant {
    pub(crate) username: String,
    pub(crate) avatar_url: Option<String>,
    pub(crate) muted: bool,
    pub(crate) deafened: bool,
}

/// Voice membership state. `participants` holds at most one entry per user
/// across all channels; `active_channel` names that channel; `session_counts`
/// tracks how many sockets of the user currently claim it.
#[derive(Default)]
pub(crate) struct VoiceRooms {
    pub(crate) participants: HashMap<ChannelId, HashMap<UserId, VoiceParticipant>>,
    pub(crate) active_channel: HashMap<UserId, ChannelId>,
    pub(crate) session_counts: HashMap<UserId, u32>,
}

pub(crate) struct GraceEntry {
    pub(crate) channel_id: ChannelId,
    pub(crate) task: JoinHandle<()>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) sessions: Arc<RwLock<HashMap<Uuid, SessionRecord>>>,
    pub(crate) senders: Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>,
    pub(crate) controls: Arc<RwLock<HashMap<Uuid, watch::Sender<SessionControl>>>>,
    pub(crate) user_sessions: Arc<RwLock<HashMap<UserId, HashSet<Uuid>>>>,
    pub(crate) channel_sessions: Arc<RwLock<HashMap<ChannelId, HashSet<Uuid>>>>,
    pub(crate) voice: Arc<RwLock<VoiceRooms>>,
    pub(crate) grace: Arc<RwLock<HashMap<UserId, GraceEntry>>>,
    pub(crate) users: UserDirectory,
    pub(crate) channels: ChannelDirectory,
    pub(crate) messages: MessageStore,
    pub(crate) settings: SettingsStore,
    pub(crate) sfu: SfuHandle,
    pub(crate) token_key: Arc<SymmetricKey<V4>>,
    pub(crate) runtime: Arc<RuntimeConfig>,
    pub(crate) background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AppState {
    pub(crate) fn new(
        config: &GatewayConfig,
    ) -> anyhow::Result<(Self, mpsc::Receiver<SfuLifecycleEvent>)> {
        let mut key_bytes = [0_u8; 32];
        OsRng
            .try_fill_bytes(&mut key_bytes)
            .map_err(|e| anyhow!("token key rng failed: {e}"))?;
        let token_key = SymmetricKey::<V4>::from(&key_bytes)
            .map_err(|e| anyhow!("token key init failed: {e}"))?;

        let (sfu, sfu_events, sfu_task) = spawn_sfu_control(config.sfu.clone());

        let state = Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            senders: Arc::new(RwLock::new(HashMap::new())),
            controls: Arc::new(RwLock::new(HashMap::new())),
            user_sessions: Arc::new(RwLock::new(HashMap::new())),
            channel_sessions: Arc::new(RwLock::new(HashMap::new())),
            voice: Arc::new(RwLock::new(VoiceRooms::default())),
            grace: Arc::new(RwLock::new(HashMap::new())),
            users: UserDirectory::new(),
            channels: ChannelDirectory::new(),
            messages: MessageStore::new(),
            settings: SettingsStore::new(config.idle_timeout_minutes),
            sfu,
            token_key: Arc::new(token_key),
            runtime: Arc::new(RuntimeConfig {
                outbound_queue: config.outbound_queue,
                max_frame_bytes: config.max_frame_bytes,
                grace_period: config.grace_period,
                signal_window_secs: config.signal_window_secs,
                signal_window_budget: config.signal_window_budget,
                sfu_enabled: config.sfu.enabled,
            }),
            background: Arc::new(Mutex::new(vec![sfu_task])),
        };

        Ok((state, sfu_events))
    }

    pub(crate) fn track_background_task(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.background.lock() {
            tasks.push(task);
        }
    }
}
