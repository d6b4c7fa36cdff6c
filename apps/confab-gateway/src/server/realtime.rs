mod channel_subscriptions;
mod fanout;
mod fanout_dispatch;
mod ingress_command;
mod ingress_frame;
mod presence_aggregate;
mod presence_idle_sweep;
mod session_registry;
mod session_state;
mod sfu_contract;
mod sfu_control;
mod sfu_dispatch;
mod sfu_events;
mod signal_budget;
mod voice_cleanup;
mod voice_grace;
mod voice_rooms;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use confab_core::{ChannelId, ChannelKind, PresenceState, UserId};
use confab_protocol::parse_frame;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::{
    auth::{now_unix, snapshot_identity, verify_token},
    core::{AppState, SessionControl, SessionRecord, WS_PING_INTERVAL_SECS},
    errors::{ErrorCode, GatewayError},
    gateway_events::{
        try_auth_ok, try_channel_joined, try_channel_left, try_error, try_message_new, try_pong,
        try_voice_signal, try_voice_state, GatewayEvent,
    },
    metrics::{record_event_dropped, record_ws_disconnect},
};

use channel_subscriptions::{
    add_channel_subscription, clear_session_subscriptions, remove_channel_subscription,
};
pub(crate) use fanout::{
    broadcast_presence_snapshot, broadcast_to_channel, broadcast_to_users, broadcast_voice_state,
};
use ingress_command::{parse_client_command, ClientCommand};
use ingress_frame::{decode_ingress_message, IngressDecode};
use presence_aggregate::set_self_state;
pub(crate) use presence_idle_sweep::{run_idle_sweep, spawn_idle_sweep};
use session_registry::{attach_session, detach_session, remove_session_state, sessions_of_user};
use session_state::{bump_activity, install_identity};
pub(crate) use sfu_contract::{SfuHandle, SfuLifecycleEvent};
pub(crate) use sfu_control::spawn_sfu_control;
use sfu_dispatch::handle_sfu_request;
pub(crate) use sfu_events::spawn_sfu_event_task;
use signal_budget::{note_signal, SignalVerdict};
use voice_cleanup::teardown_voice_peer;
use voice_grace::{arm_grace_timer, cancel_grace_timer};
pub(crate) use voice_rooms::{collect_voice_snapshots, participant_user_ids, populated_channels};
use voice_rooms::{
    apply_grace_restore, apply_self_state, apply_session_disconnect, apply_voice_join,
    apply_voice_leave, DisconnectVoiceOutcome, VoiceLeaveOutcome,
};

pub(crate) async fn gateway_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        handle_gateway_socket(state, socket).await;
    })
}

pub(crate) async fn handle_gateway_socket(state: AppState, socket: WebSocket) {
    let session_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let slow_consumer_disconnect = Arc::new(AtomicBool::new(false));

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(state.runtime.outbound_queue);
    state
        .senders
        .write()
        .await
        .insert(session_id, outbound_tx.clone());
    let (control_tx, mut control_rx) = watch::channel(SessionControl::Open);
    state.controls.write().await.insert(session_id, control_tx);
    state
        .sessions
        .write()
        .await
        .insert(session_id, SessionRecord::new(now_unix()));

    let slow_consumer_disconnect_send = Arc::clone(&slow_consumer_disconnect);
    let send_task = tokio::spawn(async move {
        let mut ping_interval =
            tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if sink.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                control_change = control_rx.changed() => {
                    if control_change.is_ok() && *control_rx.borrow() == SessionControl::Close {
                        slow_consumer_disconnect_send.store(true, Ordering::Relaxed);
                        record_ws_disconnect("slow_consumer");
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: 1008,
                                reason: "slow_consumer".into(),
                            })))
                            .await;
                        break;
                    }
                }
                maybe_payload = outbound_rx.recv() => {
                    match maybe_payload {
                        Some(payload) => {
                            if sink.send(Message::Text(payload.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let mut disconnect_reason = "connection_closed";
    while let Some(incoming) = stream.next().await {
        let Ok(message) = incoming else {
            disconnect_reason = "socket_error";
            break;
        };

        let payload = match decode_ingress_message(message) {
            IngressDecode::Frame(payload) => payload,
            IngressDecode::Ignore => continue,
            IngressDecode::Disconnect(reason) => {
                disconnect_reason = reason;
                break;
            }
        };

        if payload.len() > state.runtime.max_frame_bytes {
            send_error(
                &outbound_tx,
                &GatewayError::with_message(ErrorCode::InvalidEvent, "frame exceeds size limit"),
            );
            continue;
        }

        let envelope = match parse_frame(&payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                send_error(
                    &outbound_tx,
                    &GatewayError::with_message(ErrorCode::InvalidEvent, error.to_string()),
                );
                continue;
            }
        };

        let command = match parse_client_command(envelope) {
            Ok(command) => command,
            Err(error) => {
                send_error(&outbound_tx, &error);
                continue;
            }
        };

        dispatch_command(&state, session_id, &outbound_tx, command).await;
    }

    if !slow_consumer_disconnect.load(Ordering::Relaxed) {
        record_ws_disconnect(disconnect_reason);
    }
    teardown_session(&state, session_id).await;
    send_task.abort();
}

fn send_error(outbound_tx: &mpsc::Sender<String>, error: &GatewayError) {
    match try_error(error.code.as_str(), &error.message) {
        Ok(event) => enqueue_event(outbound_tx, &event),
        Err(serialize_error) => {
            tracing::error!(
                event = "gateway.read_loop.serialize_failed",
                error = %serialize_error
            );
        }
    }
}

fn enqueue_event(outbound_tx: &mpsc::Sender<String>, event: &GatewayEvent) {
    if outbound_tx.try_send(event.payload.clone()).is_err() {
        record_event_dropped("session", event.event_type, "full_queue");
    }
}

fn enqueue_or_report(
    outbound_tx: &mpsc::Sender<String>,
    event: anyhow::Result<GatewayEvent>,
    context: &'static str,
) {
    match event {
        Ok(event) => enqueue_event(outbound_tx, &event),
        Err(error) => {
            tracing::error!(
                event = "gateway.read_loop.serialize_failed",
                context,
                error = %error
            );
            send_error(outbound_tx, &GatewayError::new(ErrorCode::WsError));
        }
    }
}

async fn dispatch_command(
    state: &AppState,
    session_id: Uuid,
    outbound_tx: &mpsc::Sender<String>,
    command: ClientCommand,
) {
    tracing::debug!(
        event = "gateway.ingress",
        session_id = %session_id,
        kind = command.kind()
    );

    let authenticated_user = {
        let sessions = state.sessions.read().await;
        sessions
            .get(&session_id)
            .and_then(SessionRecord::user_id)
    };

    if let ClientCommand::Auth { token } = &command {
        handle_auth(state, session_id, outbound_tx, token, authenticated_user).await;
        return;
    }
    let Some(user_id) = authenticated_user else {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::Unauthorized));
        return;
    };

    // Any authenticated frame counts as activity.
    let presence_flipped = {
        let mut sessions = state.sessions.write().await;
        sessions
            .get_mut(&session_id)
            .is_some_and(|session| bump_activity(session, now_unix()))
    };
    if presence_flipped {
        broadcast_presence_snapshot(state).await;
    }

    match command {
        // Handled before the activity bump.
        ClientCommand::Auth { .. } => {}
        ClientCommand::PresenceSet { state: presence } => {
            handle_presence_set(state, user_id, presence).await;
        }
        ClientCommand::ChannelJoin { channel_id } => {
            handle_channel_join(state, session_id, outbound_tx, user_id, channel_id).await;
        }
        ClientCommand::ChannelLeave { channel_id } => {
            handle_channel_leave(state, session_id, outbound_tx, channel_id).await;
        }
        ClientCommand::VoiceJoin {
            channel_id,
            muted,
            deafened,
        } => {
            handle_voice_join(state, session_id, outbound_tx, user_id, channel_id, muted, deafened)
                .await;
        }
        ClientCommand::VoiceLeave { channel_id } => {
            handle_voice_leave(state, session_id, outbound_tx, user_id, channel_id).await;
        }
        ClientCommand::VoiceSelfState {
            channel_id,
            muted,
            deafened,
        } => {
            handle_voice_self_state(state, outbound_tx, user_id, channel_id, muted, deafened).await;
        }
        ClientCommand::SfuRequest(request) => {
            handle_sfu_request(state, session_id, outbound_tx, request).await;
        }
        ClientCommand::VoiceSignal {
            channel_id,
            target_user_id,
            data,
        } => {
            handle_voice_signal(
                state,
                session_id,
                outbound_tx,
                user_id,
                channel_id,
                target_user_id,
                &data,
            )
            .await;
        }
        ClientCommand::MessageSend {
            channel_id,
            content,
        } => {
            handle_message_send(state, outbound_tx, user_id, channel_id, content).await;
        }
        ClientCommand::Ping => enqueue_or_report(outbound_tx, try_pong(), "pong"),
    }
}

async fn handle_auth(
    state: &AppState,
    session_id: Uuid,
    outbound_tx: &mpsc::Sender<String>,
    token: &str,
    authenticated_user: Option<UserId>,
) {
    if authenticated_user.is_some() {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::AlreadyAuthenticated));
        return;
    }

    let Ok(user_id) = verify_token(state, token) else {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::InvalidAuth));
        return;
    };
    let Some(profile) = state.users.get(user_id).await else {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::InvalidAuth));
        return;
    };
    if profile.suspended {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::AccountSuspended));
        return;
    }
    let Some(snapshot) = snapshot_identity(state, user_id).await else {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::InvalidAuth));
        return;
    };

    let role = snapshot.role;

    // Attach only after the snapshot is materialized so presence broadcasts
    // never observe a half-initialized session.
    {
        let mut sessions = state.sessions.write().await;
        let Some(session) = sessions.get_mut(&session_id) else {
            return;
        };
        install_identity(session, snapshot, now_unix());
    }
    {
        let mut user_sessions = state.user_sessions.write().await;
        attach_session(&mut user_sessions, user_id, session_id);
    }
    tracing::info!(
        event = "gateway.auth.ok",
        session_id = %session_id,
        user_id = %user_id,
        role = ?role
    );

    let restored = {
        let mut grace = state.grace.write().await;
        cancel_grace_timer(&mut grace, user_id)
    };
    let rebound = {
        let mut rooms = state.voice.write().await;
        // The timer may have been consumed concurrently without finishing
        // its teardown; an unclaimed binding is restorable either way.
        let channel_id = restored.or_else(|| {
            rooms
                .active_channel
                .get(&user_id)
                .copied()
                .filter(|_| rooms.session_counts.get(&user_id).copied().unwrap_or(0) == 0)
        });
        channel_id.filter(|channel_id| apply_grace_restore(&mut rooms, user_id, *channel_id))
    };
    if let Some(channel_id) = rebound {
        let mut sessions = state.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.active_voice_channel = Some(channel_id);
        }
    }

    enqueue_or_report(outbound_tx, try_auth_ok(user_id), "auth_ok");

    broadcast_presence_snapshot(state).await;

    // Repaint the voice sidebar: one snapshot per populated channel.
    let snapshots = {
        let rooms = state.voice.read().await;
        populated_channels(&rooms)
            .into_iter()
            .map(|channel_id| (channel_id, collect_voice_snapshots(&rooms, channel_id)))
            .collect::<Vec<_>>()
    };
    for (channel_id, participants) in snapshots {
        enqueue_or_report(
            outbound_tx,
            try_voice_state(channel_id, participants),
            "voice_state_snapshot",
        );
    }
}

async fn handle_presence_set(state: &AppState, user_id: UserId, presence: PresenceState) {
    let targets = {
        let user_sessions = state.user_sessions.read().await;
        sessions_of_user(&user_sessions, user_id)
    };
    {
        let mut sessions = state.sessions.write().await;
        set_self_state(&mut sessions, &targets, presence, now_unix());
    }
    broadcast_presence_snapshot(state).await;
}

async fn handle_channel_join(
    state: &AppState,
    session_id: Uuid,
    outbound_tx: &mpsc::Sender<String>,
    user_id: UserId,
    channel_id: ChannelId,
) {
    if !state.channels.can_access(channel_id, user_id).await {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::ChannelNotFound));
        return;
    }

    {
        let mut channel_sessions = state.channel_sessions.write().await;
        let mut sessions = state.sessions.write().await;
        let Some(session) = sessions.get_mut(&session_id) else {
            return;
        };
        add_channel_subscription(
            &mut channel_sessions,
            &mut session.joined_channels,
            channel_id,
            session_id,
        );
    }

    enqueue_or_report(outbound_tx, try_channel_joined(channel_id), "channel_joined");
}

async fn handle_channel_leave(
    state: &AppState,
    session_id: Uuid,
    outbound_tx: &mpsc::Sender<String>,
    channel_id: ChannelId,
) {
    {
        let mut channel_sessions = state.channel_sessions.write().await;
        let mut sessions = state.sessions.write().await;
        let Some(session) = sessions.get_mut(&session_id) else {
            return;
        };
        remove_channel_subscription(
            &mut channel_sessions,
            &mut session.joined_channels,
            channel_id,
            session_id,
        );
    }

    enqueue_or_report(outbound_tx, try_channel_left(channel_id), "channel_left");
}

async fn handle_voice_join(
    state: &AppState,
    session_id: Uuid,
    outbound_tx: &mpsc::Sender<String>,
    user_id: UserId,
    channel_id: ChannelId,
    muted: bool,
    deafened: bool,
) {
    let Some(record) = state.channels.get(channel_id).await else {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::ChannelNotFound));
        return;
    };
    if record.kind != ChannelKind::Voice {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::InvalidVoiceChannel));
        return;
    }

    let outcome = {
        let mut rooms = state.voice.write().await;
        let mut sessions = state.sessions.write().await;
        let Some(session) = sessions.get_mut(&session_id) else {
            return;
        };
        let Some(identity) = session.identity.clone() else {
            return;
        };
        apply_voice_join(
            &mut rooms,
            &mut session.active_voice_channel,
            user_id,
            channel_id,
            &identity.username,
            identity.avatar_url.as_deref(),
            muted,
            deafened,
        )
    };

    tracing::debug!(
        event = "gateway.voice.join",
        user_id = %user_id,
        channel_id = %channel_id,
        channel = %record.name,
        session_count = outcome.session_count
    );

    // The old channel is fully unwound and announced before the new
    // channel's state goes out.
    if let Some(previous) = outcome.forced_leave {
        teardown_voice_peer(state, user_id, previous).await;
    }
    state.sfu.ensure_peer(channel_id, user_id).await;
    broadcast_voice_state(state, channel_id).await;
}

async fn handle_voice_leave(
    state: &AppState,
    session_id: Uuid,
    outbound_tx: &mpsc::Sender<String>,
    user_id: UserId,
    channel_id: Option<ChannelId>,
) {
    let (outcome, target) = {
        let mut rooms = state.voice.write().await;
        let mut sessions = state.sessions.write().await;
        let Some(session) = sessions.get_mut(&session_id) else {
            return;
        };
        let target = channel_id.or(session.active_voice_channel);
        (
            apply_voice_leave(
                &mut rooms,
                &mut session.active_voice_channel,
                user_id,
                channel_id,
            ),
            target,
        )
    };

    match outcome {
        VoiceLeaveOutcome::NotJoined => {
            send_error(outbound_tx, &GatewayError::new(ErrorCode::VoiceNotJoined));
        }
        VoiceLeaveOutcome::RemainingSessions(_) => {}
        VoiceLeaveOutcome::Removed => {
            if let Some(channel_id) = target {
                teardown_voice_peer(state, user_id, channel_id).await;
            }
        }
    }
}

async fn handle_voice_self_state(
    state: &AppState,
    outbound_tx: &mpsc::Sender<String>,
    user_id: UserId,
    channel_id: Option<ChannelId>,
    muted: Option<bool>,
    deafened: Option<bool>,
) {
    let updated = {
        let mut rooms = state.voice.write().await;
        apply_self_state(&mut rooms, user_id, channel_id, muted, deafened)
    };

    match updated {
        Some(channel_id) => broadcast_voice_state(state, channel_id).await,
        None => {
            send_error(outbound_tx, &GatewayError::new(ErrorCode::VoiceNotJoined));
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_voice_signal(
    state: &AppState,
    session_id: Uuid,
    outbound_tx: &mpsc::Sender<String>,
    user_id: UserId,
    channel_id: ChannelId,
    target_user_id: UserId,
    data: &Value,
) {
    let verdict = {
        let mut sessions = state.sessions.write().await;
        let Some(session) = sessions.get_mut(&session_id) else {
            return;
        };
        note_signal(
            &mut session.signal_window,
            now_unix(),
            state.runtime.signal_window_secs,
            state.runtime.signal_window_budget,
        )
    };
    match verdict {
        SignalVerdict::Allowed => {}
        SignalVerdict::LimitedNotify => {
            send_error(outbound_tx, &GatewayError::new(ErrorCode::VoiceSignalRateLimited));
            return;
        }
        SignalVerdict::LimitedSilent => return,
    }

    let (sender_active, target_present) = {
        let rooms = state.voice.read().await;
        (
            rooms.active_channel.get(&user_id).copied(),
            rooms
                .participants
                .get(&channel_id)
                .is_some_and(|participants| participants.contains_key(&target_user_id)),
        )
    };
    if sender_active != Some(channel_id) {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::VoiceNotJoined));
        return;
    }
    if !target_present {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::VoiceTargetNotAvailable));
        return;
    }

    match try_voice_signal(channel_id, user_id, data) {
        Ok(event) => broadcast_to_users(state, &[target_user_id], &event).await,
        Err(error) => {
            tracing::error!(
                event = "gateway.voice_signal.serialize_failed",
                channel_id = %channel_id,
                error = %error
            );
        }
    }
}

async fn handle_message_send(
    state: &AppState,
    outbound_tx: &mpsc::Sender<String>,
    user_id: UserId,
    channel_id: ChannelId,
    content: String,
) {
    if !state.channels.can_access(channel_id, user_id).await {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::ChannelNotFound));
        return;
    }

    let author_username = {
        let sessions = state.sessions.read().await;
        sessions.values().find_map(|session| {
            session
                .identity
                .as_ref()
                .filter(|identity| identity.user_id == user_id)
                .map(|identity| identity.username.clone())
        })
    };
    let Some(author_username) = author_username else {
        send_error(outbound_tx, &GatewayError::new(ErrorCode::InvalidSession));
        return;
    };

    let message = state
        .messages
        .append(channel_id, user_id, &author_username, content, now_unix())
        .await;

    match try_message_new(&message) {
        Ok(event) => broadcast_to_channel(state, channel_id, &event).await,
        Err(error) => {
            tracing::error!(
                event = "gateway.message_send.serialize_failed",
                channel_id = %channel_id,
                error = %error
            );
        }
    }
}

async fn teardown_session(state: &AppState, session_id: Uuid) {
    let removed = {
        let mut sessions = state.sessions.write().await;
        let mut controls = state.controls.write().await;
        let mut senders = state.senders.write().await;
        remove_session_state(&mut sessions, &mut controls, &mut senders, session_id)
    };
    let Some(removed) = removed else {
        return;
    };

    {
        let mut channel_sessions = state.channel_sessions.write().await;
        clear_session_subscriptions(&mut channel_sessions, &removed.joined_channels, session_id);
    }

    let Some(identity) = removed.identity else {
        return;
    };
    let user_id = identity.user_id;

    let went_offline = {
        let mut user_sessions = state.user_sessions.write().await;
        detach_session(&mut user_sessions, user_id, session_id)
    };

    let voice_outcome = {
        let mut rooms = state.voice.write().await;
        apply_session_disconnect(&mut rooms, removed.active_voice_channel, user_id)
    };
    if let DisconnectVoiceOutcome::ArmGrace(channel_id) = voice_outcome {
        arm_grace_timer(state, user_id, channel_id).await;
    }

    if went_offline {
        broadcast_presence_snapshot(state).await;
    }
}
