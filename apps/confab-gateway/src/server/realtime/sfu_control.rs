//! In-process control plane for the media router. Owns rooms, peers,
//! transports, producers and consumers keyed by (channel, user); the media
//! engine behind it is a separate component and no RTP flows here.

use std::collections::HashMap;

use confab_core::{ChannelId, UserId};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{sync::mpsc, task::JoinHandle};
use ulid::Ulid;

use crate::server::core::SfuConfig;

use super::sfu_contract::{
    MediaKind, ProducerDescriptor, SfuAction, SfuAnnounce, SfuCommand, SfuError, SfuHandle,
    SfuLifecycleEvent, SfuOutcome,
};

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 64;

pub(crate) fn spawn_sfu_control(
    config: SfuConfig,
) -> (SfuHandle, mpsc::Receiver<SfuLifecycleEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    let task = tokio::spawn(run_sfu_control(config, rx, events_tx));
    (SfuHandle { tx }, events_rx, task)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportDirection {
    Send,
    Recv,
}

struct SfuTransport {
    direction: TransportDirection,
    connected: bool,
}

struct SfuProducer {
    kind: MediaKind,
}

struct SfuConsumer {
    producer_id: String,
    paused: bool,
}

#[derive(Default)]
struct SfuPeer {
    transports: HashMap<String, SfuTransport>,
    producers: HashMap<String, SfuProducer>,
    consumers: HashMap<String, SfuConsumer>,
}

#[derive(Default)]
struct SfuRoom {
    peers: HashMap<UserId, SfuPeer>,
}

struct SfuState {
    config: SfuConfig,
    rooms: HashMap<ChannelId, SfuRoom>,
    next_port_offset: u16,
}

async fn run_sfu_control(
    config: SfuConfig,
    mut rx: mpsc::Receiver<SfuCommand>,
    events_tx: mpsc::Sender<SfuLifecycleEvent>,
) {
    let mut state = SfuState {
        config,
        rooms: HashMap::new(),
        next_port_offset: 0,
    };

    while let Some(command) = rx.recv().await {
        match command {
            SfuCommand::EnsurePeer {
                channel_id,
                user_id,
                ack,
            } => {
                peer_entry(&mut state, channel_id, user_id);
                let _ = ack.send(());
            }
            SfuCommand::Request {
                channel_id,
                user_id,
                action,
                data,
                ack,
            } => {
                let result = handle_request(&mut state, channel_id, user_id, action, data);
                let _ = ack.send(result);
            }
            SfuCommand::RemovePeer {
                channel_id,
                user_id,
                ack,
            } => {
                let mut events = Vec::new();
                let removed = remove_peer(&mut state, channel_id, user_id, &mut events);
                let _ = ack.send(removed);
                for event in events {
                    let _ = events_tx.send(event).await;
                }
            }
            SfuCommand::FailWorker => {
                let channel_ids: Vec<ChannelId> = state.rooms.keys().copied().collect();
                state.rooms.clear();
                tracing::error!(
                    event = "gateway.sfu.worker_died",
                    affected_rooms = channel_ids.len()
                );
                let _ = events_tx
                    .send(SfuLifecycleEvent::WorkerDied { channel_ids })
                    .await;
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransportDto {
    direction: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransportRefDto {
    transport_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProduceDto {
    transport_id: String,
    kind: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProducerRefDto {
    producer_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumerRefDto {
    consumer_id: String,
}

fn handle_request(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
    action: SfuAction,
    data: Value,
) -> Result<SfuOutcome, SfuError> {
    match action {
        SfuAction::GetRtpCapabilities => Ok(plain(json!({
            "rtpCapabilities": router_rtp_capabilities(&state.config),
            "audioOnly": state.config.audio_only,
        }))),
        SfuAction::CreateTransport => create_transport(state, channel_id, user_id, &data),
        SfuAction::ConnectTransport => connect_transport(state, channel_id, user_id, &data),
        SfuAction::Produce => produce(state, channel_id, user_id, &data),
        SfuAction::CloseProducer => close_producer(state, channel_id, user_id, &data),
        SfuAction::ListProducers => list_producers(state, channel_id, user_id),
        SfuAction::Consume => consume(state, channel_id, user_id, &data),
        SfuAction::ResumeConsumer => resume_consumer(state, channel_id, user_id, &data),
        SfuAction::RestartIce => restart_ice(state, channel_id, user_id, &data),
        SfuAction::GetTransportStats => transport_stats(state, channel_id, user_id, &data),
    }
}

fn plain(data: Value) -> SfuOutcome {
    SfuOutcome {
        data,
        announce: Vec::new(),
    }
}

fn router_rtp_capabilities(config: &SfuConfig) -> Value {
    let mut codecs = vec![json!({
        "kind": "audio",
        "mimeType": "audio/opus",
        "clockRate": 48_000,
        "channels": 2,
    })];
    if !config.audio_only {
        codecs.push(json!({
            "kind": "video",
            "mimeType": "video/VP8",
            "clockRate": 90_000,
        }));
    }
    json!({ "codecs": codecs })
}

fn peer_entry<'a>(state: &'a mut SfuState, channel_id: ChannelId, user_id: UserId) -> &'a mut SfuPeer {
    state
        .rooms
        .entry(channel_id)
        .or_default()
        .peers
        .entry(user_id)
        .or_default()
}

fn existing_peer<'a>(
    state: &'a mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
) -> Option<&'a mut SfuPeer> {
    state.rooms.get_mut(&channel_id)?.peers.get_mut(&user_id)
}

fn create_transport(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
    data: &Value,
) -> Result<SfuOutcome, SfuError> {
    let dto: CreateTransportDto = parse_dto(data)?;
    let direction = match dto.direction.as_str() {
        "send" => TransportDirection::Send,
        "recv" => TransportDirection::Recv,
        _ => return Err(SfuError::Failed(String::from("unknown transport direction"))),
    };

    let max_transports = state.config.max_transports_per_peer;
    let candidates = ice_candidates(state);
    let prefer_tcp = state.config.prefer_tcp;
    let peer = peer_entry(state, channel_id, user_id);
    if peer.transports.len() >= max_transports {
        return Err(SfuError::TransportLimit);
    }

    let transport_id = Ulid::new().to_string();
    peer.transports.insert(
        transport_id.clone(),
        SfuTransport {
            direction,
            connected: false,
        },
    );

    Ok(plain(json!({
        "transportId": transport_id,
        "direction": dto.direction,
        "iceCandidates": candidates,
        "dtlsParameters": { "role": "auto" },
        "preferTcp": prefer_tcp,
    })))
}

fn ice_candidates(state: &mut SfuState) -> Value {
    let (low, high) = state.config.port_range;
    let span = high.saturating_sub(low).max(1);
    let port = low + state.next_port_offset % span;
    state.next_port_offset = state.next_port_offset.wrapping_add(1);
    let ip = state.config.announced_ip.unwrap_or(state.config.listen_ip);

    let mut candidates = Vec::new();
    if state.config.enable_udp {
        candidates.push(json!({ "ip": ip, "port": port, "protocol": "udp" }));
    }
    if state.config.enable_tcp {
        candidates.push(json!({ "ip": ip, "port": port, "protocol": "tcp" }));
    }
    Value::from(candidates)
}

fn connect_transport(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
    data: &Value,
) -> Result<SfuOutcome, SfuError> {
    let dto: TransportRefDto = parse_dto(data)?;
    let peer = existing_peer(state, channel_id, user_id).ok_or(SfuError::TransportNotFound)?;
    let transport = peer
        .transports
        .get_mut(&dto.transport_id)
        .ok_or(SfuError::TransportNotFound)?;
    transport.connected = true;
    Ok(plain(json!({ "connected": true })))
}

fn produce(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
    data: &Value,
) -> Result<SfuOutcome, SfuError> {
    let dto: ProduceDto = parse_dto(data)?;
    let kind = MediaKind::parse(&dto.kind)
        .ok_or_else(|| SfuError::Failed(String::from("unsupported media kind")))?;
    if state.config.audio_only && kind == MediaKind::Video {
        return Err(SfuError::AudioOnly);
    }

    let max_producers = state.config.max_producers_per_peer;
    let peer = existing_peer(state, channel_id, user_id).ok_or(SfuError::TransportNotFound)?;
    let transport = peer
        .transports
        .get(&dto.transport_id)
        .ok_or(SfuError::TransportNotFound)?;
    if transport.direction != TransportDirection::Send {
        return Err(SfuError::Failed(String::from(
            "produce requires a send transport",
        )));
    }
    if peer.producers.len() >= max_producers {
        return Err(SfuError::ProducerLimit);
    }

    let producer_id = Ulid::new().to_string();
    peer.producers.insert(producer_id.clone(), SfuProducer { kind });

    let descriptor = ProducerDescriptor {
        producer_id: producer_id.clone(),
        user_id,
        kind,
    };
    Ok(SfuOutcome {
        data: json!({ "producerId": producer_id, "kind": kind.as_str() }),
        announce: vec![SfuAnnounce::ProducerAdded(descriptor)],
    })
}

fn close_producer(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
    data: &Value,
) -> Result<SfuOutcome, SfuError> {
    let dto: ProducerRefDto = parse_dto(data)?;
    let room = state
        .rooms
        .get_mut(&channel_id)
        .ok_or_else(|| SfuError::Failed(String::from("producer not found")))?;
    let peer = room
        .peers
        .get_mut(&user_id)
        .ok_or_else(|| SfuError::Failed(String::from("producer not found")))?;
    let producer = peer
        .producers
        .remove(&dto.producer_id)
        .ok_or_else(|| SfuError::Failed(String::from("producer not found")))?;

    close_consumers_of_producer(room, &dto.producer_id);

    let descriptor = ProducerDescriptor {
        producer_id: dto.producer_id,
        user_id,
        kind: producer.kind,
    };
    Ok(SfuOutcome {
        data: json!({ "closed": true }),
        announce: vec![SfuAnnounce::ProducerRemoved(descriptor)],
    })
}

fn close_consumers_of_producer(room: &mut SfuRoom, producer_id: &str) {
    for peer in room.peers.values_mut() {
        peer.consumers
            .retain(|_, consumer| consumer.producer_id != producer_id);
    }
}

fn list_producers(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
) -> Result<SfuOutcome, SfuError> {
    let mut producers = Vec::new();
    if let Some(room) = state.rooms.get(&channel_id) {
        for (peer_user, peer) in &room.peers {
            if *peer_user == user_id {
                continue;
            }
            for (producer_id, producer) in &peer.producers {
                producers.push(json!({
                    "producerId": producer_id,
                    "userId": peer_user.to_string(),
                    "kind": producer.kind.as_str(),
                }));
            }
        }
    }
    Ok(plain(json!({ "producers": producers })))
}

fn consume(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
    data: &Value,
) -> Result<SfuOutcome, SfuError> {
    let dto: ProducerRefDto = parse_dto(data)?;
    let room = state
        .rooms
        .get_mut(&channel_id)
        .ok_or(SfuError::CannotConsume)?;

    let mut found = None;
    for (peer_user, peer) in &room.peers {
        if let Some(producer) = peer.producers.get(&dto.producer_id) {
            found = Some((*peer_user, producer.kind));
            break;
        }
    }
    let (producer_user, kind) = found.ok_or(SfuError::CannotConsume)?;
    if producer_user == user_id {
        return Err(SfuError::CannotConsume);
    }

    let consumer_peer = room.peers.get_mut(&user_id).ok_or(SfuError::CannotConsume)?;
    let has_recv_transport = consumer_peer
        .transports
        .values()
        .any(|transport| transport.direction == TransportDirection::Recv);
    if !has_recv_transport {
        return Err(SfuError::CannotConsume);
    }

    let consumer_id = Ulid::new().to_string();
    consumer_peer.consumers.insert(
        consumer_id.clone(),
        SfuConsumer {
            producer_id: dto.producer_id.clone(),
            paused: true,
        },
    );

    Ok(plain(json!({
        "consumerId": consumer_id,
        "producerId": dto.producer_id,
        "producerUserId": producer_user.to_string(),
        "kind": kind.as_str(),
        "paused": true,
    })))
}

fn resume_consumer(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
    data: &Value,
) -> Result<SfuOutcome, SfuError> {
    let dto: ConsumerRefDto = parse_dto(data)?;
    let peer = existing_peer(state, channel_id, user_id)
        .ok_or_else(|| SfuError::Failed(String::from("consumer not found")))?;
    let consumer = peer
        .consumers
        .get_mut(&dto.consumer_id)
        .ok_or_else(|| SfuError::Failed(String::from("consumer not found")))?;
    consumer.paused = false;
    Ok(plain(json!({ "resumed": true, "paused": consumer.paused })))
}

fn restart_ice(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
    data: &Value,
) -> Result<SfuOutcome, SfuError> {
    let dto: TransportRefDto = parse_dto(data)?;
    let peer = existing_peer(state, channel_id, user_id).ok_or(SfuError::TransportNotFound)?;
    if !peer.transports.contains_key(&dto.transport_id) {
        return Err(SfuError::TransportNotFound);
    }
    Ok(plain(json!({
        "iceParameters": {
            "usernameFragment": Ulid::new().to_string(),
            "password": Ulid::new().to_string(),
        },
    })))
}

fn transport_stats(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
    data: &Value,
) -> Result<SfuOutcome, SfuError> {
    let dto: TransportRefDto = parse_dto(data)?;
    let peer = existing_peer(state, channel_id, user_id).ok_or(SfuError::TransportNotFound)?;
    let transport = peer
        .transports
        .get(&dto.transport_id)
        .ok_or(SfuError::TransportNotFound)?;
    Ok(plain(json!({
        "transportId": dto.transport_id,
        "connected": transport.connected,
        "stats": [],
    })))
}

fn remove_peer(
    state: &mut SfuState,
    channel_id: ChannelId,
    user_id: UserId,
    events: &mut Vec<SfuLifecycleEvent>,
) -> Vec<ProducerDescriptor> {
    let Some(room) = state.rooms.get_mut(&channel_id) else {
        return Vec::new();
    };
    let Some(peer) = room.peers.remove(&user_id) else {
        return Vec::new();
    };

    let removed: Vec<ProducerDescriptor> = peer
        .producers
        .into_iter()
        .map(|(producer_id, producer)| ProducerDescriptor {
            producer_id,
            user_id,
            kind: producer.kind,
        })
        .collect();

    for descriptor in &removed {
        for (peer_user, other) in &mut room.peers {
            let closing: Vec<String> = other
                .consumers
                .iter()
                .filter(|(_, consumer)| consumer.producer_id == descriptor.producer_id)
                .map(|(consumer_id, _)| consumer_id.clone())
                .collect();
            for consumer_id in closing {
                other.consumers.remove(&consumer_id);
                events.push(SfuLifecycleEvent::ConsumerClose {
                    channel_id,
                    user_id: *peer_user,
                    consumer_id,
                });
            }
        }
    }

    if room.peers.is_empty() {
        state.rooms.remove(&channel_id);
        events.push(SfuLifecycleEvent::RoomClose { channel_id });
    }

    removed
}

fn parse_dto<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T, SfuError> {
    serde_json::from_value(data.clone())
        .map_err(|_| SfuError::Failed(String::from("malformed request data")))
}
