use confab_core::{ChannelId, UserId};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::server::errors::ErrorCode;

/// Actions a client may request against the media control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SfuAction {
    GetRtpCapabilities,
    CreateTransport,
    ConnectTransport,
    Produce,
    CloseProducer,
    ListProducers,
    Consume,
    ResumeConsumer,
    RestartIce,
    GetTransportStats,
}

impl SfuAction {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "get-rtp-capabilities" => Some(Self::GetRtpCapabilities),
            "create-transport" => Some(Self::CreateTransport),
            "connect-transport" => Some(Self::ConnectTransport),
            "produce" => Some(Self::Produce),
            "close-producer" => Some(Self::CloseProducer),
            "list-producers" => Some(Self::ListProducers),
            "consume" => Some(Self::Consume),
            "resume-consumer" => Some(Self::ResumeConsumer),
            "restart-ice" => Some(Self::RestartIce),
            "get-transport-stats" => Some(Self::GetTransportStats),
            _ => None,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::GetRtpCapabilities => "get-rtp-capabilities",
            Self::CreateTransport => "create-transport",
            Self::ConnectTransport => "connect-transport",
            Self::Produce => "produce",
            Self::CloseProducer => "close-producer",
            Self::ListProducers => "list-producers",
            Self::Consume => "consume",
            Self::ResumeConsumer => "resume-consumer",
            Self::RestartIce => "restart-ice",
            Self::GetTransportStats => "get-transport-stats",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ProducerDescriptor {
    pub(crate) producer_id: String,
    pub(crate) user_id: UserId,
    pub(crate) kind: MediaKind,
}

/// Typed control-plane failures, mapped onto wire error codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SfuError {
    NotReady,
    TransportNotFound,
    TransportLimit,
    ProducerLimit,
    CannotConsume,
    AudioOnly,
    Failed(String),
}

impl SfuError {
    pub(crate) fn code(&self) -> ErrorCode {
        match self {
            Self::NotReady => ErrorCode::SfuNotReady,
            Self::TransportNotFound => ErrorCode::SfuTransportNotFound,
            Self::TransportLimit => ErrorCode::SfuTransportLimit,
            Self::ProducerLimit => ErrorCode::SfuProducerLimit,
            Self::CannotConsume => ErrorCode::SfuCannotConsume,
            Self::AudioOnly => ErrorCode::SfuAudioOnly,
            Self::Failed(_) => ErrorCode::SfuRequestFailed,
        }
    }

    pub(crate) fn message(&self) -> String {
        match self {
            Self::Failed(message) => message.clone(),
            other => String::from(other.code().default_message()),
        }
    }
}

/// Channel-scoped announcements a successful request produces for the other
/// participants.
#[derive(Debug, Clone)]
pub(crate) enum SfuAnnounce {
    ProducerAdded(ProducerDescriptor),
    ProducerRemoved(ProducerDescriptor),
}

#[derive(Debug)]
pub(crate) struct SfuOutcome {
    pub(crate) data: Value,
    pub(crate) announce: Vec<SfuAnnounce>,
}

pub(crate) enum SfuCommand {
    /// Creates the channel's room and the user's peer if absent.
    EnsurePeer {
        channel_id: ChannelId,
        user_id: UserId,
        ack: oneshot::Sender<()>,
    },
    Request {
        channel_id: ChannelId,
        user_id: UserId,
        action: SfuAction,
        data: Value,
        ack: oneshot::Sender<Result<SfuOutcome, SfuError>>,
    },
    RemovePeer {
        channel_id: ChannelId,
        user_id: UserId,
        ack: oneshot::Sender<Vec<ProducerDescriptor>>,
    },
    /// Simulates the media worker dying. All rooms are invalidated.
    FailWorker,
}

/// Lifecycle notifications emitted by the control plane outside of any
/// request/response exchange.
#[derive(Debug)]
pub(crate) enum SfuLifecycleEvent {
    ProducerClose {
        channel_id: ChannelId,
        user_id: UserId,
        producer_id: String,
    },
    ConsumerClose {
        channel_id: ChannelId,
        user_id: UserId,
        consumer_id: String,
    },
    TransportClose {
        channel_id: ChannelId,
        user_id: UserId,
        transport_id: String,
    },
    RoomClose {
        channel_id: ChannelId,
    },
    WorkerDied {
        channel_ids: Vec<ChannelId>,
    },
}

#[derive(Clone)]
pub(crate) struct SfuHandle {
    pub(super) tx: mpsc::Sender<SfuCommand>,
}

impl SfuHandle {
    pub(crate) async fn ensure_peer(&self, channel_id: ChannelId, user_id: UserId) {
        let (ack, response) = oneshot::channel();
        let command = SfuCommand::EnsurePeer {
            channel_id,
            user_id,
            ack,
        };
        if self.tx.send(command).await.is_ok() {
            let _ = response.await;
        }
    }

    pub(crate) async fn request(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        action: SfuAction,
        data: Value,
    ) -> Result<SfuOutcome, SfuError> {
        let (ack, response) = oneshot::channel();
        let command = SfuCommand::Request {
            channel_id,
            user_id,
            action,
            data,
            ack,
        };
        if self.tx.send(command).await.is_err() {
            return Err(SfuError::NotReady);
        }
        response.await.map_err(|_| SfuError::NotReady)?
    }

    /// Removes the user's peer and returns the producers that disappeared
    /// with it, for `producer-removed` announcements.
    pub(crate) async fn remove_peer(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Vec<ProducerDescriptor> {
        let (ack, response) = oneshot::channel();
        let command = SfuCommand::RemovePeer {
            channel_id,
            user_id,
            ack,
        };
        if self.tx.send(command).await.is_err() {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }

    pub(crate) async fn fail_worker(&self) {
        let _ = self.tx.send(SfuCommand::FailWorker).await;
    }
}
