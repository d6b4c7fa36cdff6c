use std::fmt;

/// Error codes surfaced to clients in `error {code,message}` frames and in
/// failed `voice:sfu:response` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ErrorCode {
    Unauthorized,
    InvalidAuth,
    AlreadyAuthenticated,
    InvalidSession,
    AccountSuspended,
    InvalidEvent,
    UnknownEvent,
    InvalidChannel,
    ChannelNotFound,
    InvalidVoiceChannel,
    VoiceNotJoined,
    VoiceTargetNotAvailable,
    InvalidSignal,
    VoiceSignalRateLimited,
    InvalidSfuRequest,
    SfuDisabled,
    SfuNotReady,
    SfuTransportNotFound,
    SfuTransportLimit,
    SfuProducerLimit,
    SfuCannotConsume,
    SfuAudioOnly,
    SfuRequestFailed,
    WsError,
}

impl ErrorCode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidAuth => "INVALID_AUTH",
            Self::AlreadyAuthenticated => "ALREADY_AUTHENTICATED",
            Self::InvalidSession => "INVALID_SESSION",
            Self::AccountSuspended => "ACCOUNT_SUSPENDED",
            Self::InvalidEvent => "INVALID_EVENT",
            Self::UnknownEvent => "UNKNOWN_EVENT",
            Self::InvalidChannel => "INVALID_CHANNEL",
            Self::ChannelNotFound => "CHANNEL_NOT_FOUND",
            Self::InvalidVoiceChannel => "INVALID_VOICE_CHANNEL",
            Self::VoiceNotJoined => "VOICE_NOT_JOINED",
            Self::VoiceTargetNotAvailable => "VOICE_TARGET_NOT_AVAILABLE",
            Self::InvalidSignal => "INVALID_SIGNAL",
            Self::VoiceSignalRateLimited => "VOICE_SIGNAL_RATE_LIMITED",
            Self::InvalidSfuRequest => "INVALID_SFU_REQUEST",
            Self::SfuDisabled => "SFU_DISABLED",
            Self::SfuNotReady => "SFU_NOT_READY",
            Self::SfuTransportNotFound => "SFU_TRANSPORT_NOT_FOUND",
            Self::SfuTransportLimit => "SFU_TRANSPORT_LIMIT",
            Self::SfuProducerLimit => "SFU_PRODUCER_LIMIT",
            Self::SfuCannotConsume => "SFU_CANNOT_CONSUME",
            Self::SfuAudioOnly => "SFU_AUDIO_ONLY",
            Self::SfuRequestFailed => "SFU_REQUEST_FAILED",
            Self::WsError => "WS_ERROR",
        }
    }

    pub(crate) fn default_message(self) -> &'static str {
        match self {
            Self::Unauthorized => "authenticate first",
            Self::InvalidAuth => "token verification failed",
            Self::AlreadyAuthenticated => "session is already authenticated",
            Self::InvalidSession => "session state is no longer available",
            Self::AccountSuspended => "account is suspended",
            Self::InvalidEvent => "malformed frame payload",
            Self::UnknownEvent => "unknown frame kind",
            Self::InvalidChannel => "malformed channel id",
            Self::ChannelNotFound => "channel not found",
            Self::InvalidVoiceChannel => "channel is not a voice channel",
            Self::VoiceNotJoined => "no active voice channel matches the request",
            Self::VoiceTargetNotAvailable => "target user is not in the channel",
            Self::InvalidSignal => "malformed signal payload",
            Self::VoiceSignalRateLimited => "voice signaling budget exhausted",
            Self::InvalidSfuRequest => "malformed sfu request",
            Self::SfuDisabled => "sfu is disabled",
            Self::SfuNotReady => "sfu is not ready",
            Self::SfuTransportNotFound => "transport not found",
            Self::SfuTransportLimit => "transport limit reached",
            Self::SfuProducerLimit => "producer limit reached",
            Self::SfuCannotConsume => "cannot consume producer",
            Self::SfuAudioOnly => "video is disabled on this server",
            Self::SfuRequestFailed => "sfu request failed",
            Self::WsError => "internal gateway error",
        }
    }
}

#[derive(Debug)]
pub(crate) struct GatewayError {
    pub(crate) code: ErrorCode,
    pub(crate) message: String,
}

impl GatewayError {
    pub(crate) fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: String::from(code.default_message()),
        }
    }

    pub(crate) fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
