use axum::extract::ws::Message;

pub(crate) enum IngressDecode {
    Frame(Vec<u8>),
    Ignore,
    Disconnect(&'static str),
}

/// Maps one WebSocket message onto the frame boundary. Protocol-level ping
/// and pong are transport noise; close ends the loop.
pub(crate) fn decode_ingress_message(message: Message) -> IngressDecode {
    match message {
        Message::Text(text) => IngressDecode::Frame(text.as_bytes().to_vec()),
        Message::Binary(bytes) => IngressDecode::Frame(bytes.to_vec()),
        Message::Ping(_) | Message::Pong(_) => IngressDecode::Ignore,
        Message::Close(_) => IngressDecode::Disconnect("client_close"),
    }
}
