use confab_core::UserId;
use serde::Serialize;

use super::{envelope::try_build_event, GatewayEvent};

pub(crate) const AUTH_OK_EVENT: &str = "auth:ok";
pub(crate) const ERROR_EVENT: &str = "error";
pub(crate) const PONG_EVENT: &str = "pong";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthOkPayload {
    user_id: String,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    code: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct PongPayload {}

pub(crate) fn try_auth_ok(user_id: UserId) -> anyhow::Result<GatewayEvent> {
    try_build_event(
        AUTH_OK_EVENT,
        AuthOkPayload {
            user_id: user_id.to_string(),
        },
    )
}

pub(crate) fn try_error(code: &str, message: &str) -> anyhow::Result<GatewayEvent> {
    try_build_event(ERROR_EVENT, ErrorPayload { code, message })
}

pub(crate) fn try_pong() -> anyhow::Result<GatewayEvent> {
    try_build_event(PONG_EVENT, PongPayload {})
}
