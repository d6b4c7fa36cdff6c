use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use confab_core::UserId;
use pasetors::{
    claims::{Claims, ClaimsValidationRules},
    local,
    token::UntrustedToken,
    version4::V4,
    Local,
};

use super::core::{AppState, IdentitySnapshot, ACCESS_TOKEN_TTL_SECS};

pub(crate) fn issue_token(state: &AppState, user_id: UserId) -> anyhow::Result<String> {
    let mut claims = Claims::new_expires_in(&Duration::from_secs(ACCESS_TOKEN_TTL_SECS))
        .map_err(|e| anyhow!("claims init failed: {e}"))?;
    claims
        .subject(&user_id.to_string())
        .map_err(|e| anyhow!("claim sub failed: {e}"))?;

    local::encrypt(&state.token_key, &claims, None, None)
        .map_err(|e| anyhow!("token mint failed: {e}"))
}

pub(crate) fn verify_token(state: &AppState, token: &str) -> anyhow::Result<UserId> {
    let untrusted = UntrustedToken::<Local, V4>::try_from(token).map_err(|e| anyhow!("{e}"))?;
    let validation_rules = ClaimsValidationRules::new();
    let trusted = local::decrypt(&state.token_key, &untrusted, &validation_rules, None, None)
        .map_err(|e| anyhow!("token decrypt failed: {e}"))?;
    let claims = trusted
        .payload_claims()
        .ok_or_else(|| anyhow!("token claims missing"))?;
    let subject = claims
        .get_claim("sub")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| anyhow!("token subject missing"))?;

    subject
        .parse::<UserId>()
        .map_err(|_| anyhow!("token subject is not a user id"))
}

/// Materialize the identity snapshot an authenticated session caches. The
/// user directory stays authoritative; the snapshot is refreshed on (re)auth
/// and on profile-update notifications.
pub(crate) async fn snapshot_identity(state: &AppState, user_id: UserId) -> Option<IdentitySnapshot> {
    let profile = state.users.get(user_id).await?;
    Some(IdentitySnapshot {
        user_id,
        username: profile.username,
        avatar_url: profile.avatar_url,
        role: profile.role,
    })
}

pub(crate) fn now_unix() -> i64 {
    let now = SystemTime::now();
    let seconds = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}
