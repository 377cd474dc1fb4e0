//! Authenticated principal extraction.
//!
//! Flow Overview: read the session token from the bearer header or the
//! session cookie, resolve its hash to a live session, and hand downstream
//! handlers a [`Principal`] carrying the raw token for session-bound checks.

use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use tracing::error;

use crate::mfa::{sessions::SessionStore, Principal, SessionToken};

pub const SESSION_COOKIE_NAME: &str = "factorgate_session";

/// Resolve the request's session into a principal, or 401 when there is none.
pub async fn require_auth(
    headers: &HeaderMap,
    sessions: &dyn SessionStore,
) -> Result<Principal, StatusCode> {
    let Some(token) = extract_session_token(headers) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    // Only the hash is stored; never compare raw tokens against storage.
    match sessions.lookup(&token.hash()).await {
        Ok(Some(record)) => Ok(Principal {
            account_id: record.account_id,
            username: record.username,
            session_token: token,
        }),
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<SessionToken> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(SessionToken::new(token));
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty())
            .then(|| SessionToken::new(val.trim().to_string()))
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
