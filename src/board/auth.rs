//! Session-token authentication for API routes.
//!
//! Tokens are opaque session ids issued at register/login. They are read from
//! the `auth_token` cookie or an `Authorization: Bearer` header.

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use taskboard_common::User;

use super::api::{ApiError, SharedState};

pub const AUTH_COOKIE: &str = "auth_token";

/// Max-Age of the session cookie, matching the session lifetime.
const COOKIE_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct ActingUser {
    pub user: User,
    pub token: String,
}

impl FromRequestParts<SharedState> for ActingUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(ApiError::Unauthorized(
            "Authentication required".to_string(),
        ))?;
        let lookup = token.clone();
        let user = state
            .db
            .call(move |db| db.user_for_session(&lookup))
            .await
            .map_err(ApiError::from)?
            .ok_or(ApiError::Unauthorized(
                "Session expired or invalid".to_string(),
            ))?;
        Ok(Self { user, token })
    }
}

/// Bearer header first, then the auth cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == AUTH_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value carrying a fresh session token.
pub fn session_cookie(token: &str) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        AUTH_COOKIE, token, COOKIE_MAX_AGE_SECS
    )
}

/// `Set-Cookie` value that clears the session cookie.
pub fn cleared_cookie() -> String {
    format!("{}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0", AUTH_COOKIE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_cookie_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; auth_token=tok-1; lang=en"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("tok-1"));
    }

    #[test]
    fn test_bearer_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("auth_token=cookie"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header"));
        assert_eq!(session_token(&headers).as_deref(), Some("header"));
    }

    #[test]
    fn test_missing_or_empty_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        headers.insert(header::COOKIE, HeaderValue::from_static("auth_token="));
        assert_eq!(session_token(&headers), None);
    }

    #[test]
    fn test_cookie_strings() {
        assert!(session_cookie("t").starts_with("auth_token=t; HttpOnly"));
        assert!(session_cookie("t").ends_with("Max-Age=604800"));
        assert!(cleared_cookie().ends_with("Max-Age=0"));
    }
}
