//! Request handlers for the reference host.
//!
//! Each handler wraps the request's cookie jar in a [`JarCookies`] store, runs the
//! guard components against it, and returns the updated jar with the response so
//! cookie writes and removals reach the client on every path, including rejections.

use std::collections::HashMap;

use axum::{
    extract::{Form, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;

use crate::error::ProviderError;
use crate::http::server::AppState;
use crate::security::headers::client_identifier;
use crate::security::rate_limit::{rate_limited_response, Admission};
use crate::security::{JarCookies, TerminationReason};

/// Credentials posted to `/login`.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

fn unauthorized(cookies: JarCookies) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        cookies.into_jar(),
        "Session expired. Please sign in again.",
    )
        .into_response()
}

fn forbidden(cookies: JarCookies) -> Response {
    (
        StatusCode::FORBIDDEN,
        cookies.into_jar(),
        "Invalid or missing security token.",
    )
        .into_response()
}

fn internal_error(cookies: JarCookies) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        cookies.into_jar(),
        "Request could not be processed.",
    )
        .into_response()
}

pub async fn health() -> &'static str {
    "ok"
}

/// Authenticate, gated by the auth limiter.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let client = client_identifier(&headers);

    if let Admission::Denied { retry_after_secs } = state.auth_limiter.check(&client) {
        tracing::warn!(client = %client, "Login rejected by rate limiter");
        return rate_limited_response(retry_after_secs);
    }

    let mut cookies = state.cookies(jar);
    match state
        .provider
        .sign_in(&form.username, &form.password, &mut cookies)
        .await
    {
        Ok(session) => {
            state.auth_limiter.record_success(&client);
            if let Err(e) = state.sessions.start(&mut cookies) {
                state.logger.error(
                    "Failed to start session clocks",
                    json!({ "error": e.to_string() }),
                    Some(&session.subject_id),
                );
                return internal_error(cookies);
            }
            state.logger.info(
                "Authentication succeeded",
                json!({ "client": client }),
                Some(&session.subject_id),
            );
            (
                cookies.into_jar(),
                Json(json!({ "subject": session.subject_id })),
            )
                .into_response()
        }
        Err(ProviderError::InvalidCredentials) => {
            state.auth_limiter.record_failure(&client);
            state.logger.warn(
                "Authentication failed",
                json!({ "client": client, "username": form.username }),
                None,
            );
            (
                StatusCode::UNAUTHORIZED,
                cookies.into_jar(),
                "Invalid username or password.",
            )
                .into_response()
        }
        Err(e) => {
            state.logger.error(
                "Identity provider sign-in failed",
                json!({ "client": client, "error": e.to_string() }),
                None,
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                cookies.into_jar(),
                "Authentication is temporarily unavailable.",
            )
                .into_response()
        }
    }
}

/// Render a protected form: issue a fresh anti-forgery token.
pub async fn form(State(state): State<AppState>, jar: CookieJar) -> Response {
    let mut cookies = state.cookies(jar);
    if !state.sessions.extend(&mut cookies).await {
        return unauthorized(cookies);
    }

    match state.csrf.issue_token(&mut cookies) {
        Ok(token) => (
            cookies.into_jar(),
            Json(json!({ "field": state.csrf.form_field(), "csrf_token": token })),
        )
            .into_response(),
        Err(e) => {
            state.logger.error(
                "Failed to issue CSRF token",
                json!({ "error": e.to_string() }),
                None,
            );
            internal_error(cookies)
        }
    }
}

/// Accept a protected state-changing submission.
pub async fn submit(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let mut cookies = state.cookies(jar);
    if !state.sessions.extend(&mut cookies).await {
        return unauthorized(cookies);
    }

    let candidate = fields.get(state.csrf.form_field()).map(String::as_str);
    if !state.csrf.validate_token(&cookies, candidate) {
        return forbidden(cookies);
    }

    let payload_len = fields.get("payload").map(String::len).unwrap_or(0);
    (
        cookies.into_jar(),
        Json(json!({ "accepted": true, "payload_len": payload_len })),
    )
        .into_response()
}

/// Advisory countdown for client-side warnings.
pub async fn session_status(State(state): State<AppState>, jar: CookieJar) -> Response {
    let cookies = state.cookies(jar);
    match state.sessions.timeout_info(&cookies).await {
        Some(info) => Json(info).into_response(),
        None => unauthorized(cookies),
    }
}

/// End the session. Requires a valid token so a third-party page cannot log users out.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let mut cookies = state.cookies(jar);

    let candidate = fields.get(state.csrf.form_field()).map(String::as_str);
    if !state.csrf.validate_token(&cookies, candidate) {
        return forbidden(cookies);
    }

    if let Err(e) = state.csrf.clear_tokens(&mut cookies) {
        state.logger.error(
            "Failed to clear CSRF tokens",
            json!({ "error": e.to_string() }),
            None,
        );
    }
    state
        .sessions
        .terminate(&mut cookies, TerminationReason::Logout)
        .await;

    (cookies.into_jar(), Json(json!({ "logged_out": true }))).into_response()
}
