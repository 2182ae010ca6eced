//! # Custom Extractors
//!
//! - [`CallerActor`]: the acting identity, read from the `X-Actor-Id` and
//!   `X-Actor-Role` headers. Authentication happens in front of this
//!   service; the headers carry its result.
//! - [`extract_json`] / [`extract_path`] / [`extract_query`]: map axum's
//!   rejections onto [`AppError::BadRequest`] so malformed input gets the
//!   same JSON error body as every other failure.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::Json;

use escrow_core::{Actor, PartyId, Role};

use crate::error::AppError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// The caller, as an engine [`Actor`]. A missing role header means
/// `participant`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for CallerActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(CallerActor)
    }
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let id = header_str(headers, ACTOR_ID_HEADER)?
        .ok_or_else(|| AppError::Unauthorized(format!("missing {ACTOR_ID_HEADER} header")))?;
    let id = PartyId::new(id).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let role = match header_str(headers, ACTOR_ROLE_HEADER)? {
        Some(raw) => Role::parse(raw).map_err(|e| AppError::BadRequest(e.to_string()))?,
        None => Role::Participant,
    };
    Ok(Actor::new(id, role))
}

/// The `Idempotency-Key` header, if present.
pub fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    Ok(header_str(headers, IDEMPOTENCY_KEY_HEADER)?.map(str::to_string))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => {
            let s = value
                .to_str()
                .map_err(|_| AppError::BadRequest(format!("{name} header is not valid ASCII")))?;
            let s = s.trim();
            Ok((!s.is_empty()).then_some(s))
        }
    }
}

/// Unwrap a JSON body, mapping deserialization errors to `BadRequest`.
///
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

pub fn extract_path<T>(result: Result<Path<T>, PathRejection>) -> Result<T, AppError> {
    result
        .map(|Path(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

pub fn extract_query<T>(result: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    result
        .map(|Query(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}
