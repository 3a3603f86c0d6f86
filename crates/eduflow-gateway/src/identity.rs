//! Stateless socket identity.
//!
//! The token arrives in the `token` query parameter and is trusted on its
//! signature alone; nothing is looked up in storage.

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use eduflow_types::api::Claims;

/// Identity derived from the four claims the auth backend signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: i64,
    pub tenant_id: i64,
    pub role: String,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Per-connection identity. Downstream code must match on it; an anonymous
/// identity carries the reason it was not authenticated.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Authenticated(UserIdentity),
    Anonymous(AuthError),
}

impl Identity {
    pub fn into_user(self) -> Result<UserIdentity, AuthError> {
        match self {
            Self::Authenticated(user) => Ok(user),
            Self::Anonymous(reason) => Err(reason),
        }
    }
}

/// Verify an HS256 token and pull out the identity claims.
pub fn decode_token(token: &str, secret: &str) -> Result<UserIdentity, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Invalid(e.to_string()),
    })?;

    let claims = data.claims;
    Ok(UserIdentity {
        user_id: claims.user_id,
        tenant_id: claims.tenant_id,
        role: claims.role,
        full_name: claims.full_name,
    })
}

pub fn authenticate(token: Option<&str>, secret: &str) -> Identity {
    match token.filter(|t| !t.is_empty()) {
        None => Identity::Anonymous(AuthError::MissingToken),
        Some(token) => match decode_token(token, secret) {
            Ok(user) => Identity::Authenticated(user),
            Err(reason) => Identity::Anonymous(reason),
        },
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenParams {
    token: Option<String>,
}

/// Middleware for socket routes: resolves `?token=` into an [`Identity`]
/// request extension. Never rejects; the socket handler decides how to close.
pub async fn resolve_identity(
    State(secret): State<Arc<str>>,
    mut req: Request,
    next: Next,
) -> Response {
    let params = Query::<TokenParams>::try_from_uri(req.uri())
        .map(|Query(params)| params)
        .unwrap_or_default();

    let identity = authenticate(params.token.as_deref(), &secret);
    if let Identity::Anonymous(reason) = &identity {
        debug!("Unauthenticated socket request to {}: {}", req.uri().path(), reason);
    }

    req.extensions_mut().insert(identity);
    next.run(req).await
}
