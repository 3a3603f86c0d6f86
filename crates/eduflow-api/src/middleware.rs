use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    extract::CookieJar,
    headers::{Authorization, authorization::Bearer},
};
use tracing::debug;

use eduflow_gateway::identity::decode_token;

use crate::auth::AppState;

/// Cookie set by the web frontend when it cannot attach a header.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Extract and validate the JWT from the Authorization header, falling back
/// to the `access_token` cookie. Inserts the caller's `UserIdentity`.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = match &bearer {
        Some(TypedHeader(Authorization(bearer))) => bearer.token().to_string(),
        None => jar
            .get(ACCESS_TOKEN_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(StatusCode::UNAUTHORIZED)?,
    };

    let user = decode_token(&token, &state.jwt_secret).map_err(|e| {
        debug!("Rejected REST request to {}: {}", req.uri().path(), e);
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
