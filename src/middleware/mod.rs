pub mod security;

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Extension added to the request by `auth_middleware`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

/// Stub illustrating where real session/token verification would attach.
/// Trusts an `x-user-id` header verbatim; a real deployment would replace
/// this with whatever identity provider issues it.
pub async fn auth_middleware(mut req: Request, next: Next) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let user_id = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match user_id {
        Some(user_id) if !user_id.is_empty() => {
            req.extensions_mut().insert(AuthUser { user_id });
            next.run(req).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            r#"{"error":"Missing x-user-id header"}"#,
        )
            .into_response(),
    }
}
