use super::OAuthService;
use super::handlers::ErrorResponse;
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthMiddlewareConfig {
    pub oauth_service: Arc<OAuthService>,
    pub base_url: String,
}

/// Bearer token middleware. On success the `ValidatedToken` goes into the request extensions
/// for the handler; on failure a 401 with an RFC 6750 WWW-Authenticate header comes back.
pub async fn bearer_auth_middleware(
    State(config): State<AuthMiddlewareConfig>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&req) else {
        tracing::debug!("No bearer token on {} {}", req.method(), req.uri().path());
        return unauthorized_response(
            &config.base_url,
            None,
            "invalid_request",
            "Missing bearer token",
        );
    };

    match config.oauth_service.validate_token(&token).await {
        Ok(validated) => {
            tracing::debug!("Valid token for client: {}", validated.client_id);
            req.extensions_mut().insert(validated);
            next.run(req).await
        }
        Err(e) if e.is_internal() => {
            tracing::error!("Token validation failed internally: {}", e);
            let body = ErrorResponse {
                error: e.code().to_string(),
                error_description: Some("Failed to validate token".to_string()),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
        Err(e) => {
            tracing::info!("Rejected bearer token: {}", e);
            unauthorized_response(
                &config.base_url,
                Some("invalid_token"),
                e.code(),
                &e.to_string(),
            )
        }
    }
}

/// Authorization: Bearer header first, then an access_token query parameter
fn bearer_token(req: &Request) -> Option<String> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim().to_string())
        .filter(|token| !token.is_empty());

    from_header.or_else(|| {
        let query = req.uri().query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "access_token")
            .map(|(_, value)| value.into_owned())
            .filter(|token| !token.is_empty())
    })
}

/// 401 with WWW-Authenticate per RFC 6750, plus a JSON body carrying the rejection code
fn unauthorized_response(
    base_url: &str,
    www_error: Option<&str>,
    code: &str,
    description: &str,
) -> Response {
    let mut headers = HeaderMap::new();

    let www_auth = if let Some(err) = www_error {
        format!("Bearer realm=\"{}\", error=\"{}\"", base_url, err)
    } else {
        format!("Bearer realm=\"{}\"", base_url)
    };
    if let Ok(value) = www_auth.parse() {
        headers.insert(header::WWW_AUTHENTICATE, value);
    }

    let body = ErrorResponse {
        error: code.to_string(),
        error_description: Some(description.to_string()),
    };
    (StatusCode::UNAUTHORIZED, headers, Json(body)).into_response()
}
