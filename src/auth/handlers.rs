use super::OAuthService;
use super::error::AuthError;
use super::traits::{TokenResponse, ValidatedToken, ValidationResponse};
use axum::{
    Extension, Form,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CLIENT_CREDENTIALS: &str = "client_credentials";

/// Shared state for the token and metadata handlers
#[derive(Clone)]
pub struct OAuthAppState {
    pub oauth_service: Arc<OAuthService>,
    pub base_url: String,
}

/// OAuth 2.0 token request, as form body or query string
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

/// OAuth 2.0 error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}

/// Handler for POST /token
pub async fn token_post_handler(
    State(state): State<OAuthAppState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    match form {
        Ok(Form(req)) => handle_token_request(&state, &headers, req).await,
        Err(rejection) => malformed_token_request(&rejection.body_text()),
    }
}

/// Handler for GET /token, only routed when GET token requests are allowed
pub async fn token_get_handler(
    State(state): State<OAuthAppState>,
    headers: HeaderMap,
    query: Result<Query<TokenRequest>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(req)) => handle_token_request(&state, &headers, req).await,
        Err(rejection) => malformed_token_request(&rejection.body_text()),
    }
}

fn malformed_token_request(reason: &str) -> Response {
    tracing::info!("Malformed token request: {}", reason);
    error_response(
        StatusCode::BAD_REQUEST,
        "invalid_request",
        Some("Malformed token request"),
    )
}

async fn handle_token_request(
    state: &OAuthAppState,
    headers: &HeaderMap,
    req: TokenRequest,
) -> Response {
    match req.grant_type.as_deref() {
        Some(CLIENT_CREDENTIALS) => {}
        Some(other) => {
            tracing::info!("Rejected token request with grant_type={:?}", other);
            return error_response(
                StatusCode::BAD_REQUEST,
                "unsupported_grant_type",
                Some("Only client_credentials is supported"),
            );
        }
        None => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                Some("Missing required parameter: grant_type"),
            );
        }
    }

    let (client_id, client_secret) = match client_credentials(headers, &req) {
        Ok(credentials) => credentials,
        Err(response) => return response,
    };
    let scope = req.scope.as_deref().unwrap_or_default();

    match state
        .oauth_service
        .issue_token(&client_id, &client_secret, scope)
        .await
    {
        Ok(token) => (
            StatusCode::OK,
            [
                (header::CACHE_CONTROL, "no-store"),
                (header::PRAGMA, "no-cache"),
            ],
            Json(TokenResponse::from(&token)),
        )
            .into_response(),
        // Don't leak information about why validation failed
        Err(AuthError::InvalidClient) => error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            Some("Client authentication failed"),
        ),
        Err(AuthError::Internal(e)) => {
            tracing::error!("Failed to issue token: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                Some("Failed to issue token"),
            )
        }
    }
}

/// Pull the client id and secret out of either the Basic header or the request parameters.
/// Using both at once is rejected.
fn client_credentials(
    headers: &HeaderMap,
    req: &TokenRequest,
) -> Result<(String, String), Response> {
    match basic_credentials(headers) {
        Some(Ok((id, secret))) => {
            if req.client_secret.is_some() {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    Some("Use only one client authentication method"),
                ));
            }
            if req.client_id.as_deref().is_some_and(|form_id| form_id != id) {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    Some("client_id does not match the Authorization header"),
                ));
            }
            Ok((id, secret))
        }
        Some(Err(reason)) => {
            tracing::info!("Malformed Basic authorization header: {}", reason);
            Err(error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                Some("Client authentication failed"),
            ))
        }
        None => {
            let client_id = req.client_id.clone().ok_or_else(|| {
                error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    Some("Missing required parameter: client_id"),
                )
            })?;
            let client_secret = req.client_secret.clone().ok_or_else(|| {
                error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    Some("Missing required parameter: client_secret"),
                )
            })?;
            Ok((client_id, client_secret))
        }
    }
}

/// client_secret_basic (RFC 6749 2.3.1): form-urlencoded id and secret, joined by ':', base64'd
fn basic_credentials(headers: &HeaderMap) -> Option<Result<(String, String), &'static str>> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    Some(decode_basic(encoded.trim()))
}

fn decode_basic(encoded: &str) -> Result<(String, String), &'static str> {
    let decoded = BASE64
        .decode(encoded)
        .map_err(|_| "credentials are not base64")?;
    let decoded = String::from_utf8(decoded).map_err(|_| "credentials are not utf-8")?;
    let (id, secret) = decoded.split_once(':').ok_or("missing ':' separator")?;
    Ok((form_decode(id)?, form_decode(secret)?))
}

fn form_decode(value: &str) -> Result<String, &'static str> {
    urlencoding::decode(&value.replace('+', " "))
        .map(|decoded| decoded.into_owned())
        .map_err(|_| "credentials are not valid percent-encoding")
}

pub(crate) fn error_response(status: StatusCode, error: &str, description: Option<&str>) -> Response {
    let error_resp = ErrorResponse {
        error: error.to_string(),
        error_description: description.map(|s| s.to_string()),
    };
    (status, Json(error_resp)).into_response()
}

/// Handler for GET /validate, behind the bearer middleware
pub async fn validate_handler(Extension(token): Extension<ValidatedToken>) -> Response {
    (StatusCode::OK, Json(ValidationResponse::from(token))).into_response()
}

/// Auth server metadata (RFC 8414)
#[derive(Debug, Serialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub token_endpoint: String,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
}

/// Tells clients what auth methods we support
pub async fn metadata_handler(State(state): State<OAuthAppState>) -> Response {
    let base_url = &state.base_url;
    let metadata = AuthorizationServerMetadata {
        issuer: base_url.clone(),
        token_endpoint: format!("{}/token", base_url),
        grant_types_supported: vec![CLIENT_CREDENTIALS.to_string()],
        token_endpoint_auth_methods_supported: vec![
            "client_secret_post".to_string(),
            "client_secret_basic".to_string(),
        ],
        // no authorization endpoint, so no response types
        response_types_supported: vec![],
    };

    tracing::debug!("Serving authorization server metadata");
    (StatusCode::OK, Json(metadata)).into_response()
}
