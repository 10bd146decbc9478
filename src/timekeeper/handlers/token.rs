use crate::auth::{AuthError, TokenIssuer};
use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    http::{header::CACHE_CONTROL, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Token {
    token: String,
}

#[derive(ToSchema, IntoParams, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl Credentials {
    fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

#[utoipa::path(
    post,
    path= "/token",
    params(Credentials),
    request_body(content = Credentials, description = "Credentials, alternatively sent as query parameters"),
    responses (
        (status = 200, description = "Signed token, valid for five days", body = Token),
        (status = 400, description = "Invalid credentials"),
        (status = 503, description = "Credential store unavailable"),
        (status = 500, description = "Error creating the token")
    ),
    tag = "token",
)]
#[instrument(skip_all)]
pub async fn token(
    Extension(issuer): Extension<Arc<TokenIssuer>>,
    query: Result<Query<Credentials>, QueryRejection>,
    body: Option<Json<Credentials>>,
) -> Response {
    let credentials = pick_credentials(query, body);

    let password = SecretString::from(credentials.password);
    match issuer.issue_token(&credentials.username, &password).await {
        Ok(token) => {
            let mut headers = HeaderMap::new();
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            (StatusCode::OK, headers, Json(Token { token })).into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// A JSON body wins over query parameters when it carries anything.
fn pick_credentials(
    query: Result<Query<Credentials>, QueryRejection>,
    body: Option<Json<Credentials>>,
) -> Credentials {
    if let Some(Json(credentials)) = body.filter(|Json(c)| !c.is_empty()) {
        return credentials;
    }

    match query {
        Ok(Query(credentials)) => credentials,
        Err(err) => {
            debug!("Failed to parse query parameters: {}", err);
            Credentials::default()
        }
    }
}

fn error_response(err: &AuthError) -> Response {
    match err {
        AuthError::InvalidCredentials => StatusCode::BAD_REQUEST.into_response(),
        AuthError::StoreUnavailable(source) => {
            warn!("Credential store unavailable: {}", source);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        other => {
            error!("Failed to issue token: {}", other);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
