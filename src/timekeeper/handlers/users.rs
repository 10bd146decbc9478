//! Read-only user directory.
//!
//! Both routes run behind the bearer middleware and additionally require a
//! token carrying the Admin or Manager role.

use crate::auth::{Claims, CredentialStore, Identity, Role, StoreError};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserRecord {
    pub user_id: String,
    pub username: String,
    pub roles: Vec<Role>,
}

#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = 200, description = "All identities with their roles.", body = [UserRecord]),
        (status = 401, description = "Missing or invalid bearer token."),
        (status = 403, description = "Token lacks the Admin or Manager role."),
        (status = 503, description = "Credential store unavailable."),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_users(
    Extension(claims): Extension<Claims>,
    Extension(store): Extension<Arc<dyn CredentialStore>>,
) -> Response {
    if let Err(err) = ensure_reader(&claims) {
        return err.into_response();
    }

    match fetch_records(store.as_ref()).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(err) => ServiceError::Store(err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    params(
        ("id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "Identity with its roles.", body = UserRecord),
        (status = 400, description = "Invalid user id."),
        (status = 401, description = "Missing or invalid bearer token."),
        (status = 403, description = "Token lacks the Admin or Manager role."),
        (status = 404, description = "User not found."),
        (status = 503, description = "Credential store unavailable."),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_user(
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    Extension(store): Extension<Arc<dyn CredentialStore>>,
) -> Response {
    if let Err(err) = ensure_reader(&claims) {
        return err.into_response();
    }

    let Ok(user_id) = Uuid::parse_str(id.trim()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match fetch_record(store.as_ref(), &user_id.to_string()).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => ServiceError::Store(err).into_response(),
    }
}

#[derive(Debug)]
enum ServiceError {
    Forbidden,
    Store(StoreError),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            Self::Forbidden => StatusCode::FORBIDDEN.into_response(),
            Self::Store(err) => {
                error!("Failed to handle user request: {err}");
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
        }
    }
}

fn ensure_reader(claims: &Claims) -> Result<(), ServiceError> {
    if claims.role.iter().any(|role| role.can_read_users()) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden)
    }
}

async fn to_record(store: &dyn CredentialStore, identity: Identity) -> Result<UserRecord, StoreError> {
    let roles = store.get_roles(&identity).await?;
    Ok(UserRecord {
        user_id: identity.id,
        username: identity.username,
        roles: roles.into_iter().collect(),
    })
}

async fn fetch_records(store: &dyn CredentialStore) -> Result<Vec<UserRecord>, StoreError> {
    let identities = store.list_identities().await?;
    let mut records = Vec::with_capacity(identities.len());
    for identity in identities {
        records.push(to_record(store, identity).await?);
    }
    Ok(records)
}

async fn fetch_record(
    store: &dyn CredentialStore,
    id: &str,
) -> Result<Option<UserRecord>, StoreError> {
    match store.find_identity_by_id(id).await? {
        Some(identity) => Ok(Some(to_record(store, identity).await?)),
        None => Ok(None),
    }
}
