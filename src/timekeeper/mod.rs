#![allow(clippy::needless_for_each)]

#[allow(unused_imports)]
use crate::{
    auth::{CredentialStore, TokenIssuer, TokenVerifier},
    timekeeper::handlers::{
        health, health::__path_health, token, token::__path_token, users,
        users::__path_get_user, users::__path_list_users,
    },
};
use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;

#[derive(OpenApi)]
#[openapi(
    paths(health, token, list_users, get_user),
    components(
        schemas(health::Health, token::Token, token::Credentials, users::UserRecord, crate::auth::Role)
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "timekeeper", description = "Credential verification and token issuance API"),
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Shared, read-only services handed to every request.
#[derive(Clone)]
pub struct Services {
    pub issuer: Arc<TokenIssuer>,
    pub verifier: Arc<TokenVerifier>,
    pub store: Arc<dyn CredentialStore>,
}

/// Build the HTTP router.
///
/// `/users` routes sit behind the bearer-token middleware; `/token` and
/// `/health` are public.
pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let protected = Router::new()
        .route("/users", get(handlers::list_users))
        .route("/users/:id", get(handlers::get_user))
        .layer(middleware::from_fn_with_state(
            services.verifier.clone(),
            handlers::auth::require_bearer,
        ));

    Router::new()
        .route("/token", post(handlers::token))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(services.issuer))
                .layer(Extension(services.store)),
        )
        .route("/health", get(handlers::health).options(handlers::health))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi()))
}

/// Bind and serve until SIGINT or SIGTERM.
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails
pub async fn new(port: u16, services: Services) -> Result<()> {
    let app = router(services);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        store::MemoryCredentialStore, Claims, Role, SigningKey, TokenIssuer, TokenVerifier,
    };
    use axum::{
        body::to_bytes,
        http::{header::AUTHORIZATION, StatusCode},
    };
    use secrecy::SecretString;
    use serde_json::Value;
    use tower::ServiceExt;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    struct TestApp {
        app: Router,
        store: Arc<MemoryCredentialStore>,
        verifier: Arc<TokenVerifier>,
    }

    async fn test_app() -> anyhow::Result<TestApp> {
        let store = Arc::new(MemoryCredentialStore::new());
        for role in Role::ALL {
            store.create_role(role).await?;
        }
        store
            .insert(
                "admin@x.com",
                &SecretString::from("admin-pass"),
                &[Role::Admin, Role::Manager],
            )
            .await?;
        store
            .insert("user@x.com", &SecretString::from("user-pass"), &[Role::Standard])
            .await?;

        let key = Arc::new(SigningKey::from_secret(&SecretString::from(KEY))?);
        let dyn_store: Arc<dyn CredentialStore> = store.clone();
        let verifier = Arc::new(TokenVerifier::new(key.clone()));
        let app = router(Services {
            issuer: Arc::new(TokenIssuer::new(dyn_store.clone(), key)),
            verifier: verifier.clone(),
            store: dyn_store,
        });

        Ok(TestApp {
            app,
            store,
            verifier,
        })
    }

    async fn body_json(response: axum::response::Response) -> anyhow::Result<Value> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn login(app: &Router, username: &str, password: &str) -> anyhow::Result<String> {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({ "username": username, "password": password })
                            .to_string(),
                    ))?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("missing token"))
    }

    #[tokio::test]
    async fn token_endpoint_issues_verifiable_token() -> anyhow::Result<()> {
        let ctx = test_app().await?;
        let token = login(&ctx.app, "ADMIN@x.com", "admin-pass").await?;

        let claims: Claims = ctx.verifier.verify(&token)?;
        assert_eq!(claims.unique_name, "admin@x.com");
        assert_eq!(claims.role, vec![Role::Admin, Role::Manager]);
        assert!(ctx.store.roles().await.contains(&Role::Standard));
        Ok(())
    }

    #[tokio::test]
    async fn token_endpoint_accepts_query_credentials() -> anyhow::Result<()> {
        let ctx = test_app().await?;
        let response = ctx
            .app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token?username=user%40x.com&password=user-pass")
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("cache-control")
                .and_then(|v| v.to_str().ok()),
            Some("no-store")
        );
        assert!(response.headers().contains_key("x-request-id"));
        Ok(())
    }

    #[tokio::test]
    async fn token_endpoint_rejects_bad_credentials_without_body() -> anyhow::Result<()> {
        let ctx = test_app().await?;
        for (username, password) in [
            ("admin@x.com", "wrong"),
            ("nobody@x.com", "admin-pass"),
            ("", ""),
        ] {
            let response = ctx
                .app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/token")
                        .header("content-type", "application/json")
                        .body(Body::from(
                            serde_json::json!({ "username": username, "password": password })
                                .to_string(),
                        ))?,
                )
                .await?;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let bytes = to_bytes(response.into_body(), usize::MAX).await?;
            assert!(bytes.is_empty());
        }
        Ok(())
    }

    #[tokio::test]
    async fn users_require_bearer_token() -> anyhow::Result<()> {
        let ctx = test_app().await?;

        let missing = ctx
            .app
            .clone()
            .oneshot(Request::builder().uri("/users").body(Body::empty())?)
            .await?;
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let garbage = ctx
            .app
            .oneshot(
                Request::builder()
                    .uri("/users")
                    .header(AUTHORIZATION, "Bearer not-a-token")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn users_forbidden_for_standard_role() -> anyhow::Result<()> {
        let ctx = test_app().await?;
        let token = login(&ctx.app, "user@x.com", "user-pass").await?;

        let response = ctx
            .app
            .oneshot(
                Request::builder()
                    .uri("/users")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn admin_lists_and_reads_users() -> anyhow::Result<()> {
        let ctx = test_app().await?;
        let token = login(&ctx.app, "admin@x.com", "admin-pass").await?;

        let response = ctx
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/users")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let list = body_json(response).await?;
        let users = list
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("expected array"))?;
        assert_eq!(users.len(), 2);

        let user_id = users
            .iter()
            .find(|u| u["username"] == "user@x.com")
            .and_then(|u| u["user_id"].as_str())
            .ok_or_else(|| anyhow::anyhow!("missing user"))?
            .to_string();

        let response = ctx
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/users/{user_id}"))
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let detail = body_json(response).await?;
        assert_eq!(detail["roles"], serde_json::json!(["Standard"]));
        assert!(detail.get("password_hash").is_none());

        let response = ctx
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/users/{}", uuid::Uuid::now_v7()))
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ctx
            .app
            .oneshot(
                Request::builder()
                    .uri("/users/not-a-uuid")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn health_reports_version() -> anyhow::Result<()> {
        let ctx = test_app().await?;
        let response = ctx
            .app
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-app"));
        let body = body_json(response).await?;
        assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
        Ok(())
    }

    #[test]
    fn openapi_documents_routes() {
        let doc = openapi();
        for path in ["/health", "/token", "/users", "/users/{id}"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
