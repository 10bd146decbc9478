use async_trait::async_trait;
use secrecy::SecretString;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use std::{collections::BTreeSet, time::Duration};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use super::{hash_password, CredentialStore, Identity, StoreError};
use crate::auth::role::Role;

const SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/db/sql/01_timekeeper.sql"
));

/// Postgres-backed credential store.
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a small pool to `dsn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached within `acquire_timeout`.
    pub async fn connect(dsn: &str, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .acquire_timeout(acquire_timeout)
            .test_before_acquire(true)
            .connect(dsn)
            .await?;

        Ok(Self::new(pool))
    }

    /// Apply the schema; every statement is `IF NOT EXISTS`.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .instrument(info_span!("db.migrate", db.system = "postgresql"))
            .await?;

        debug!("schema applied");

        Ok(())
    }
}

fn parse_id(id: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(id.trim()).map_err(|_| StoreError::InvalidId(id.to_string()))
}

fn identity_from_row(row: &PgRow) -> Identity {
    Identity {
        id: row.get::<Uuid, _>("id").to_string(),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
    }
}

fn span(operation: &'static str, statement: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let query = r"
            SELECT id, username, password_hash
            FROM identities
            WHERE lower(username) = lower($1)
        ";
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span("SELECT", query))
            .await?;

        Ok(row.as_ref().map(identity_from_row))
    }

    async fn find_identity_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        // a malformed id cannot match any row
        let Ok(id) = parse_id(id) else {
            return Ok(None);
        };

        let query = "SELECT id, username, password_hash FROM identities WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span("SELECT", query))
            .await?;

        Ok(row.as_ref().map(identity_from_row))
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let query = "SELECT id, username, password_hash FROM identities ORDER BY username";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(span("SELECT", query))
            .await?;

        Ok(rows.iter().map(identity_from_row).collect())
    }

    async fn get_roles(&self, identity: &Identity) -> Result<BTreeSet<Role>, StoreError> {
        let query = "SELECT role FROM identity_roles WHERE identity_id = $1";
        let rows = sqlx::query(query)
            .bind(parse_id(&identity.id)?)
            .fetch_all(&self.pool)
            .instrument(span("SELECT", query))
            .await?;

        rows.iter()
            .map(|row| {
                let name: String = row.get("role");
                name.parse::<Role>()
                    .map_err(|_| StoreError::UnknownRole(name))
            })
            .collect()
    }

    async fn role_exists(&self, role: Role) -> Result<bool, StoreError> {
        let query = "SELECT EXISTS (SELECT 1 FROM roles WHERE name = $1)";
        let exists: bool = sqlx::query_scalar(query)
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .instrument(span("SELECT", query))
            .await?;

        Ok(exists)
    }

    async fn create_role(&self, role: Role) -> Result<bool, StoreError> {
        let query = "INSERT INTO roles (name) VALUES ($1) ON CONFLICT (name) DO NOTHING";
        let result = sqlx::query(query)
            .bind(role.as_str())
            .execute(&self.pool)
            .instrument(span("INSERT", query))
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_identity(&self, username: &str) -> Result<Identity, StoreError> {
        let query = r"
            INSERT INTO identities (id, username)
            VALUES ($1, $2)
            ON CONFLICT ((lower(username))) DO NOTHING
        ";
        sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(username)
            .execute(&self.pool)
            .instrument(span("INSERT", query))
            .await?;

        // the row is ours or a concurrent writer's; either way it exists now
        self.find_identity_by_username(username)
            .await?
            .ok_or_else(|| StoreError::IdentityNotFound(username.to_string()))
    }

    async fn set_password(
        &self,
        identity: &Identity,
        password: &SecretString,
    ) -> Result<(), StoreError> {
        let phc = hash_password(password).await?;

        let query = "UPDATE identities SET password_hash = $2, updated_at = now() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(parse_id(&identity.id)?)
            .bind(phc)
            .execute(&self.pool)
            .instrument(span("UPDATE", query))
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::IdentityNotFound(identity.id.clone()));
        }

        Ok(())
    }

    async fn add_role_to_identity(
        &self,
        identity: &Identity,
        role: Role,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO identity_roles (identity_id, role)
            VALUES ($1, $2)
            ON CONFLICT (identity_id, role) DO NOTHING
        ";
        sqlx::query(query)
            .bind(parse_id(&identity.id)?)
            .bind(role.as_str())
            .execute(&self.pool)
            .instrument(span("INSERT", query))
            .await?;

        Ok(())
    }

    async fn is_in_role(&self, identity: &Identity, role: Role) -> Result<bool, StoreError> {
        let query = r"
            SELECT EXISTS (
                SELECT 1 FROM identity_roles WHERE identity_id = $1 AND role = $2
            )
        ";
        let member: bool = sqlx::query_scalar(query)
            .bind(parse_id(&identity.id)?)
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .instrument(span("SELECT", query))
            .await?;

        Ok(member)
    }
}
