//! Startup bootstrap of the identity store.
//!
//! Three steps, each safe to re-run:
//! 1) every [`Role`] exists,
//! 2) the master account exists,
//! 3) the master account has a password and holds Admin and Manager.
//!
//! The whole routine is awaited before the HTTP listener is bound, and any
//! failure stops the service from starting.

use secrecy::SecretString;
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::{
    role::Role,
    store::{CredentialStore, Identity, StoreError},
};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to ensure roles exist")]
    Roles(#[source] StoreError),
    #[error("failed to create master account")]
    MasterCreate(#[source] StoreError),
    #[error("failed to set up master account")]
    MasterSetup(#[source] StoreError),
    #[error("master account {0} not found after creation")]
    MasterMissing(String),
}

/// Credentials of the designated administrator account.
#[derive(Clone)]
pub struct MasterAccount {
    pub username: String,
    pub password: SecretString,
}

impl MasterAccount {
    #[must_use]
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for MasterAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterAccount")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Roles the master account must hold.
pub const MASTER_ROLES: [Role; 2] = [Role::Admin, Role::Manager];

pub struct BootstrapManager {
    store: Arc<dyn CredentialStore>,
    master: MasterAccount,
}

impl BootstrapManager {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, master: MasterAccount) -> Self {
        Self { store, master }
    }

    /// Run all three steps in order.
    ///
    /// # Errors
    ///
    /// Returns the first failing step; later steps are not attempted.
    #[instrument(skip(self), fields(master = %self.master.username))]
    pub async fn ensure_ready(&self) -> Result<(), BootstrapError> {
        self.ensure_roles().await.map_err(BootstrapError::Roles)?;
        self.ensure_master_created()
            .await
            .map_err(BootstrapError::MasterCreate)?;
        self.ensure_master_setup().await?;

        info!("identity store ready");

        Ok(())
    }

    /// # Errors
    ///
    /// Returns the store error of the first role that could not be checked or created.
    pub async fn ensure_roles(&self) -> Result<(), StoreError> {
        for role in Role::ALL {
            if self.store.role_exists(role).await? {
                continue;
            }
            if self.store.create_role(role).await? {
                info!("created role {}", role);
            } else {
                debug!("role {} created concurrently", role);
            }
        }

        Ok(())
    }

    /// Creates the master identity if it is missing. Password and roles are
    /// left to [`Self::ensure_master_setup`].
    ///
    /// # Errors
    ///
    /// Returns the store error if lookup or creation fails.
    pub async fn ensure_master_created(&self) -> Result<Identity, StoreError> {
        if let Some(identity) = self
            .store
            .find_identity_by_username(&self.master.username)
            .await?
        {
            return Ok(identity);
        }

        let identity = self.store.create_identity(&self.master.username).await?;
        info!("created master account {}", identity.username);

        Ok(identity)
    }

    /// # Errors
    ///
    /// Returns [`BootstrapError::MasterMissing`] if the master account is gone,
    /// otherwise [`BootstrapError::MasterSetup`] on any store failure.
    pub async fn ensure_master_setup(&self) -> Result<(), BootstrapError> {
        let identity = self
            .store
            .find_identity_by_username(&self.master.username)
            .await
            .map_err(BootstrapError::MasterSetup)?
            .ok_or_else(|| BootstrapError::MasterMissing(self.master.username.clone()))?;

        self.setup(&identity)
            .await
            .map_err(BootstrapError::MasterSetup)
    }

    async fn setup(&self, identity: &Identity) -> Result<(), StoreError> {
        // an existing password is never reset
        if !identity.has_password() {
            self.store
                .set_password(identity, &self.master.password)
                .await?;
            info!("master account password set");
        }

        for role in MASTER_ROLES {
            if !self.store.is_in_role(identity, role).await? {
                self.store.add_role_to_identity(identity, role).await?;
                info!("granted {} to master account", role);
            }
        }

        Ok(())
    }
}
