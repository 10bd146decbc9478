use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{hash_password, CredentialStore, Identity, StoreError};
use crate::auth::role::Role;

#[derive(Debug, Default)]
struct State {
    roles: BTreeSet<Role>,
    // keyed by id
    identities: BTreeMap<String, Identity>,
    memberships: BTreeMap<String, BTreeSet<Role>>,
}

impl State {
    /// Folds case the way Postgres `lower()` does, beyond ASCII.
    fn by_username(&self, username: &str) -> Option<&Identity> {
        let wanted = username.to_lowercase();
        self.identities
            .values()
            .find(|identity| identity.username.to_lowercase() == wanted)
    }
}

/// Process-local store used when no database is configured, and by tests.
///
/// One mutex guards all state, which makes every create-if-absent atomic.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: Mutex<State>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an identity with a password and roles.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing the password fails.
    pub async fn insert(
        &self,
        username: &str,
        password: &SecretString,
        roles: &[Role],
    ) -> Result<Identity, StoreError> {
        let identity = self.create_identity(username).await?;
        self.set_password(&identity, password).await?;
        for role in roles {
            self.create_role(*role).await?;
            self.add_role_to_identity(&identity, *role).await?;
        }

        self.find_identity_by_id(&identity.id)
            .await?
            .ok_or(StoreError::IdentityNotFound(identity.id))
    }

    pub async fn roles(&self) -> BTreeSet<Role> {
        self.state.lock().await.roles.clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        Ok(self.state.lock().await.by_username(username).cloned())
    }

    async fn find_identity_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.state.lock().await.identities.get(id).cloned())
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let state = self.state.lock().await;
        let mut identities: Vec<Identity> = state.identities.values().cloned().collect();
        identities.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(identities)
    }

    async fn get_roles(&self, identity: &Identity) -> Result<BTreeSet<Role>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .get(&identity.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn role_exists(&self, role: Role) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.roles.contains(&role))
    }

    async fn create_role(&self, role: Role) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.roles.insert(role))
    }

    async fn create_identity(&self, username: &str) -> Result<Identity, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.by_username(username) {
            return Ok(existing.clone());
        }

        let identity = Identity {
            id: Uuid::now_v7().to_string(),
            username: username.to_string(),
            password_hash: None,
        };
        state
            .identities
            .insert(identity.id.clone(), identity.clone());

        Ok(identity)
    }

    async fn set_password(
        &self,
        identity: &Identity,
        password: &SecretString,
    ) -> Result<(), StoreError> {
        // hash outside the lock
        let phc = hash_password(password).await?;

        let mut state = self.state.lock().await;
        let stored = state
            .identities
            .get_mut(&identity.id)
            .ok_or_else(|| StoreError::IdentityNotFound(identity.id.clone()))?;
        stored.password_hash = Some(phc);

        Ok(())
    }

    async fn add_role_to_identity(
        &self,
        identity: &Identity,
        role: Role,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.identities.contains_key(&identity.id) {
            return Err(StoreError::IdentityNotFound(identity.id.clone()));
        }
        if !state.roles.contains(&role) {
            return Err(StoreError::UnknownRole(role.to_string()));
        }
        state
            .memberships
            .entry(identity.id.clone())
            .or_default()
            .insert(role);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn usernames_are_case_insensitive() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let first = store.create_identity("Alice@Example.com").await?;
        let second = store.create_identity("alice@example.COM").await?;
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_identities().await?.len(), 1);

        let found = store.find_identity_by_username("ALICE@EXAMPLE.COM").await?;
        assert_eq!(found.map(|i| i.id), Some(first.id));
        Ok(())
    }

    #[tokio::test]
    async fn non_ascii_usernames_fold_case() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let first = store.create_identity("Élodie@x.com").await?;
        let second = store.create_identity("élodie@X.COM").await?;
        assert_eq!(first.id, second.id);

        let found = store.find_identity_by_username("ÉLODIE@x.com").await?;
        assert_eq!(found.map(|i| i.id), Some(first.id));
        assert!(store.find_identity_by_username("elodie@x.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn create_role_reports_first_creation_only() -> Result<()> {
        let store = MemoryCredentialStore::new();
        assert!(!store.role_exists(Role::Manager).await?);
        assert!(store.create_role(Role::Manager).await?);
        assert!(!store.create_role(Role::Manager).await?);
        assert!(store.role_exists(Role::Manager).await?);
        Ok(())
    }

    #[tokio::test]
    async fn membership_requires_existing_role() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let identity = store.create_identity("bob@example.com").await?;

        let result = store.add_role_to_identity(&identity, Role::Admin).await;
        assert!(matches!(result, Err(StoreError::UnknownRole(_))));

        store.create_role(Role::Admin).await?;
        store.add_role_to_identity(&identity, Role::Admin).await?;
        store.add_role_to_identity(&identity, Role::Admin).await?;
        assert!(store.is_in_role(&identity, Role::Admin).await?);
        assert_eq!(
            store.get_roles(&identity).await?,
            BTreeSet::from([Role::Admin])
        );
        Ok(())
    }

    #[tokio::test]
    async fn set_password_on_unknown_identity_fails() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let ghost = Identity {
            id: "ghost".to_string(),
            username: "ghost@example.com".to_string(),
            password_hash: None,
        };
        let result = store
            .set_password(&ghost, &SecretString::from("pw"))
            .await;
        assert!(matches!(result, Err(StoreError::IdentityNotFound(id)) if id == "ghost"));
        Ok(())
    }

    #[tokio::test]
    async fn insert_seeds_password_and_roles() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let identity = store
            .insert(
                "carol@example.com",
                &SecretString::from("hunter22"),
                &[Role::Standard],
            )
            .await?;

        assert!(identity.has_password());
        assert!(store.verify_password(&identity, "hunter22").await?);
        assert!(!store.verify_password(&identity, "hunter23").await?);
        assert_eq!(store.roles().await, BTreeSet::from([Role::Standard]));
        Ok(())
    }
}
