//! HS256 bearer tokens.
//!
//! Payload layout is fixed for downstream verifiers:
//! `nameid`, `unique_name`, `nbf`, `exp` (Unix seconds) and a `role` array.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::BTreeSet, fmt, sync::Arc};
use tracing::{debug, instrument};

use super::{role::Role, store::CredentialStore, AuthError, Identity};

/// Five days.
pub const TOKEN_LIFETIME_SECONDS: i64 = 5 * 24 * 60 * 60;

/// Leeway verifiers apply to `nbf` and `exp`.
pub const CLOCK_SKEW_SECONDS: u64 = 60;

pub const MIN_SIGNING_KEY_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id.
    pub nameid: String,
    /// Subject username.
    pub unique_name: String,
    pub nbf: i64,
    pub exp: i64,
    /// Written as an array; a bare string or a missing claim also decode.
    #[serde(default, deserialize_with = "one_or_many")]
    pub role: Vec<Role>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Role),
    Many(Vec<Role>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(role) => vec![role],
        OneOrMany::Many(roles) => roles,
    })
}

impl Claims {
    #[must_use]
    pub fn new(identity: &Identity, roles: BTreeSet<Role>, now: i64) -> Self {
        Self {
            nameid: identity.id.clone(),
            unique_name: identity.username.clone(),
            nbf: now,
            exp: now + TOKEN_LIFETIME_SECONDS,
            role: roles.into_iter().collect(),
        }
    }
}

/// Symmetric HS256 key, built once at startup and shared read-only.
///
/// The HMAC key is the UTF-16LE encoding of the configured secret, so peers
/// that derive their key with .NET `Encoding.Unicode` verify our tokens.
#[derive(Clone)]
pub struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigurationMissing`] for an empty secret and
    /// [`AuthError::ConfigurationInvalid`] when its key bytes are fewer than
    /// [`MIN_SIGNING_KEY_BYTES`].
    pub fn from_secret(secret: &SecretString) -> Result<Self, AuthError> {
        let bytes = key_bytes(secret.expose_secret());
        if bytes.is_empty() {
            return Err(AuthError::ConfigurationMissing("signing key"));
        }
        if bytes.len() < MIN_SIGNING_KEY_BYTES {
            return Err(AuthError::ConfigurationInvalid(
                "signing key must encode to at least 32 bytes",
            ));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(&bytes),
            decoding: DecodingKey::from_secret(&bytes),
        })
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Signing`] if the claims cannot be encoded.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(AuthError::Signing)
    }
}

fn key_bytes(secret: &str) -> Vec<u8> {
    secret.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey").finish_non_exhaustive()
    }
}

/// Exchanges verified credentials for a signed token.
pub struct TokenIssuer {
    store: Arc<dyn CredentialStore>,
    key: Arc<SigningKey>,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, key: Arc<SigningKey>) -> Self {
        Self { store, key }
    }

    /// Verify `username`/`password` and mint a token valid from now.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] for an unknown user, a wrong or
    /// empty password; [`AuthError::StoreUnavailable`] when the store fails.
    pub async fn issue_token(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<String, AuthError> {
        self.issue_token_at(username, password, Utc::now().timestamp())
            .await
    }

    /// Same as [`Self::issue_token`] with an explicit issue time.
    ///
    /// # Errors
    ///
    /// See [`Self::issue_token`].
    #[instrument(skip(self, password))]
    pub async fn issue_token_at(
        &self,
        username: &str,
        password: &SecretString,
        now: i64,
    ) -> Result<String, AuthError> {
        let identity = self.authorized_identity(username, password).await?;
        let roles = self.store.get_roles(&identity).await?;
        let claims = Claims::new(&identity, roles, now);

        debug!(
            subject = %claims.nameid,
            roles = claims.role.len(),
            exp = claims.exp,
            "issuing token"
        );

        self.key.sign(&claims)
    }

    async fn authorized_identity(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Identity, AuthError> {
        let username = username.trim();
        let password = password.expose_secret();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        // a miss is rejected before any password comparison
        let Some(identity) = self.store.find_identity_by_username(username).await? else {
            debug!("unknown username");
            return Err(AuthError::InvalidCredentials);
        };

        if self.store.verify_password(&identity, password).await? {
            Ok(identity)
        } else {
            debug!("password mismatch");
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Validates tokens minted by [`TokenIssuer`].
pub struct TokenVerifier {
    key: Arc<SigningKey>,
    validation: Validation,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(key: Arc<SigningKey>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_SECONDS;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "nbf"]);

        Self { key, validation }
    }

    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for a bad signature, a malformed
    /// token, or one outside its validity window (with clock-skew leeway).
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(AuthError::InvalidToken)
    }

    /// Expects `Bearer <token>`.
    #[must_use]
    pub fn extract_from_header(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}
