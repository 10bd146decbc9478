use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

/// Roles a TimeKeeper account can hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum Role {
    Admin,
    Manager,
    Standard,
}

impl Role {
    /// Every role the bootstrap routine guarantees exists.
    pub const ALL: [Self; 3] = [Self::Admin, Self::Manager, Self::Standard];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Manager => "Manager",
            Self::Standard => "Standard",
        }
    }

    /// Admin and Manager may read other users' records.
    #[must_use]
    pub const fn can_read_users(self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    // role names compare case-insensitively, the stored form is canonical
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "standard" => Ok(Self::Standard),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("MANAGER".parse::<Role>(), Ok(Role::Manager));
        assert_eq!(" Standard ".parse::<Role>(), Ok(Role::Standard));
        assert_eq!(
            "root".parse::<Role>(),
            Err(UnknownRole("root".to_string()))
        );
    }

    #[test]
    fn display_matches_stored_name() {
        for role in Role::ALL {
            assert_eq!(role.to_string(), role.as_str());
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
    }

    #[test]
    fn serializes_as_plain_name() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&Role::Manager)?, "\"Manager\"");
        let roles: Vec<Role> = serde_json::from_str(r#"["Admin","Standard"]"#)?;
        assert_eq!(roles, vec![Role::Admin, Role::Standard]);
        Ok(())
    }

    #[test]
    fn only_admin_and_manager_read_users() {
        assert!(Role::Admin.can_read_users());
        assert!(Role::Manager.can_read_users());
        assert!(!Role::Standard.can_read_users());
    }
}
