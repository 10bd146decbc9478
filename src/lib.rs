//! # TimeKeeper (authentication service)
//!
//! `timekeeper` exchanges a username and password for a short-lived HS256
//! bearer token and keeps the identity store seeded with the baseline roles
//! and a master administrator account.
//!
//! ## Startup
//!
//! Configuration is validated first, then the credential store is connected
//! and the bootstrap routine runs to completion. Only after bootstrap
//! succeeds is the HTTP listener bound; a bootstrap failure exits the process.
//!
//! ## Tokens
//!
//! Tokens carry `nameid`, `unique_name`, `nbf`, `exp` and a `role` array.
//! They are valid for five days and nothing about them is stored server side.

pub mod auth;
pub mod cli;
pub mod timekeeper;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}
