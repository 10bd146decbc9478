use crate::{
    auth::AuthError,
    cli::{actions::server::Args, actions::Action, commands, globals::GlobalArgs},
    timekeeper::handlers::valid_email,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::time::Duration;

/// Build the action from parsed arguments, rejecting missing or malformed
/// configuration before anything touches the network.
///
/// # Errors
/// Returns an error if required arguments are missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .filter(|dsn| !dsn.trim().is_empty())
        .cloned();
    let store_timeout = Duration::from_secs(
        matches
            .get_one::<u64>(commands::ARG_STORE_TIMEOUT)
            .copied()
            .unwrap_or(5),
    );

    let globals = globals(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        store_timeout,
        globals,
    }))
}

fn required_secret(matches: &clap::ArgMatches, id: &str, name: &'static str) -> Result<SecretString> {
    matches
        .get_one::<String>(id)
        .filter(|value| !value.is_empty())
        .map(|value| SecretString::from(value.clone()))
        .ok_or(AuthError::ConfigurationMissing(name))
        .with_context(|| format!("missing required argument: --{id}"))
}

fn globals(matches: &clap::ArgMatches) -> Result<GlobalArgs> {
    let master_username = matches
        .get_one::<String>(commands::ARG_MASTER_USERNAME)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::ConfigurationMissing("master username"))
        .context("missing required argument: --master-username")?;

    if !valid_email(&master_username) {
        return Err(AuthError::ConfigurationInvalid("master username must be an email"))
            .context("invalid argument: --master-username");
    }

    let mut globals = GlobalArgs::new(master_username);
    globals.set_signing_key(required_secret(
        matches,
        commands::ARG_SIGNING_KEY,
        "signing key",
    )?);
    globals.set_master_password(required_secret(
        matches,
        commands::ARG_MASTER_PASSWORD,
        "master password",
    )?);

    Ok(globals)
}
