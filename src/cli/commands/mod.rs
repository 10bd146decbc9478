use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_SIGNING_KEY: &str = "signing-key";
pub const ARG_MASTER_USERNAME: &str = "master-username";
pub const ARG_MASTER_PASSWORD: &str = "master-password";
pub const ARG_STORE_TIMEOUT: &str = "store-timeout";
pub const ARG_VERBOSITY: &str = "verbosity";

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("timekeeper")
        .about("TimeKeeper authentication service")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("TIMEKEEPER_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long("dsn")
                .help("Database connection string; without it an in-memory store is used")
                .env("TIMEKEEPER_DSN"),
        )
        .arg(
            Arg::new(ARG_SIGNING_KEY)
                .long("signing-key")
                .help("Symmetric HS256 token signing key, at least 16 characters (keyed as UTF-16LE)")
                .env("TIMEKEEPER_SIGNING_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_MASTER_USERNAME)
                .long("master-username")
                .help("Email of the master administrator account")
                .env("TIMEKEEPER_MASTER_USERNAME")
                .required(true),
        )
        .arg(
            Arg::new(ARG_MASTER_PASSWORD)
                .long("master-password")
                .help("Initial password of the master account, applied only when it has none")
                .env("TIMEKEEPER_MASTER_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT)
                .long("store-timeout")
                .help("Seconds before a credential store call is abandoned")
                .default_value("5")
                .env("TIMEKEEPER_STORE_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..=300)),
        )
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("TIMEKEEPER_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
