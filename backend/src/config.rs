use std::str::FromStr;

use clap::{value_t, App, Arg, ArgMatches};
use lazy_static::lazy_static;

use crate::locks::LockSettings;

lazy_static! {
    static ref CONFIG: Config = parse_command_line_flags();
}

/// Environment variable holding the session cookie signing key. At least 32 bytes.
pub const COOKIE_SECRET_ENV_VAR: &str = "PACK_LOCK_COOKIE_SECRET";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    DynamoDb,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dynamodb" => Ok(StoreKind::DynamoDb),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("Unknown store: {}", other)),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub http_port: u16,
    pub store: StoreKind,
    pub dynamodb_env: String,
    pub dynamodb_region: String,
    pub dynamodb_endpoint: Option<String>,
    pub cookie_secure: bool,
    pub lease_ttl_secs: i64,
    pub heartbeat_grace_secs: i64,
    pub holder_window_secs: i64,
    pub requester_window_secs: i64,
    pub duplicate_window_secs: i64,
    pub reconcile_interval_secs: u64,
    pub request_retention_secs: i64,
    pub log_level: log::LevelFilter,
}

impl Config {
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            lease_ttl: chrono::Duration::seconds(self.lease_ttl_secs),
            heartbeat_grace: chrono::Duration::seconds(self.heartbeat_grace_secs),
            holder_window: chrono::Duration::seconds(self.holder_window_secs),
            requester_window: chrono::Duration::seconds(self.requester_window_secs),
            duplicate_window: chrono::Duration::seconds(self.duplicate_window_secs),
            request_retention: chrono::Duration::seconds(self.request_retention_secs),
        }
    }
}

pub fn config() -> &'static Config {
    &CONFIG
}

fn flag<'a>(name: &'a str, value_name: &'a str, help: &'a str) -> Arg<'a, 'a> {
    Arg::with_name(name)
        .long(name)
        .help(help)
        .takes_value(true)
        .value_name(value_name)
}

/// Longest window or interval accepted on the command line: one year.
const MAX_DURATION_SECS: i64 = 365 * 86400;

fn duration_flag<'a>(name: &'a str, help: &'a str, default: &'a str) -> Arg<'a, 'a> {
    flag(name, "SECS", help)
        .default_value(default)
        .validator(validate_duration_secs)
}

fn validate_duration_secs(value: String) -> Result<(), String> {
    match value.parse::<i64>() {
        Ok(secs) if (1..=MAX_DURATION_SECS).contains(&secs) => Ok(()),
        Ok(_) => Err(format!("must be between 1 and {} seconds", MAX_DURATION_SECS)),
        Err(_) => Err(format!("{} is not a whole number of seconds", value)),
    }
}

fn parse_command_line_flags() -> Config {
    config_from_matches(&command_line_app().get_matches())
}

fn command_line_app() -> App<'static, 'static> {
    App::new("pack_lock_backend")
        .version("0.1")
        .arg(flag("http_port", "PORT", "The port for the HTTP server").default_value("8080"))
        .arg(
            flag("store", "STORE", "Where leases and requests live")
                .possible_values(&["dynamodb", "memory"])
                .default_value("dynamodb"),
        )
        .arg(
            flag(
                "dynamodb_env",
                "ENV",
                "Table name prefix, eg. \"local\", \"staging\" or \"production\"",
            )
            .default_value("local"),
        )
        .arg(
            flag("dynamodb_region", "REGION", "AWS region of the tables")
                .default_value("us-west-2"),
        )
        .arg(flag(
            "dynamodb_endpoint",
            "URL",
            "Custom DynamoDB endpoint, eg. http://localhost:8000 for DynamoDB Local",
        ))
        .arg(
            Arg::with_name("cookie_secure")
                .long("cookie_secure")
                .help("Only send the session cookie over HTTPS"),
        )
        .arg(duration_flag(
            "lease_ttl_secs",
            "How long a lease lasts without renewal",
            "3600",
        ))
        .arg(duration_flag(
            "heartbeat_grace_secs",
            "A lease without a heartbeat for this long is stale",
            "90",
        ))
        .arg(duration_flag(
            "holder_window_secs",
            "How long the holder has to answer a takeover request",
            "10",
        ))
        .arg(duration_flag(
            "requester_window_secs",
            "Countdown shown to the requester",
            "5",
        ))
        .arg(duration_flag(
            "duplicate_window_secs",
            "Repeat takeover requests inside this window are replayed",
            "15",
        ))
        .arg(duration_flag(
            "reconcile_interval_secs",
            "How often the background reconciler sweeps",
            "5",
        ))
        .arg(duration_flag(
            "request_retention_secs",
            "How long settled takeover requests are kept",
            "86400",
        ))
        .arg(
            flag("log_level", "LEVEL", "error, warn, info, debug or trace").default_value("info"),
        )
}

fn config_from_matches(matches: &ArgMatches) -> Config {
    Config {
        http_port: value_t!(matches, "http_port", u16).unwrap_or_else(|e| e.exit()),
        store: value_t!(matches, "store", StoreKind).unwrap_or_else(|e| e.exit()),
        dynamodb_env: value_t!(matches, "dynamodb_env", String).unwrap_or_else(|e| e.exit()),
        dynamodb_region: value_t!(matches, "dynamodb_region", String)
            .unwrap_or_else(|e| e.exit()),
        dynamodb_endpoint: matches.value_of("dynamodb_endpoint").map(String::from),
        cookie_secure: matches.is_present("cookie_secure"),
        lease_ttl_secs: value_t!(matches, "lease_ttl_secs", i64).unwrap_or_else(|e| e.exit()),
        heartbeat_grace_secs: value_t!(matches, "heartbeat_grace_secs", i64)
            .unwrap_or_else(|e| e.exit()),
        holder_window_secs: value_t!(matches, "holder_window_secs", i64)
            .unwrap_or_else(|e| e.exit()),
        requester_window_secs: value_t!(matches, "requester_window_secs", i64)
            .unwrap_or_else(|e| e.exit()),
        duplicate_window_secs: value_t!(matches, "duplicate_window_secs", i64)
            .unwrap_or_else(|e| e.exit()),
        reconcile_interval_secs: value_t!(matches, "reconcile_interval_secs", u64)
            .unwrap_or_else(|e| e.exit()),
        request_retention_secs: value_t!(matches, "request_retention_secs", i64)
            .unwrap_or_else(|e| e.exit()),
        log_level: value_t!(matches, "log_level", log::LevelFilter).unwrap_or_else(|e| e.exit()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_lock_settings_defaults() {
        let matches = command_line_app()
            .get_matches_from_safe(vec!["pack_lock_backend"])
            .unwrap();
        let config = config_from_matches(&matches);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.store, StoreKind::DynamoDb);
        assert_eq!(config.dynamodb_env, "local");
        assert!(config.dynamodb_endpoint.is_none());
        assert!(!config.cookie_secure);
        assert_eq!(config.reconcile_interval_secs, 5);

        let settings = config.lock_settings();
        let defaults = LockSettings::default();
        assert_eq!(settings.lease_ttl, defaults.lease_ttl);
        assert_eq!(settings.heartbeat_grace, defaults.heartbeat_grace);
        assert_eq!(settings.holder_window, defaults.holder_window);
        assert_eq!(settings.requester_window, defaults.requester_window);
        assert_eq!(settings.duplicate_window, defaults.duplicate_window);
        assert_eq!(settings.request_retention, defaults.request_retention);
    }

    #[test]
    fn test_flags_override_defaults() {
        let matches = command_line_app()
            .get_matches_from_safe(vec![
                "pack_lock_backend",
                "--store",
                "memory",
                "--holder_window_secs",
                "30",
                "--dynamodb_endpoint",
                "http://localhost:8000",
                "--cookie_secure",
            ])
            .unwrap();
        let config = config_from_matches(&matches);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.lock_settings().holder_window, chrono::Duration::seconds(30));
        assert_eq!(
            config.dynamodb_endpoint.as_deref(),
            Some("http://localhost:8000")
        );
        assert!(config.cookie_secure);
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        for (name, value) in &[
            ("--lease_ttl_secs", "-3600"),
            ("--heartbeat_grace_secs", "0"),
            ("--request_retention_secs", "9223372036854775807"),
            ("--reconcile_interval_secs", "soon"),
        ] {
            let result = command_line_app().get_matches_from_safe(vec![
                "pack_lock_backend",
                *name,
                *value,
            ]);
            assert!(result.is_err(), "{} {} should be rejected", name, value);
        }
        assert!(command_line_app()
            .get_matches_from_safe(vec!["pack_lock_backend", "--lease_ttl_secs", "31536000"])
            .is_ok());
    }

    #[test]
    fn test_unknown_store_is_rejected() {
        assert!("postgres".parse::<StoreKind>().is_err());
        assert!(command_line_app()
            .get_matches_from_safe(vec!["pack_lock_backend", "--store", "postgres"])
            .is_err());
    }
}
