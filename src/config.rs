use std::fmt;

use crate::engine::BookingRules;
use crate::limits::{MAX_NAME_LEN, MAX_RESOURCES};

/// Bookable resources when `BOOKDESK_RESOURCES` is unset.
pub const DEFAULT_RESOURCES: [&str; 5] = [
    "Conference Room A",
    "Conference Room B",
    "Meeting Room B",
    "Projector",
    "Presentation Equipment",
];

/// Initial contents of the booking store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seed {
    Empty,
    Demo,
    /// Path to a JSON array of bookings.
    File(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub rules: BookingRules,
    pub resources: Vec<String>,
    pub seed: Seed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    NoResources,
    TooManyResources,
    ResourceNameTooLong(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::NoResources => write!(f, "BOOKDESK_RESOURCES names no resources"),
            ConfigError::TooManyResources => {
                write!(f, "BOOKDESK_RESOURCES lists more than {MAX_RESOURCES} resources")
            }
            ConfigError::ResourceNameTooLong(name) => write!(f, "resource name too long: {name}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5434,
            max_connections: 256,
            metrics_port: None,
            rules: BookingRules::default(),
            resources: DEFAULT_RESOURCES.iter().map(|r| r.to_string()).collect(),
            seed: Seed::Empty,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their defaults; set but
    /// unparsable keys are an error rather than silently ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let rule_defaults = BookingRules::default();

        let metrics_port = match lookup("BOOKDESK_METRICS_PORT") {
            None => None,
            Some(value) => Some(value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "BOOKDESK_METRICS_PORT",
                value,
            })?),
        };

        let rules = BookingRules {
            buffer_minutes: parse_var(&lookup, "BOOKDESK_BUFFER_MINUTES", rule_defaults.buffer_minutes)?,
            min_duration_minutes: parse_var(
                &lookup,
                "BOOKDESK_MIN_DURATION_MINUTES",
                rule_defaults.min_duration_minutes,
            )?,
            max_duration_hours: parse_var(
                &lookup,
                "BOOKDESK_MAX_DURATION_HOURS",
                rule_defaults.max_duration_hours,
            )?,
            advance_booking_days: parse_var(
                &lookup,
                "BOOKDESK_ADVANCE_BOOKING_DAYS",
                rule_defaults.advance_booking_days,
            )?,
        };

        let resources = match lookup("BOOKDESK_RESOURCES") {
            None => defaults.resources,
            Some(list) => parse_resources(&list)?,
        };

        let seed = match lookup("BOOKDESK_SEED").as_deref().map(str::trim) {
            None | Some("") => Seed::Empty,
            Some("demo") => Seed::Demo,
            Some(path) => Seed::File(path.to_string()),
        };

        Ok(Self {
            bind: lookup("BOOKDESK_BIND").unwrap_or(defaults.bind),
            port: parse_var(&lookup, "BOOKDESK_PORT", defaults.port)?,
            max_connections: parse_var(&lookup, "BOOKDESK_MAX_CONNECTIONS", defaults.max_connections)?,
            metrics_port,
            rules,
            resources,
            seed,
        })
    }
}

/// Comma-separated names, trimmed, empties and duplicates dropped, order kept.
fn parse_resources(list: &str) -> Result<Vec<String>, ConfigError> {
    let mut out: Vec<String> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if name.len() > MAX_NAME_LEN {
            return Err(ConfigError::ResourceNameTooLong(name.to_string()));
        }
        if !out.iter().any(|r| r == name) {
            out.push(name.to_string());
        }
    }
    if out.is_empty() {
        return Err(ConfigError::NoResources);
    }
    if out.len() > MAX_RESOURCES {
        return Err(ConfigError::TooManyResources);
    }
    Ok(out)
}
