use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::FixedOffset;
use clap::ValueEnum;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::gap::{GapPolicy, WorkWindow, WorkdayZone};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_LOG_FORMAT: &str = "text";
const DEFAULT_PUBLIC_DIR: &str = "public";
const DEFAULT_DATA_PATH: &str = "data.json";
const DEFAULT_WORKDAY_START: &str = "08:00";
const DEFAULT_WORKDAY_END: &str = "17:00";
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Which gap policy is in force. The workday window and zone live on [`Config`]
/// so switching kinds never loses them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum GapPolicyKind {
    Raw,
    #[default]
    #[value(alias = "working-hours")]
    Workday,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub public_dir: PathBuf,
    pub data_path: PathBuf,
    pub gap_policy_kind: GapPolicyKind,
    pub workday_window: WorkWindow,
    pub workday_zone: WorkdayZone,
    pub leaderboard_limit: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid LIE_TRACKER_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid LIE_TRACKER_LOG_FILTER value '{value}': {source}")]
    InvalidLogFilter {
        value: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("invalid {variable} value '{value}': {message}")]
    InvalidValue {
        variable: &'static str,
        value: String,
        message: &'static str,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from `lookup`, which maps a variable name to its raw value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank_var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr_raw = non_blank_var("LIE_TRACKER_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = parse_bind_addr(bind_addr_raw)?;

        let log_filter = non_blank_var("LIE_TRACKER_LOG_FILTER")
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        if let Err(source) = EnvFilter::try_new(&log_filter) {
            return Err(ConfigError::InvalidLogFilter {
                value: log_filter,
                source,
            });
        }

        let log_format = parse_log_format(
            &non_blank_var("LIE_TRACKER_LOG_FORMAT")
                .unwrap_or_else(|| DEFAULT_LOG_FORMAT.to_string()),
        )?;

        let public_dir = non_blank_var("LIE_TRACKER_PUBLIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR));

        let data_path = non_blank_var("LIE_TRACKER_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));

        let workday_start = non_blank_var("LIE_TRACKER_WORKDAY_START")
            .unwrap_or_else(|| DEFAULT_WORKDAY_START.to_string());
        let workday_end = non_blank_var("LIE_TRACKER_WORKDAY_END")
            .unwrap_or_else(|| DEFAULT_WORKDAY_END.to_string());
        let workday_window = WorkWindow::new(
            parse_clock_minutes("LIE_TRACKER_WORKDAY_START", &workday_start)?,
            parse_clock_minutes("LIE_TRACKER_WORKDAY_END", &workday_end)?,
        )
        .ok_or(ConfigError::InvalidValue {
            variable: "LIE_TRACKER_WORKDAY_END",
            value: workday_end,
            message: "work window must end after it starts",
        })?;

        let workday_zone = match non_blank_var("LIE_TRACKER_WORKDAY_UTC_OFFSET") {
            Some(value) => WorkdayZone::Fixed(parse_utc_offset(&value)?),
            None => WorkdayZone::Local,
        };

        let gap_policy_kind = match non_blank_var("LIE_TRACKER_GAP_POLICY") {
            Some(value) => parse_gap_policy_kind(&value)?,
            None => GapPolicyKind::default(),
        };

        let leaderboard_limit = match non_blank_var("LIE_TRACKER_LEADERBOARD_LIMIT") {
            Some(value) => match value.parse::<usize>() {
                Ok(limit) if limit > 0 => limit,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        variable: "LIE_TRACKER_LEADERBOARD_LIMIT",
                        value,
                        message: "expected a positive integer",
                    });
                }
            },
            None => DEFAULT_LEADERBOARD_LIMIT,
        };

        Ok(Self {
            bind_addr,
            log_filter,
            log_format,
            public_dir,
            data_path,
            gap_policy_kind,
            workday_window,
            workday_zone,
            leaderboard_limit,
        })
    }

    pub fn for_tests(public_dir: PathBuf, data_path: PathBuf) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            log_format: LogFormat::Text,
            public_dir,
            data_path,
            gap_policy_kind: GapPolicyKind::Raw,
            workday_window: WorkWindow::default(),
            workday_zone: WorkdayZone::Local,
            leaderboard_limit: DEFAULT_LEADERBOARD_LIMIT,
        }
    }

    pub fn gap_policy(&self) -> GapPolicy {
        match self.gap_policy_kind {
            GapPolicyKind::Raw => GapPolicy::Raw,
            GapPolicyKind::Workday => GapPolicy::Workday {
                window: self.workday_window,
                zone: self.workday_zone,
            },
        }
    }
}

pub fn parse_bind_addr(value: String) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::InvalidBindAddr { value, source })
}

pub fn parse_log_format(value: &str) -> Result<LogFormat, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "text" | "pretty" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(ConfigError::InvalidValue {
            variable: "LIE_TRACKER_LOG_FORMAT",
            value: value.to_string(),
            message: "expected 'text' or 'json'",
        }),
    }
}

pub fn parse_gap_policy_kind(value: &str) -> Result<GapPolicyKind, ConfigError> {
    GapPolicyKind::from_str(value.trim(), true).map_err(|_| ConfigError::InvalidValue {
        variable: "LIE_TRACKER_GAP_POLICY",
        value: value.to_string(),
        message: "expected 'raw' or 'workday'",
    })
}

/// Parses `HH:MM` into minutes after midnight. `24:00` is accepted as the end of day.
pub fn parse_clock_minutes(variable: &'static str, value: &str) -> Result<u32, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        variable,
        value: value.to_string(),
        message: "expected HH:MM between 00:00 and 24:00",
    };

    let (hours, minutes) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hours = hours.parse::<u32>().map_err(|_| invalid())?;
    let minutes = minutes.parse::<u32>().map_err(|_| invalid())?;
    if minutes >= 60 || hours > 24 || (hours == 24 && minutes != 0) {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

/// Parses `+HH:MM` / `-HH:MM` (or `Z`) into a fixed offset.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        variable: "LIE_TRACKER_WORKDAY_UTC_OFFSET",
        value: value.to_string(),
        message: "expected an offset such as +02:00 or -05:30",
    };

    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match trimmed.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours = hours.parse::<i32>().map_err(|_| invalid())?;
    let minutes = minutes.parse::<i32>().map_err(|_| invalid())?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
