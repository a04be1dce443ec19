//! Standardised construction of the slog logger used by metric families and
//! by the stress binary.

use serde::{Deserialize, Deserializer};
use slog::{o, Discard, Drain, Level, Logger};
use std::fmt;
use std::str::FromStr;

use super::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedLevel {
    lvl: Level,
}

impl AllowedLevel {
    pub fn set(&mut self, s: &str) -> Result<(), Error> {
        *self = s.parse()?;
        Ok(())
    }

    pub fn level(&self) -> Level {
        self.lvl
    }
}

impl Default for AllowedLevel {
    fn default() -> Self {
        AllowedLevel { lvl: Level::Info }
    }
}

impl FromStr for AllowedLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let lvl = match s.to_lowercase().as_str() {
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" => Level::Warning,
            "error" => Level::Error,
            _ => return Err(Error::InvalidLogLevel(s.to_string())),
        };
        Ok(AllowedLevel { lvl })
    }
}

impl fmt::Display for AllowedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.lvl {
            Level::Debug | Level::Trace => "debug",
            Level::Info => "info",
            Level::Warning => "warn",
            Level::Error | Level::Critical => "error",
        };
        write!(f, "{}", s)
    }
}

impl<'de> Deserialize<'de> for AllowedLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AllowedFormat {
    #[default]
    Full,
    Compact,
}

impl FromStr for AllowedFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "full" => Ok(AllowedFormat::Full),
            "compact" => Ok(AllowedFormat::Compact),
            _ => Err(Error::InvalidLogFormat(s.to_string())),
        }
    }
}

impl fmt::Display for AllowedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowedFormat::Full => write!(f, "full"),
            AllowedFormat::Compact => write!(f, "compact"),
        }
    }
}

impl<'de> Deserialize<'de> for AllowedFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub level: AllowedLevel,
    pub format: AllowedFormat,
}

/// Builds an asynchronous terminal logger writing to stderr.
pub fn new(config: &Config) -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = match config.format {
        AllowedFormat::Full => slog_async::Async::new(slog_term::FullFormat::new(decorator).build().fuse())
            .build()
            .fuse(),
        AllowedFormat::Compact => {
            slog_async::Async::new(slog_term::CompactFormat::new(decorator).build().fuse())
                .build()
                .fuse()
        }
    };
    let drain = drain.filter_level(config.level.level()).fuse();
    Logger::root(drain, o!())
}

/// A logger that drops every record. Metric families use it until given
/// another one.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!("DEBUG".parse::<AllowedLevel>().unwrap().level(), Level::Debug);
        assert_eq!("warn".parse::<AllowedLevel>().unwrap().to_string(), "warn");
        assert_eq!(
            "trace".parse::<AllowedLevel>(),
            Err(Error::InvalidLogLevel("trace".into()))
        );

        let mut level = AllowedLevel::default();
        assert_eq!(level.to_string(), "info");
        level.set("error").unwrap();
        assert_eq!(level.level(), Level::Error);
        assert!(level.set("loud").is_err());
        assert_eq!(level.level(), Level::Error);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("compact".parse::<AllowedFormat>(), Ok(AllowedFormat::Compact));
        assert_eq!(
            "json".parse::<AllowedFormat>(),
            Err(Error::InvalidLogFormat("json".into()))
        );
    }

    #[test]
    fn test_config_deserialize() {
        let config: Config = serde_json::from_str(r#"{"level": "debug"}"#).unwrap();
        assert_eq!(config.level.level(), Level::Debug);
        assert_eq!(config.format, AllowedFormat::Full);
        assert!(serde_json::from_str::<Config>(r#"{"format": "xml"}"#).is_err());
    }
}
