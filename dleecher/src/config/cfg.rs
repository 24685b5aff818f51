use std::collections::HashMap;
use std::fs;
use std::str::FromStr;

use super::constants;

/// Posible config loading errors.
#[derive(Debug)]
pub enum CfgError {
    ReadError(std::io::Error),
    MalformedLine(String),
    UnknownSetting(String),
    MissingSetting(&'static str),
    NotANumber {
        setting: &'static str,
        value: String,
    },
}

/// The client configuration, loaded with `Cfg::new`.
///
/// - `download_directory`: where the payload files land,
/// - `connect_seconds_timeout`: cap on the initial connect to a peer,
/// - `progress_seconds_interval`: seconds between two progress lines,
#[derive(Debug, Clone)]
pub struct Cfg {
    pub download_directory: String,
    pub connect_seconds_timeout: u64,
    pub progress_seconds_interval: u64,
}

impl Cfg {
    /// Loads a config file of `NAME=value` lines, one setting per line.
    ///
    /// Blank lines are allowed; every setting in
    /// [`constants::SETTINGS`] is required and nothing else is accepted.
    pub fn new(path: &str) -> Result<Self, CfgError> {
        let contents = fs::read_to_string(path).map_err(CfgError::ReadError)?;
        let settings = Self::collect_settings(&contents)?;

        Ok(Self {
            download_directory: Self::setting(&settings, constants::DOWNLOAD_DIRECTORY)?
                .to_string(),
            connect_seconds_timeout: Self::number(&settings, constants::CONNECT_SECONDS_TIMEOUT)?,
            progress_seconds_interval: Self::number(
                &settings,
                constants::PROGRESS_SECONDS_INTERVAL,
            )?,
        })
    }

    fn collect_settings(contents: &str) -> Result<HashMap<&str, &str>, CfgError> {
        let mut settings = HashMap::new();

        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once('=')
                .ok_or_else(|| CfgError::MalformedLine(line.to_string()))?;
            // A second '=' means the line is not a single NAME=value pair.
            if value.contains('=') {
                return Err(CfgError::MalformedLine(line.to_string()));
            }
            if !constants::SETTINGS.contains(&name) {
                return Err(CfgError::UnknownSetting(name.to_string()));
            }
            settings.insert(name, value);
        }

        Ok(settings)
    }

    fn setting<'a>(
        settings: &HashMap<&str, &'a str>,
        name: &'static str,
    ) -> Result<&'a str, CfgError> {
        settings
            .get(name)
            .copied()
            .ok_or(CfgError::MissingSetting(name))
    }

    fn number<N: FromStr>(
        settings: &HashMap<&str, &str>,
        name: &'static str,
    ) -> Result<N, CfgError> {
        let value = Self::setting(settings, name)?;
        value.parse().map_err(|_| CfgError::NotANumber {
            setting: name,
            value: value.to_string(),
        })
    }
}
