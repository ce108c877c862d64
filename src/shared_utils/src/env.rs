use std::str::FromStr;

use thiserror::Error;

/// Errors raised while reading configuration from the process environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    /// An environment variable required by the application is not set.
    #[error("Missing environment variable: {0}")]
    Missing(String),

    /// The variable is set but its value could not be parsed.
    #[error("Invalid value for environment variable {name}: {message}")]
    Invalid {
        /// Variable name.
        name: String,
        /// Parser message.
        message: String,
    },
}

/// Reads an environment variable, returning a structured error if it's missing.
///
/// Empty values are treated as missing so that `FOO= cmd` behaves like an
/// unset variable.
pub fn get_env_var(name: &str) -> Result<String, EnvError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(EnvError::Missing(name.to_string())),
    }
}

/// Reads an optional environment variable. Unset and empty both yield `None`.
pub fn get_env_var_opt(name: &str) -> Option<String> {
    get_env_var(name).ok()
}

/// Reads and parses an optional environment variable.
///
/// Returns `Ok(None)` when the variable is unset, and an [`EnvError::Invalid`]
/// when it is set to something `T` cannot parse.
pub fn parse_env_var<T>(name: &str) -> Result<Option<T>, EnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = get_env_var_opt(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| EnvError::Invalid {
            name: name.to_string(),
            message: e.to_string(),
        })
}
