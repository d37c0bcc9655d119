use serde::{Deserialize, Serialize};
use std::{env, fmt, str::FromStr};

pub const ENVIRONMENT_VARIABLE: &str = "ENVIRONMENT";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Environment variable {0} is not set")]
    Missing(String),

    #[error("Unknown environment `{0}`, expected one of develop, staging, production")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Develop,
    Staging,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Develop,
        Environment::Staging,
        Environment::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        return match self {
            Environment::Develop => "develop",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
    }

    pub fn is_production(&self) -> bool {
        return *self == Environment::Production;
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.as_str());
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        return match value.trim().to_ascii_lowercase().as_str() {
            "develop" => Ok(Environment::Develop),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            _ => Err(Error::Invalid(value.to_string())),
        };
    }
}

/// Reads `ENVIRONMENT` once. Callers hold on to the returned value and pass it
/// down; nothing else in the crate reads the process environment.
pub fn resolve() -> Result<Environment, Error> {
    return from_lookup(|key| env::var(key).ok());
}

pub fn from_lookup<F>(lookup: F) -> Result<Environment, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(ENVIRONMENT_VARIABLE) {
        Some(value) if !value.trim().is_empty() => value,
        _ => return Err(Error::Missing(ENVIRONMENT_VARIABLE.to_string())),
    };

    return raw.parse();
}

#[cfg(test)]
mod tests {
    use super::{from_lookup, Environment, Error};

    #[test]
    fn missing_variable_is_fatal() {
        let result = from_lookup(|_| None);
        assert_eq!(Err(Error::Missing(String::from("ENVIRONMENT"))), result);
    }

    #[test]
    fn blank_variable_is_fatal() {
        let result = from_lookup(|_| Some(String::from("  ")));
        match result.err().unwrap() {
            Error::Missing(_) => {}
            _ => panic!("Expected `Missing` error"),
        }
    }

    #[test]
    fn unknown_value_is_fatal() {
        let result = from_lookup(|_| Some(String::from("qa")));
        assert_eq!(Err(Error::Invalid(String::from("qa"))), result);
    }

    #[test]
    fn accepts_values_and_enum_names() {
        assert_eq!(
            Ok(Environment::Staging),
            from_lookup(|_| Some(String::from("staging")))
        );
        assert_eq!(
            Ok(Environment::Production),
            from_lookup(|_| Some(String::from("PRODUCTION")))
        );
    }

    #[test]
    fn display_round_trips() {
        for environment in Environment::ALL {
            assert_eq!(Ok(environment), environment.to_string().parse());
        }
    }
}
