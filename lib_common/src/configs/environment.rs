//! # Execution Environment
//!
//! Distinguishes a developer machine from a deployed run. The only signal is the
//! `ENVIRONMENT` variable: exactly `local` selects local execution, anything else
//! (including an unset variable) is treated as deployed.

use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the variable read by [`Environment::from_env`].
pub const ENVIRONMENT_VAR: &str = "ENVIRONMENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Developer machine: ingest into the embedded local database.
    Local,
    /// Anything else: ingest into the warehouse.
    Deployed,
}

impl Environment {
    pub fn from_env() -> Self {
        Self::from_value(env::var(ENVIRONMENT_VAR).ok().as_deref())
    }

    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some("local") => Environment::Local,
            _ => Environment::Deployed,
        }
    }

    pub fn is_local(self) -> bool {
        self == Environment::Local
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Local => f.write_str("local"),
            Environment::Deployed => f.write_str("deployed"),
        }
    }
}
