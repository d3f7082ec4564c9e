//! Client configuration.

use serde::Deserialize;
use serde::Serialize;

use crate::connect;
use crate::introspect::PropertyPolicy;

/// Version of this client library.
pub const CLIENT_VERSION: &str = "0.5.1";
/// Oldest bridge version this client talks to.
pub const MIN_SERVER_VERSION: &str = "0.3.2";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("'{0}' is not a dotted numeric version")]
    MinVersion(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Oldest bridge version accepted during [`connect::connect`].
    pub min_version: String,
    /// Default policy of every bus handle the connection creates.
    pub property_policy: PropertyPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_version: MIN_SERVER_VERSION.to_string(),
            property_policy: PropertyPolicy::default(),
        }
    }
}

impl Config {
    /// Parses and validates a JSON configuration. Missing keys take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match connect::parse_version(&self.min_version) {
            Some(_) => Ok(()),
            None => Err(Error::MinVersion(self.min_version.clone())),
        }
    }
}
