//! Validated service names.

use crate::config::DiscoveryConfig;
use crate::{IntegraError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A service name, unique per advertising process.
///
/// Names become part of a DNS-SD instance label, so they are limited to
/// ASCII alphanumerics, `-` and `_`, and at most
/// [`DiscoveryConfig::MAX_NAME_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if let Some(reason) = Self::invalid_reason(&name) {
            return Err(IntegraError::InvalidName { name, reason });
        }
        Ok(Self(name))
    }

    fn invalid_reason(name: &str) -> Option<String> {
        if name.is_empty() {
            return Some("name is empty".to_string());
        }
        if name.len() > DiscoveryConfig::MAX_NAME_LEN {
            return Some(format!(
                "name is longer than {} bytes",
                DiscoveryConfig::MAX_NAME_LEN
            ));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Some(format!("character {:?} is not allowed", c));
        }
        None
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceName {
    type Err = IntegraError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = IntegraError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ServiceName {
    type Error = IntegraError;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["calc", "democlass", "my-service_2"] {
            assert_eq!(ServiceName::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_invalid_names() {
        assert!(ServiceName::new("").is_err());
        assert!(ServiceName::new("has space").is_err());
        assert!(ServiceName::new("dot.ted").is_err());
        assert!(ServiceName::new("x".repeat(DiscoveryConfig::MAX_NAME_LEN + 1)).is_err());

        match ServiceName::new("a/b").unwrap_err() {
            IntegraError::InvalidName { name, reason } => {
                assert_eq!(name, "a/b");
                assert!(reason.contains("'/'"));
            }
            other => panic!("Expected InvalidName, got: {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ServiceName = serde_json::from_str("\"calc\"").unwrap();
        assert_eq!(ok.as_str(), "calc");
        assert!(serde_json::from_str::<ServiceName>("\"bad name\"").is_err());
    }
}
