// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Package and application identity.
//!
//! A [`Locator`] is the `(repository, name, version)` triple that keys every
//! package and application. Its string form is `repository/name:version`.

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity of a package or application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator {
    /// Repository the package lives in, e.g. `gravitational.io`.
    pub repository: String,
    /// Package name.
    pub name: String,
    /// Semantic version.
    pub version: Version,
}

impl Locator {
    /// Build a locator, validating each component.
    pub fn new(
        repository: impl Into<String>,
        name: impl Into<String>,
        version: impl AsRef<str>,
    ) -> Result<Self> {
        let repository = repository.into();
        let name = name.into();
        let version = version.as_ref();

        if repository.is_empty() {
            return Err(Error::BadParameter("missing repository".to_string()));
        }
        if name.is_empty() || name.contains(['/', ':']) {
            return Err(Error::BadParameter(format!("invalid package name {:?}", name)));
        }
        let version = Version::parse(version)
            .map_err(|e| Error::BadParameter(format!("invalid version {:?}: {}", version, e)))?;

        Ok(Self {
            repository,
            name,
            version,
        })
    }

    /// Whether `self` is a later version of the same package as `other`.
    pub fn is_newer_than(&self, other: &Locator) -> bool {
        self.repository == other.repository && self.name == other.name && self.version > other.version
    }

    /// Whether both locators name the same package, ignoring the version.
    pub fn same_package(&self, other: &Locator) -> bool {
        self.repository == other.repository && self.name == other.name
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.repository, self.name, self.version)
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (repository, rest) = s
            .rsplit_once('/')
            .ok_or_else(|| Error::BadParameter(format!("invalid locator {:?}: missing repository", s)))?;
        let (name, version) = rest
            .split_once(':')
            .ok_or_else(|| Error::BadParameter(format!("invalid locator {:?}: missing version", s)))?;
        Locator::new(repository, name, version)
    }
}

impl TryFrom<String> for Locator {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let loc = Locator::new("gravitational.io", "planet", "0.0.1").unwrap();
        assert_eq!(loc.to_string(), "gravitational.io/planet:0.0.1");

        let parsed: Locator = "gravitational.io/planet:0.0.1".parse().unwrap();
        assert_eq!(parsed, loc);
    }

    #[test]
    fn test_parse_prerelease_version() {
        let loc: Locator = "example.com/app:1.2.3-beta.1".parse().unwrap();
        assert_eq!(loc.name, "app");
        assert_eq!(loc.version.pre.as_str(), "beta.1");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "planet:0.0.1",
            "gravitational.io/planet",
            "gravitational.io/:0.0.1",
            "/planet:0.0.1",
            "gravitational.io/planet:latest",
        ] {
            let err = input.parse::<Locator>().unwrap_err();
            assert!(err.is_bad_parameter(), "{} should be rejected", input);
        }
    }

    #[test]
    fn test_serde_uses_string_form() {
        let loc = Locator::new("gravitational.io", "gravity", "5.5.0").unwrap();
        let json = serde_json::to_string(&loc).unwrap();
        assert_eq!(json, "\"gravitational.io/gravity:5.5.0\"");

        let back: Locator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, loc);
    }

    #[test]
    fn test_is_newer_than() {
        let old = Locator::new("r", "app", "1.0.0").unwrap();
        let new = Locator::new("r", "app", "1.1.0").unwrap();
        let other = Locator::new("r", "other", "2.0.0").unwrap();

        assert!(new.is_newer_than(&old));
        assert!(!old.is_newer_than(&new));
        assert!(!other.is_newer_than(&old));
        assert!(new.same_package(&old));
    }
}
