//! Package manager facts: installed dpkg and rpm packages.
//!
//! Both facts come back unavailable (not as errors) on hosts where the
//! package manager itself is missing, since the query command exits
//! non-zero. Producers decide whether that is acceptable.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use super::{Fact, FactValue};
use crate::error::Result;
use crate::op::OpContext;

// "ii  name  version  arch  description"
static DPKG_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ii\s+(\S+)\s+(\S+)").expect("valid dpkg regex"));

/// Installed dpkg packages, name to version.
pub struct DebPackages;

impl Fact for DebPackages {
    fn name(&self) -> &'static str {
        "deb_packages"
    }

    fn command(&self, _args: &[String]) -> String {
        "dpkg -l".to_string()
    }

    fn parse(&self, output: &str) -> FactValue {
        let mut packages = serde_json::Map::new();

        for line in output.lines() {
            if let Some(captures) = DPKG_LINE.captures(line) {
                // dpkg names may carry an architecture suffix (git:amd64)
                let name = captures[1].split(':').next().unwrap_or(&captures[1]);
                packages.insert(
                    name.to_lowercase(),
                    JsonValue::String(captures[2].to_string()),
                );
            }
        }

        if packages.is_empty() {
            None
        } else {
            Some(JsonValue::Object(packages))
        }
    }
}

/// Installed rpm packages, name to version-release.
pub struct RpmPackages;

impl Fact for RpmPackages {
    fn name(&self) -> &'static str {
        "rpm_packages"
    }

    fn command(&self, _args: &[String]) -> String {
        "rpm -qa --queryformat '%{NAME} %{VERSION}-%{RELEASE}\\n'".to_string()
    }

    fn parse(&self, output: &str) -> FactValue {
        let mut packages = serde_json::Map::new();

        for line in output.lines() {
            if let Some((name, version)) = line.trim().split_once(' ') {
                packages.insert(name.to_string(), JsonValue::String(version.to_string()));
            }
        }

        if packages.is_empty() {
            None
        } else {
            Some(JsonValue::Object(packages))
        }
    }
}

/// Typed accessor: installed dpkg packages, `None` when dpkg is absent.
pub async fn deb_packages(ctx: &OpContext<'_>) -> Result<Option<HashMap<String, String>>> {
    Ok(ctx
        .fact(&DebPackages, &[])
        .await?
        .and_then(|v| serde_json::from_value(v).ok()))
}

/// Typed accessor: installed rpm packages, `None` when rpm is absent.
pub async fn rpm_packages(ctx: &OpContext<'_>) -> Result<Option<HashMap<String, String>>> {
    Ok(ctx
        .fact(&RpmPackages, &[])
        .await?
        .and_then(|v| serde_json::from_value(v).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deb_packages_parse() {
        let output = "\
Desired=Unknown/Install/Remove/Purge/Hold
ii  git            1:2.39.2-1.1    amd64        fast, scalable, distributed revision control
ii  curl:amd64     7.88.1-10       amd64        command line tool for transferring data
rc  old-package    0.1-1           amd64        removed but not purged
";
        let value = DebPackages.parse(output).unwrap();
        assert_eq!(value["git"], "1:2.39.2-1.1");
        assert_eq!(value["curl"], "7.88.1-10");
        assert!(value.get("old-package").is_none());
    }

    #[test]
    fn test_deb_packages_empty_output() {
        assert_eq!(DebPackages.parse(""), None);
    }

    #[test]
    fn test_rpm_packages_parse() {
        let output = "git 2.39.3-1.el9\nbash 5.1.8-9.el9\n";
        let value = RpmPackages.parse(output).unwrap();
        assert_eq!(value["git"], "2.39.3-1.el9");
        assert_eq!(value["bash"], "5.1.8-9.el9");
    }
}
