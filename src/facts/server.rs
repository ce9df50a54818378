//! OS-level facts: kernel, distribution, users, time, file state.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

use super::{Fact, FactValue};
use crate::error::Result;
use crate::op::OpContext;

/// Kernel name, as reported by `uname -s`.
pub struct Os;

impl Fact for Os {
    fn name(&self) -> &'static str {
        "os"
    }

    fn command(&self, _args: &[String]) -> String {
        "uname -s".to_string()
    }

    fn parse(&self, output: &str) -> FactValue {
        let os = output.trim();
        if os.is_empty() {
            None
        } else {
            Some(JsonValue::String(os.to_string()))
        }
    }
}

/// Linux distribution name/version, parsed from `/etc/os-release`.
pub struct LinuxDistribution;

impl Fact for LinuxDistribution {
    fn name(&self) -> &'static str {
        "linux_distribution"
    }

    fn command(&self, _args: &[String]) -> String {
        "cat /etc/os-release".to_string()
    }

    fn parse(&self, output: &str) -> FactValue {
        let mut fields: HashMap<&str, String> = HashMap::new();
        for line in output.lines() {
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.trim(), value.trim().trim_matches('"').to_string());
            }
        }

        let name = fields.get("NAME").or_else(|| fields.get("ID"))?.clone();
        let version = fields.get("VERSION_ID").cloned().unwrap_or_default();
        let major = version
            .split('.')
            .next()
            .and_then(|m| m.parse::<u64>().ok());

        Some(json!({
            "name": name,
            "version": version,
            "major": major,
        }))
    }
}

/// System users from `/etc/passwd`, keyed by username.
pub struct Users;

impl Fact for Users {
    fn name(&self) -> &'static str {
        "users"
    }

    fn command(&self, _args: &[String]) -> String {
        "cat /etc/passwd".to_string()
    }

    fn parse(&self, output: &str) -> FactValue {
        let mut users = serde_json::Map::new();

        for line in output.lines() {
            let fields: Vec<&str> = line.split(':').collect();
            // name:passwd:uid:gid:gecos:home:shell
            if fields.len() < 7 {
                continue;
            }
            users.insert(
                fields[0].to_string(),
                json!({
                    "uid": fields[2].parse::<u32>().ok(),
                    "gid": fields[3].parse::<u32>().ok(),
                    "home": fields[5],
                    "shell": fields[6],
                }),
            );
        }

        if users.is_empty() {
            None
        } else {
            Some(JsonValue::Object(users))
        }
    }
}

/// Current time on the host, as a unix timestamp.
pub struct Date;

impl Fact for Date {
    fn name(&self) -> &'static str {
        "date"
    }

    fn command(&self, _args: &[String]) -> String {
        "date +%s".to_string()
    }

    fn parse(&self, output: &str) -> FactValue {
        output
            .trim()
            .parse::<i64>()
            .ok()
            .map(|secs| JsonValue::Number(secs.into()))
    }
}

/// Size, mtime, and mode of a file at a given path. Unavailable when the
/// path does not exist.
pub struct File;

impl Fact for File {
    fn name(&self) -> &'static str {
        "file"
    }

    fn command(&self, args: &[String]) -> String {
        let path = args.first().map(String::as_str).unwrap_or_default();
        format!("stat -c '%s %Y %a' {}", shell_words::quote(path))
    }

    fn parse(&self, output: &str) -> FactValue {
        let fields: Vec<&str> = output.split_whitespace().collect();
        if fields.len() != 3 {
            return None;
        }

        Some(json!({
            "size": fields[0].parse::<u64>().ok()?,
            "mtime": fields[1].parse::<i64>().ok()?,
            "mode": fields[2],
        }))
    }
}

/// OS family tag, dispatched on by producers that differ per distro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsFamily {
    /// Debian, Ubuntu and derivatives (apt/dpkg)
    Debian,
    /// RHEL, CentOS, Fedora and derivatives (yum/rpm)
    RedHat,
    /// Anything else
    Other(String),
}

impl OsFamily {
    fn from_distribution(name: &str) -> Self {
        match name {
            n if n.starts_with("Debian") || n.starts_with("Ubuntu") => OsFamily::Debian,
            n if n.starts_with("CentOS")
                || n.starts_with("Red Hat")
                || n.starts_with("Fedora")
                || n.starts_with("Rocky")
                || n.starts_with("AlmaLinux") =>
            {
                OsFamily::RedHat
            }
            other => OsFamily::Other(other.to_string()),
        }
    }
}

/// A parsed `/etc/passwd` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    /// Numeric user id
    pub uid: Option<u32>,
    /// Numeric group id
    pub gid: Option<u32>,
    /// Home directory
    pub home: String,
    /// Login shell
    pub shell: String,
}

/// A parsed `stat` result.
#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    /// Size in bytes
    pub size: u64,
    /// Modification time, unix seconds
    pub mtime: i64,
    /// Octal mode string, e.g. `"644"`
    pub mode: String,
}

/// Typed accessor: kernel name.
pub async fn os(ctx: &OpContext<'_>) -> Result<Option<String>> {
    Ok(ctx
        .fact(&Os, &[])
        .await?
        .and_then(|v| v.as_str().map(String::from)))
}

/// Typed accessor: the host's OS family, derived from its distribution.
pub async fn os_family(ctx: &OpContext<'_>) -> Result<Option<OsFamily>> {
    let distribution = ctx.fact(&LinuxDistribution, &[]).await?;
    Ok(distribution
        .as_ref()
        .and_then(|v| v.get("name"))
        .and_then(|v| v.as_str())
        .map(OsFamily::from_distribution))
}

/// Typed accessor: system users keyed by name.
pub async fn users(ctx: &OpContext<'_>) -> Result<Option<HashMap<String, UserInfo>>> {
    Ok(ctx
        .fact(&Users, &[])
        .await?
        .and_then(|v| serde_json::from_value(v).ok()))
}

/// Typed accessor: current time on the host.
pub async fn date(ctx: &OpContext<'_>) -> Result<Option<DateTime<Utc>>> {
    Ok(ctx
        .fact(&Date, &[])
        .await?
        .and_then(|v| v.as_i64())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
}

/// Typed accessor: stat of a single path, `None` when absent.
pub async fn file(ctx: &OpContext<'_>, path: &str) -> Result<Option<FileInfo>> {
    Ok(ctx
        .fact(&File, &[path.to_string()])
        .await?
        .and_then(|v| serde_json::from_value(v).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_os_parse() {
        assert_eq!(Os.parse("Linux\n"), Some(JsonValue::String("Linux".into())));
        assert_eq!(Os.parse(""), None);
    }

    #[test]
    fn test_linux_distribution_parse() {
        let output = r#"NAME="Ubuntu"
VERSION_ID="22.04"
ID=ubuntu
"#;
        let value = LinuxDistribution.parse(output).unwrap();
        assert_eq!(value["name"], "Ubuntu");
        assert_eq!(value["version"], "22.04");
        assert_eq!(value["major"], 22);
    }

    #[test]
    fn test_linux_distribution_unparseable() {
        assert_eq!(LinuxDistribution.parse(""), None);
    }

    #[test]
    fn test_users_parse() {
        let output = "root:x:0:0:root:/root:/bin/bash\n\
                      deploy:x:1001:1001::/home/deploy:/bin/sh\n";
        let value = Users.parse(output).unwrap();
        assert_eq!(value["deploy"]["home"], "/home/deploy");
        assert_eq!(value["deploy"]["shell"], "/bin/sh");
        assert_eq!(value["root"]["uid"], 0);
    }

    #[test]
    fn test_date_parse() {
        assert_eq!(Date.parse("1700000000\n"), Some(json!(1700000000)));
        assert_eq!(Date.parse("not a number"), None);
    }

    #[test]
    fn test_file_fact_command_quotes_path() {
        let command = File.command(&["/tmp/with space".to_string()]);
        assert_eq!(command, "stat -c '%s %Y %a' '/tmp/with space'");
    }

    #[test]
    fn test_file_parse() {
        let value = File.parse("1024 1700000000 644\n").unwrap();
        assert_eq!(value["size"], 1024);
        assert_eq!(value["mtime"], 1700000000);
        assert_eq!(value["mode"], "644");
    }

    #[test]
    fn test_os_family_from_distribution() {
        assert_eq!(
            OsFamily::from_distribution("Ubuntu"),
            OsFamily::Debian
        );
        assert_eq!(
            OsFamily::from_distribution("CentOS Linux"),
            OsFamily::RedHat
        );
        assert_eq!(
            OsFamily::from_distribution("OpenBSD"),
            OsFamily::Other("OpenBSD".into())
        );
    }
}
