//! Manage apt packages.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use crate::facts::{packages, server};
use crate::op::{OpContext, OpError, Producer};

/// Ubuntu touches this stamp on every successful `apt-get update`.
const UPDATE_STAMP: &str = "/var/lib/apt/periodic/update-success-stamp";

/// Ensure the state of apt packages, optionally updating/upgrading first.
#[derive(Debug, Clone)]
pub struct Packages {
    packages: Vec<String>,
    present: bool,
    update: bool,
    cache_time: Option<i64>,
    upgrade: bool,
}

impl Packages {
    /// Ensure the given packages are installed.
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
            present: true,
            update: false,
            cache_time: None,
            upgrade: false,
        }
    }

    /// Whether the packages should be installed or removed.
    pub fn present(mut self, present: bool) -> Self {
        self.present = present;
        self
    }

    /// Run `apt-get update` before the diff.
    pub fn update(mut self) -> Self {
        self.update = true;
        self
    }

    /// With `update`, skip the update if the cache was refreshed within
    /// the last `seconds`. Only effective on systems that maintain the
    /// update stamp file (i.e. Ubuntu).
    pub fn cache_time(mut self, seconds: i64) -> Self {
        self.cache_time = Some(seconds);
        self
    }

    /// Run `apt-get upgrade` before the diff.
    pub fn upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }
}

#[async_trait]
impl Producer for Packages {
    fn kind(&self) -> &'static str {
        "apt.packages"
    }

    async fn build(&self, ctx: &OpContext<'_>) -> Result<Vec<String>, OpError> {
        let mut commands = Vec::new();

        let mut update = self.update;
        if update {
            if let Some(cache_time) = self.cache_time {
                let stamp = server::file(ctx, UPDATE_STAMP).await?;
                let now = server::date(ctx).await?;
                if let (Some(stamp), Some(now)) = (stamp, now) {
                    let refreshed = Utc.timestamp_opt(stamp.mtime, 0).single();
                    if let Some(refreshed) = refreshed {
                        if refreshed > now - Duration::seconds(cache_time) {
                            update = false;
                        }
                    }
                }
            }
        }

        if update {
            commands.push("apt-get update".to_string());
        }

        if self.upgrade {
            commands.push("DEBIAN_FRONTEND=noninteractive apt-get upgrade -y".to_string());
        }

        // apt is a system package manager: its absence is a configuration
        // error, not an empty diff
        let current = packages::deb_packages(ctx).await?.ok_or_else(|| {
            OpError::failed(format!("apt is not present on {}", ctx.host().name()))
        })?;

        // apt package names are case-insensitive
        let wanted: Vec<String> = self.packages.iter().map(|p| p.to_lowercase()).collect();

        if self.present {
            let missing: Vec<&str> = wanted
                .iter()
                .filter(|p| !current.contains_key(*p))
                .map(String::as_str)
                .collect();

            if !missing.is_empty() {
                commands.push(format!(
                    "DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                    missing.join(" ")
                ));
            }
        } else {
            let installed: Vec<&str> = wanted
                .iter()
                .filter(|p| current.contains_key(*p))
                .map(String::as_str)
                .collect();

            if !installed.is_empty() {
                commands.push(format!(
                    "DEBIAN_FRONTEND=noninteractive apt-get remove -y {}",
                    installed.join(" ")
                ));
            }
        }

        Ok(commands)
    }
}
