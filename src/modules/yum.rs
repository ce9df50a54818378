//! Manage yum packages. Note that yum package names are case-sensitive.

use async_trait::async_trait;

use crate::facts::packages;
use crate::op::{OpContext, OpError, Producer};

/// Ensure the state of yum packages, optionally upgrading/cleaning first.
#[derive(Debug, Clone)]
pub struct Packages {
    packages: Vec<String>,
    present: bool,
    upgrade: bool,
    clean: bool,
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
            upgrade: false,
            clean: false,
        }
    }

    /// Whether the packages should be installed or removed.
    pub fn present(mut self, present: bool) -> Self {
        self.present = present;
        self
    }

    /// Run `yum update` before the diff.
    pub fn upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }

    /// Run `yum clean all` first.
    pub fn clean(mut self) -> Self {
        self.clean = true;
        self
    }
}

#[async_trait]
impl Producer for Packages {
    fn kind(&self) -> &'static str {
        "yum.packages"
    }

    async fn build(&self, ctx: &OpContext<'_>) -> Result<Vec<String>, OpError> {
        let mut commands = Vec::new();

        if self.clean {
            commands.push("yum clean all".to_string());
        }

        if self.upgrade {
            commands.push("yum update -y".to_string());
        }

        let current = packages::rpm_packages(ctx).await?.ok_or_else(|| {
            OpError::failed(format!("yum is not present on {}", ctx.host().name()))
        })?;

        if self.present {
            let missing: Vec<&str> = self
                .packages
                .iter()
                .filter(|p| !current.contains_key(*p))
                .map(String::as_str)
                .collect();

            if !missing.is_empty() {
                commands.push(format!("yum install -y {}", missing.join(" ")));
            }
        } else {
            let installed: Vec<&str> = self
                .packages
                .iter()
                .filter(|p| current.contains_key(*p))
                .map(String::as_str)
                .collect();

            if !installed.is_empty() {
                commands.push(format!("yum remove -y {}", installed.join(" ")));
            }
        }

        Ok(commands)
    }
}
