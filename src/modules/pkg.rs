//! OS-family package dispatch.
//!
//! Deploy scripts that target mixed fleets declare packages once; the
//! producer dispatches to the family-specific producer by the host's
//! distribution fact instead of the script probing per-host attributes.

use async_trait::async_trait;

use super::{apt, yum};
use crate::facts::server::{self, OsFamily};
use crate::op::{OpContext, OpError, Producer};

/// Ensure the state of system packages via whichever package manager the
/// host's OS family provides.
#[derive(Debug, Clone)]
pub struct Packages {
    packages: Vec<String>,
    present: bool,
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
        }
    }

    /// Whether the packages should be installed or removed.
    pub fn present(mut self, present: bool) -> Self {
        self.present = present;
        self
    }
}

#[async_trait]
impl Producer for Packages {
    fn kind(&self) -> &'static str {
        "pkg.packages"
    }

    async fn build(&self, ctx: &OpContext<'_>) -> Result<Vec<String>, OpError> {
        let family = server::os_family(ctx).await?.ok_or_else(|| {
            OpError::FactUnavailable("linux_distribution".to_string())
        })?;

        match family {
            OsFamily::Debian => {
                apt::Packages::new(self.packages.clone())
                    .present(self.present)
                    .build(ctx)
                    .await
            }
            OsFamily::RedHat => {
                yum::Packages::new(self.packages.clone())
                    .present(self.present)
                    .build(ctx)
                    .await
            }
            OsFamily::Other(name) => Err(OpError::failed(format!(
                "no supported package manager for {} on {}",
                name,
                ctx.host().name()
            ))),
        }
    }
}
