//! OS-level state: raw shell, users, port waits.

use async_trait::async_trait;

use crate::facts::server as facts;
use crate::op::{OpContext, OpError, Producer};

/// Run raw shell commands, verbatim.
///
/// No diffing: the declared commands always run. Callers that need
/// idempotency should guard the commands themselves.
#[derive(Debug, Clone)]
pub struct Shell {
    commands: Vec<String>,
}

impl Shell {
    /// Run the given commands in order.
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Producer for Shell {
    fn kind(&self) -> &'static str {
        "server.shell"
    }

    async fn build(&self, _ctx: &OpContext<'_>) -> Result<Vec<String>, OpError> {
        Ok(self.commands.clone())
    }
}

/// Ensure the state of a system user.
#[derive(Debug, Clone)]
pub struct User {
    name: String,
    present: bool,
    home: Option<String>,
    shell: Option<String>,
}

impl User {
    /// Ensure the named user exists.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            present: true,
            home: None,
            shell: None,
        }
    }

    /// Whether the user should exist.
    pub fn present(mut self, present: bool) -> Self {
        self.present = present;
        self
    }

    /// Desired home directory.
    pub fn home(mut self, home: impl Into<String>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Desired login shell.
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }
}

#[async_trait]
impl Producer for User {
    fn kind(&self) -> &'static str {
        "server.user"
    }

    async fn build(&self, ctx: &OpContext<'_>) -> Result<Vec<String>, OpError> {
        let mut commands = Vec::new();

        let users = facts::users(ctx).await?.unwrap_or_default();
        let user = users.get(&self.name);

        // Exists but we don't want them?
        if !self.present {
            if user.is_some() {
                commands.push(format!("userdel {}", self.name));
            }
            return Ok(commands);
        }

        match user {
            // Doesn't exist but we want them?
            None => {
                let mut args = Vec::new();
                if let Some(home) = &self.home {
                    args.push(format!("-d {}", home));
                }
                if let Some(shell) = &self.shell {
                    args.push(format!("-s {}", shell));
                }
                commands.push(format!("useradd {} {}", args.join(" "), self.name));
            }
            // Exists and we want them: check home/shell
            Some(user) => {
                if let Some(home) = &self.home {
                    if &user.home != home {
                        commands.push(format!("usermod -d {} {}", home, self.name));
                    }
                }
                if let Some(shell) = &self.shell {
                    if &user.shell != shell {
                        commands.push(format!("usermod -s {} {}", shell, self.name));
                    }
                }
            }
        }

        Ok(commands)
    }
}

/// Wait for a port to come active on the host. Requires netstat, checks
/// every 1s.
#[derive(Debug, Clone)]
pub struct Wait {
    port: u16,
}

impl Wait {
    /// Wait for the given port to listen.
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl Producer for Wait {
    fn kind(&self) -> &'static str {
        "server.wait"
    }

    async fn build(&self, _ctx: &OpContext<'_>) -> Result<Vec<String>, OpError> {
        Ok(vec![format!(
            r#"while ! (netstat -an | grep LISTEN | grep -e "\.{port}" -e ":{port}"); do
    echo "waiting for port {port}..."
    sleep 1
done"#,
            port = self.port
        )])
    }
}
