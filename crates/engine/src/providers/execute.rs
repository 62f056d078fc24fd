//! `execute` resources.

use std::path::PathBuf;

use crate::error::{HostError, ProviderError};
use crate::resource::{Action, ApplyContext, Lazy, Outcome, Provider};

/// A shell command.
///
/// Commands are not idempotent on their own; pair them with a guard or
/// with [`Execute::creates`].
#[derive(Debug)]
pub struct Execute {
    name: String,
    command: Lazy<String>,
    creates: Option<PathBuf>,
    sensitive: bool,
}

impl Execute {
    /// Declare a command under `name`.
    pub fn new(name: impl Into<String>, command: impl Into<Lazy<String>>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            creates: None,
            sensitive: false,
        }
    }

    /// Skip the command when `path` exists.
    #[must_use]
    pub fn creates(mut self, path: impl Into<PathBuf>) -> Self {
        self.creates = Some(path.into());
        self
    }

    /// Keep the command line out of summaries and errors.
    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    fn display_command(&self, command: &str) -> String {
        if self.sensitive {
            format!("{} (sensitive)", self.name)
        } else {
            command.to_string()
        }
    }
}

impl Provider for Execute {
    fn kind(&self) -> &'static str {
        "execute"
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn default_action(&self) -> Action {
        Action::Run
    }

    fn supports(&self, action: Action) -> bool {
        action == Action::Run
    }

    fn converge(
        &self,
        action: Action,
        ctx: &mut ApplyContext<'_>,
    ) -> Result<Outcome, ProviderError> {
        if action != Action::Run {
            return Err(ProviderError::Unsupported(action));
        }

        let command = self.command.resolve(ctx.attributes)?;
        if let Some(creates) = &self.creates {
            if ctx.host.exists(creates) {
                return Ok(Outcome::unchanged());
            }
        }

        let shown = self.display_command(&command);
        ctx.host.run_checked(&command).map_err(|err| match err {
            HostError::Command { status, stderr, .. } => {
                HostError::command(shown.clone(), status, stderr)
            }
            other => other,
        })?;
        Ok(Outcome::changed(format!("ran `{shown}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeStore;
    use crate::memory::InMemoryHost;
    use serde_json::json;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_runs_resolved_command() -> TestResult {
        let host = InMemoryHost::new();
        let mut attrs = AttributeStore::new();
        attrs.set_normal("product", json!("chef-server"));
        let exec = Execute::new(
            "reconfigure",
            Lazy::deferred(|attrs| Ok(format!("{}-ctl reconfigure", attrs.require_str("product")?))),
        );

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        assert!(exec.converge(Action::Run, &mut ctx)?.changed);
        assert_eq!(host.commands(), vec!["chef-server-ctl reconfigure"]);
        Ok(())
    }

    #[test]
    fn test_creates_skips() -> TestResult {
        let host = InMemoryHost::new().with_file("/etc/opscode/pivotal.rb", "");
        let mut attrs = AttributeStore::new();
        let exec = Execute::new("first-boot", "chef-server-ctl reconfigure")
            .creates("/etc/opscode/pivotal.rb");

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        assert!(!exec.converge(Action::Run, &mut ctx)?.changed);
        assert!(host.commands().is_empty());
        Ok(())
    }

    #[test]
    fn test_failure_hides_sensitive_command() {
        let host = InMemoryHost::new().respond("chef-server-ctl set-secret", 1, "", "denied");
        let mut attrs = AttributeStore::new();
        let exec = Execute::new(
            "data-collector-token",
            "chef-server-ctl set-secret data_collector token 's3cret'",
        )
        .sensitive();

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        let err = exec.converge(Action::Run, &mut ctx).err().map(|e| e.to_string());
        assert!(err.as_deref().is_some_and(|e| e.contains("denied")));
        assert!(err.as_deref().is_some_and(|e| !e.contains("s3cret")));
    }
}
