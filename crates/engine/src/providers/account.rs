//! `chef_user` and `chef_org` resources, managed through `chef-server-ctl`.

use std::path::Path;

use tracing::info;

use crate::error::{HostError, ProviderError};
use crate::host::{Host, shell_quote};
use crate::resource::{Action, ApplyContext, Outcome, Provider};

const CTL: &str = "chef-server-ctl";
const USER_KEY_DIR: &str = "/etc/opscode/users";
const ORG_KEY_DIR: &str = "/etc/opscode/orgs";

fn ensure_dir(host: &dyn Host, dir: &str) -> Result<(), HostError> {
    let dir = Path::new(dir);
    if host.is_dir(dir) {
        Ok(())
    } else {
        host.create_dir(dir, true)
    }
}

/// A Chef Infra Server user.
#[derive(Debug, Clone)]
pub struct ChefUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub serveradmin: bool,
}

impl ChefUser {
    fn exists(&self, host: &dyn Host) -> Result<bool, HostError> {
        let command = format!("{CTL} user-show {}", shell_quote(&self.username));
        Ok(host.run_command(&command)?.success())
    }

    fn create(&self, host: &dyn Host) -> Result<Outcome, HostError> {
        ensure_dir(host, USER_KEY_DIR)?;
        let command = format!(
            "{CTL} user-create {} {} {} {} {} --filename {}",
            shell_quote(&self.username),
            shell_quote(&self.first_name),
            shell_quote(&self.last_name),
            shell_quote(&self.email),
            shell_quote(&self.password),
            shell_quote(&format!("{USER_KEY_DIR}/{}.pem", self.username)),
        );
        host.run_checked(&command).map_err(|err| match err {
            HostError::Command { status, stderr, .. } => HostError::command(
                format!(
                    "{CTL} user-create {} (password hidden)",
                    shell_quote(&self.username)
                ),
                status,
                stderr,
            ),
            other => other,
        })?;

        let mut outcome = Outcome::changed(format!("created user {}", self.username));
        if self.serveradmin {
            host.run_checked(&format!(
                "{CTL} grant-server-admin-permissions {}",
                shell_quote(&self.username)
            ))?;
            outcome = outcome.and(Outcome::changed("granted server admin"));
        }
        info!(user = %self.username, serveradmin = self.serveradmin, "Created Chef user");
        Ok(outcome)
    }
}

impl Provider for ChefUser {
    fn kind(&self) -> &'static str {
        "chef_user"
    }

    fn name(&self) -> String {
        self.username.clone()
    }

    fn default_action(&self) -> Action {
        Action::Create
    }

    fn supports(&self, action: Action) -> bool {
        matches!(action, Action::Create | Action::Delete)
    }

    fn converge(
        &self,
        action: Action,
        ctx: &mut ApplyContext<'_>,
    ) -> Result<Outcome, ProviderError> {
        let exists = self.exists(ctx.host)?;
        match (action, exists) {
            (Action::Create, false) => Ok(self.create(ctx.host)?),
            (Action::Delete, true) => {
                ctx.host.run_checked(&format!(
                    "{CTL} user-delete {} --yes",
                    shell_quote(&self.username)
                ))?;
                Ok(Outcome::changed(format!("deleted user {}", self.username)))
            }
            (Action::Create | Action::Delete, _) => Ok(Outcome::unchanged()),
            (other, _) => Err(ProviderError::Unsupported(other)),
        }
    }
}

/// A Chef Infra Server organization.
#[derive(Debug, Clone)]
pub struct ChefOrg {
    pub name: String,
    pub full_name: String,
    /// Users associated as admins when the organization is created.
    pub admins: Vec<String>,
}

impl ChefOrg {
    fn exists(&self, host: &dyn Host) -> Result<bool, HostError> {
        let command = format!("{CTL} org-show {}", shell_quote(&self.name));
        Ok(host.run_command(&command)?.success())
    }

    fn create(&self, host: &dyn Host) -> Result<Outcome, HostError> {
        ensure_dir(host, ORG_KEY_DIR)?;
        host.run_checked(&format!(
            "{CTL} org-create {} {} --filename {}",
            shell_quote(&self.name),
            shell_quote(&self.full_name),
            shell_quote(&format!("{ORG_KEY_DIR}/{}-validation.pem", self.name)),
        ))?;
        for admin in &self.admins {
            host.run_checked(&format!(
                "{CTL} org-user-add {} {} --admin",
                shell_quote(&self.name),
                shell_quote(admin)
            ))?;
        }
        info!(org = %self.name, admins = self.admins.len(), "Created Chef organization");
        Ok(Outcome::changed(format!("created org {}", self.name)))
    }
}

impl Provider for ChefOrg {
    fn kind(&self) -> &'static str {
        "chef_org"
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn default_action(&self) -> Action {
        Action::Create
    }

    fn supports(&self, action: Action) -> bool {
        matches!(action, Action::Create | Action::Delete)
    }

    fn converge(
        &self,
        action: Action,
        ctx: &mut ApplyContext<'_>,
    ) -> Result<Outcome, ProviderError> {
        let exists = self.exists(ctx.host)?;
        match (action, exists) {
            (Action::Create, false) => Ok(self.create(ctx.host)?),
            (Action::Delete, true) => {
                ctx.host.run_checked(&format!(
                    "{CTL} org-delete {} --yes",
                    shell_quote(&self.name)
                ))?;
                Ok(Outcome::changed(format!("deleted org {}", self.name)))
            }
            (Action::Create | Action::Delete, _) => Ok(Outcome::unchanged()),
            (other, _) => Err(ProviderError::Unsupported(other)),
        }
    }
}
