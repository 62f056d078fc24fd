//! `ingredient` and `ingredient_config` resources: Chef products installed
//! from the package repository and managed through their `*-ctl` tool.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::file::converge_file;
use crate::error::ProviderError;
use crate::host::PackageSpec;
use crate::resource::{Action, ApplyContext, Lazy, Outcome, Provider};

/// Packaging facts about a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub name: String,
    pub package: String,
    pub ctl: String,
    pub config_path: PathBuf,
    pub license_flag: Option<&'static str>,
}

/// Look up a product by name. Unknown products follow the `<name>` package,
/// `<name>-ctl` and `/etc/<name>/<name>.rb` convention.
pub fn product(name: &str) -> Product {
    let (package, ctl, config, license_flag) = match name {
        "chef-server" => (
            "chef-server-core".to_string(),
            "chef-server-ctl".to_string(),
            "/etc/opscode/chef-server.rb".to_string(),
            Some("--chef-license=accept"),
        ),
        "manage" => (
            "chef-manage".to_string(),
            "chef-manage-ctl".to_string(),
            "/etc/chef-manage/manage.rb".to_string(),
            Some("--accept-license"),
        ),
        "push-jobs-server" => (
            "opscode-push-jobs-server".to_string(),
            "opscode-push-jobs-server-ctl".to_string(),
            "/etc/opscode-push-jobs-server/opscode-push-jobs-server.rb".to_string(),
            None,
        ),
        other => (
            other.to_string(),
            format!("{other}-ctl"),
            format!("/etc/{other}/{other}.rb"),
            None,
        ),
    };

    Product {
        name: name.to_string(),
        package,
        ctl,
        config_path: PathBuf::from(config),
        license_flag,
    }
}

/// Whether an installed package version satisfies a pinned version.
///
/// Package revisions count as a match: `13.0.17-1` satisfies `13.0.17`.
pub fn version_matches(installed: &str, pinned: &str) -> bool {
    installed == pinned
        || installed
            .strip_prefix(pinned)
            .is_some_and(|rest| rest.starts_with(['-', '+', '~']))
}

fn pinned(version: Option<String>) -> Option<String> {
    version.filter(|v| !v.is_empty() && v != "latest")
}

/// An installed Chef product.
#[derive(Debug)]
pub struct Ingredient {
    product: Product,
    channel: Lazy<String>,
    version: Lazy<Option<String>>,
    accept_license: Lazy<bool>,
}

impl Ingredient {
    /// Declare product `name` from the stable channel, unpinned.
    pub fn new(name: &str) -> Self {
        Self {
            product: product(name),
            channel: Lazy::Value("stable".to_string()),
            version: Lazy::Value(None),
            accept_license: Lazy::Value(false),
        }
    }

    #[must_use]
    pub fn channel(mut self, channel: impl Into<Lazy<String>>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Pin a version. Empty and `latest` mean unpinned.
    #[must_use]
    pub fn version(mut self, version: Lazy<Option<String>>) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn accept_license(mut self, accept: Lazy<bool>) -> Self {
        self.accept_license = accept;
        self
    }

    fn spec(&self, ctx: &ApplyContext<'_>) -> Result<PackageSpec, ProviderError> {
        Ok(PackageSpec {
            name: self.product.package.clone(),
            channel: self.channel.resolve(ctx.attributes)?,
            version: pinned(self.version.resolve(ctx.attributes)?),
        })
    }

    fn install(&self, ctx: &mut ApplyContext<'_>, upgrade: bool) -> Result<Outcome, ProviderError> {
        let spec = self.spec(ctx)?;
        let installed = ctx.host.installed_version(&spec.name)?;

        let needed = match (&installed, &spec.version) {
            (None, _) => true,
            (Some(current), Some(wanted)) => !version_matches(current, wanted),
            (Some(_), None) => upgrade,
        };
        if !needed {
            debug!(package = %spec.name, version = ?installed, "Package already installed");
            return Ok(Outcome::unchanged());
        }

        ctx.host.install_package(&spec)?;
        let after = ctx.host.installed_version(&spec.name)?;
        if after == installed {
            return Ok(Outcome::unchanged());
        }
        info!(package = %spec.name, version = ?after, "Installed package");
        Ok(Outcome::changed(format!(
            "installed {} {}",
            spec.name,
            after.as_deref().unwrap_or("unknown")
        )))
    }

    fn reconfigure(&self, ctx: &mut ApplyContext<'_>) -> Result<Outcome, ProviderError> {
        let accept = self.accept_license.resolve(ctx.attributes)?;
        let mut command = format!("{} reconfigure", self.product.ctl);
        if let (true, Some(flag)) = (accept, self.product.license_flag) {
            command.push(' ');
            command.push_str(flag);
        }
        ctx.host.run_checked(&command)?;
        Ok(Outcome::changed(format!("ran `{command}`")))
    }
}

impl Provider for Ingredient {
    fn kind(&self) -> &'static str {
        "ingredient"
    }

    fn name(&self) -> String {
        self.product.name.clone()
    }

    fn default_action(&self) -> Action {
        Action::Install
    }

    fn supports(&self, action: Action) -> bool {
        matches!(
            action,
            Action::Install | Action::Upgrade | Action::Reconfigure | Action::Delete
        )
    }

    fn converge(
        &self,
        action: Action,
        ctx: &mut ApplyContext<'_>,
    ) -> Result<Outcome, ProviderError> {
        match action {
            Action::Install => self.install(ctx, false),
            Action::Upgrade => self.install(ctx, true),
            Action::Reconfigure => self.reconfigure(ctx),
            Action::Delete => {
                if ctx.host.installed_version(&self.product.package)?.is_some() {
                    ctx.host.uninstall_package(&self.product.package)?;
                    Ok(Outcome::changed(format!("removed {}", self.product.package)))
                } else {
                    Ok(Outcome::unchanged())
                }
            }
            other => Err(ProviderError::Unsupported(other)),
        }
    }
}

/// Configuration file of a Chef product.
#[derive(Debug)]
pub struct IngredientConfig {
    product: Product,
    config: Lazy<String>,
}

impl IngredientConfig {
    /// Declare the configuration of product `name`.
    pub fn new(name: &str, config: impl Into<Lazy<String>>) -> Self {
        Self {
            product: product(name),
            config: config.into(),
        }
    }

    /// Where the configuration is written.
    pub fn path(&self) -> &Path {
        &self.product.config_path
    }
}

impl Provider for IngredientConfig {
    fn kind(&self) -> &'static str {
        "ingredient_config"
    }

    fn name(&self) -> String {
        self.product.name.clone()
    }

    fn default_action(&self) -> Action {
        Action::Render
    }

    fn supports(&self, action: Action) -> bool {
        action == Action::Render
    }

    fn converge(
        &self,
        action: Action,
        ctx: &mut ApplyContext<'_>,
    ) -> Result<Outcome, ProviderError> {
        if action != Action::Render {
            return Err(ProviderError::Unsupported(action));
        }

        let mut config = self.config.resolve(ctx.attributes)?;
        if !config.is_empty() && !config.ends_with('\n') {
            config.push('\n');
        }

        let mut outcome = Outcome::unchanged();
        if let Some(parent) = self.path().parent() {
            if !ctx.host.is_dir(parent) {
                ctx.host.create_dir(parent, true)?;
                outcome = Outcome::changed(format!("created {}", parent.display()));
            }
        }
        Ok(outcome.and(converge_file(
            ctx.host,
            self.path(),
            Some(config.as_bytes()),
            None,
            None,
        )?))
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
    fn test_product_table() {
        assert_eq!(product("chef-server").package, "chef-server-core");
        assert_eq!(
            product("manage").config_path,
            PathBuf::from("/etc/chef-manage/manage.rb")
        );
        let unknown = product("supermarket");
        assert_eq!(unknown.ctl, "supermarket-ctl");
        assert_eq!(
            unknown.config_path,
            PathBuf::from("/etc/supermarket/supermarket.rb")
        );
    }

    #[test]
    fn test_version_matches() {
        assert!(version_matches("13.0.17", "13.0.17"));
        assert!(version_matches("13.0.17-1", "13.0.17"));
        assert!(!version_matches("13.0.170", "13.0.17"));
        assert!(!version_matches("12.19.31-1", "13.0.17"));
    }

    #[test]
    fn test_install_is_idempotent() -> TestResult {
        let host = InMemoryHost::new();
        let mut attrs = AttributeStore::new();
        attrs.set_normal("version", json!("13.0.17"));
        let server = Ingredient::new("chef-server")
            .version(Lazy::deferred(|attrs| Ok(attrs.get_str("version"))));

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        assert!(server.converge(Action::Install, &mut ctx)?.changed);
        assert!(!server.converge(Action::Install, &mut ctx)?.changed);
        assert_eq!(host.installs().len(), 1);
        assert_eq!(host.package_version("chef-server-core").as_deref(), Some("13.0.17"));
        Ok(())
    }

    #[test]
    fn test_pinned_version_mismatch_reinstalls() -> TestResult {
        let host = InMemoryHost::new().with_package("chef-server-core", "12.19.31-1");
        let mut attrs = AttributeStore::new();
        let server = Ingredient::new("chef-server").version(Lazy::Value(Some("13.0.17".into())));

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        assert!(server.converge(Action::Install, &mut ctx)?.changed);
        Ok(())
    }

    #[test]
    fn test_unpinned_install_keeps_existing() -> TestResult {
        let host = InMemoryHost::new().with_package("chef-manage", "3.2.20-1");
        let mut attrs = AttributeStore::new();
        let manage = Ingredient::new("manage");

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        assert!(!manage.converge(Action::Install, &mut ctx)?.changed);
        assert!(host.installs().is_empty());
        Ok(())
    }

    #[test]
    fn test_reconfigure_accepts_license() -> TestResult {
        let host = InMemoryHost::new();
        let mut attrs = AttributeStore::new();
        let manage = Ingredient::new("manage").accept_license(Lazy::Value(true));

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        assert!(manage.converge(Action::Reconfigure, &mut ctx)?.changed);
        assert_eq!(host.commands(), vec!["chef-manage-ctl reconfigure --accept-license"]);
        Ok(())
    }

    #[test]
    fn test_config_written_once() -> TestResult {
        let host = InMemoryHost::new();
        let mut attrs = AttributeStore::new();
        let config = IngredientConfig::new("chef-server", "topology 'standalone'");

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        assert!(config.converge(Action::Render, &mut ctx)?.changed);
        assert!(!config.converge(Action::Render, &mut ctx)?.changed);
        assert_eq!(
            host.file_string("/etc/opscode/chef-server.rb").as_deref(),
            Some("topology 'standalone'\n")
        );
        Ok(())
    }
}
