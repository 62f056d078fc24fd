//! `file`, `template` and `directory` resources.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::error::{AttributeError, HostError, ProviderError};
use crate::host::Host;
use crate::resource::{Action, ApplyContext, Lazy, Outcome, Provider};

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}"));

/// Converge one file's content, mode and owner.
///
/// `content == None` only ensures the file exists; existing content is
/// left alone.
///
/// # Errors
///
/// Propagates host failures.
pub fn converge_file(
    host: &dyn Host,
    path: &Path,
    content: Option<&[u8]>,
    mode: Option<u32>,
    owner: Option<&str>,
) -> Result<Outcome, HostError> {
    let mut outcome = match (host.read_file(path)?, content) {
        (None, desired) => {
            host.write_file(path, desired.unwrap_or_default(), mode)?;
            Outcome::changed("created")
        }
        (Some(existing), Some(desired)) if existing != desired => {
            host.write_file(path, desired, mode)?;
            Outcome::changed("content updated")
        }
        _ => Outcome::unchanged(),
    };

    if let Some(mode) = mode {
        if host.file_mode(path)? != Some(mode) {
            host.set_mode(path, mode)?;
            outcome = outcome.and(Outcome::changed(format!("mode {mode:04o}")));
        }
    }

    if let Some(owner) = owner {
        if host.file_owner(path)?.as_deref() != Some(owner) {
            host.set_owner(path, owner)?;
            outcome = outcome.and(Outcome::changed(format!("owner {owner}")));
        }
    }

    Ok(outcome)
}

fn delete_path(host: &dyn Host, path: &Path) -> Result<Outcome, HostError> {
    if host.exists(path) {
        host.remove(path)?;
        Ok(Outcome::changed("deleted"))
    } else {
        Ok(Outcome::unchanged())
    }
}

/// Render `{{ name }}` placeholders from `variables`.
///
/// # Errors
///
/// Returns [`AttributeError::Template`] when a placeholder has no binding.
pub fn render_template(
    template: &str,
    body: &str,
    variables: &BTreeMap<String, String>,
) -> Result<String, AttributeError> {
    let placeholder = PLACEHOLDER
        .as_ref()
        .map_err(|e| AttributeError::template(template, e.to_string()))?;

    let mut unbound: Option<String> = None;
    let rendered = placeholder.replace_all(body, |captures: &Captures<'_>| {
        let name = captures.get(1).map_or("", |m| m.as_str());
        variables.get(name).cloned().unwrap_or_else(|| {
            unbound.get_or_insert_with(|| name.to_string());
            String::new()
        })
    });

    match unbound {
        Some(name) => Err(AttributeError::template(
            template,
            format!("variable '{name}' is not bound"),
        )),
        None => Ok(rendered.into_owned()),
    }
}

/// A file with literal content.
#[derive(Debug)]
pub struct File {
    path: PathBuf,
    content: Option<Lazy<String>>,
    mode: Option<u32>,
    owner: Option<String>,
}

impl File {
    /// Declare a file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content: None,
            mode: None,
            owner: None,
        }
    }

    /// Desired content.
    #[must_use]
    pub fn content(mut self, content: impl Into<Lazy<String>>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Desired permission bits.
    #[must_use]
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Desired owning user.
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

impl Provider for File {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn name(&self) -> String {
        self.path.display().to_string()
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
        match action {
            Action::Create => {
                let content = self
                    .content
                    .as_ref()
                    .map(|c| c.resolve(ctx.attributes))
                    .transpose()?;
                Ok(converge_file(
                    ctx.host,
                    &self.path,
                    content.as_deref().map(str::as_bytes),
                    self.mode,
                    self.owner.as_deref(),
                )?)
            }
            Action::Delete => Ok(delete_path(ctx.host, &self.path)?),
            other => Err(ProviderError::Unsupported(other)),
        }
    }
}

/// A file rendered from a template body and variable bindings.
#[derive(Debug)]
pub struct Template {
    path: PathBuf,
    source: String,
    body: String,
    variables: BTreeMap<String, Lazy<String>>,
    mode: Option<u32>,
    owner: Option<String>,
}

impl Template {
    /// Declare a template at `path` rendered from `body`. `source` names
    /// the template in errors.
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            body: body.into(),
            variables: BTreeMap::new(),
            mode: None,
            owner: None,
        }
    }

    /// Bind a template variable.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Lazy<String>>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Desired permission bits.
    #[must_use]
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Desired owning user.
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    fn render(&self, ctx: &ApplyContext<'_>) -> Result<String, AttributeError> {
        let bound = self
            .variables
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.resolve(ctx.attributes)?)))
            .collect::<Result<BTreeMap<_, _>, AttributeError>>()?;
        render_template(&self.source, &self.body, &bound)
    }
}

impl Provider for Template {
    fn kind(&self) -> &'static str {
        "template"
    }

    fn name(&self) -> String {
        self.path.display().to_string()
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
        match action {
            Action::Create => {
                let rendered = self.render(ctx)?;
                debug!(template = %self.source, path = %self.path.display(), "Rendered template");
                Ok(converge_file(
                    ctx.host,
                    &self.path,
                    Some(rendered.as_bytes()),
                    self.mode,
                    self.owner.as_deref(),
                )?)
            }
            Action::Delete => Ok(delete_path(ctx.host, &self.path)?),
            other => Err(ProviderError::Unsupported(other)),
        }
    }
}

/// A directory.
#[derive(Debug)]
pub struct Directory {
    path: PathBuf,
    mode: Option<u32>,
    recursive: bool,
}

impl Directory {
    /// Declare a directory at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: None,
            recursive: false,
        }
    }

    /// Desired permission bits.
    #[must_use]
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Create missing parents too.
    #[must_use]
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }
}

impl Provider for Directory {
    fn kind(&self) -> &'static str {
        "directory"
    }

    fn name(&self) -> String {
        self.path.display().to_string()
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
        match action {
            Action::Create => {
                let mut outcome = Outcome::unchanged();
                if !ctx.host.is_dir(&self.path) {
                    ctx.host.create_dir(&self.path, self.recursive)?;
                    outcome = Outcome::changed("created");
                }
                if let Some(mode) = self.mode {
                    if ctx.host.file_mode(&self.path)? != Some(mode) {
                        ctx.host.set_mode(&self.path, mode)?;
                        outcome = outcome.and(Outcome::changed(format!("mode {mode:04o}")));
                    }
                }
                Ok(outcome)
            }
            Action::Delete => Ok(delete_path(ctx.host, &self.path)?),
            other => Err(ProviderError::Unsupported(other)),
        }
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
    fn test_file_create_is_idempotent() -> TestResult {
        let host = InMemoryHost::new();
        let mut attrs = AttributeStore::new();
        let file = File::new("/etc/ssl/private/host.crt").content("CERT").mode(0o644);

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        assert!(file.converge(Action::Create, &mut ctx)?.changed);
        assert!(!file.converge(Action::Create, &mut ctx)?.changed);
        assert_eq!(host.file_string("/etc/ssl/private/host.crt").as_deref(), Some("CERT"));
        Ok(())
    }

    #[test]
    fn test_file_mode_drift_is_corrected() -> TestResult {
        let host = InMemoryHost::new().with_file("/etc/ssl/private/host.key", "KEY");
        let mut attrs = AttributeStore::new();
        let file = File::new("/etc/ssl/private/host.key").content("KEY").mode(0o600);

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        let outcome = file.converge(Action::Create, &mut ctx)?;
        assert!(outcome.changed);
        assert_eq!(outcome.summary.as_deref(), Some("mode 0600"));
        assert_eq!(host.file("/etc/ssl/private/host.key").and_then(|f| f.mode), Some(0o600));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_private_file_is_written_with_its_mode() -> TestResult {
        use crate::host::LocalHost;

        let dir = tempfile::tempdir()?;
        let host = LocalHost::new(dir.path());
        let mut attrs = AttributeStore::new();
        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };

        let key = File::new("/host.key").content("PRIVATE").mode(0o600);
        let outcome = key.converge(Action::Create, &mut ctx)?;

        // No chmod after the write: the mode was already right.
        assert_eq!(outcome.summary.as_deref(), Some("created"));
        assert_eq!(host.file_mode(Path::new("/host.key"))?, Some(0o600));
        assert!(!key.converge(Action::Create, &mut ctx)?.changed);
        Ok(())
    }

    #[test]
    fn test_marker_file_keeps_content() -> TestResult {
        let host = InMemoryHost::new().with_file("/var/opt/opscode/bootstrapped", "old");
        let mut attrs = AttributeStore::new();
        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };

        let marker = File::new("/var/opt/opscode/bootstrapped");
        assert!(!marker.converge(Action::Create, &mut ctx)?.changed);
        assert_eq!(host.file_string("/var/opt/opscode/bootstrapped").as_deref(), Some("old"));
        Ok(())
    }

    #[test]
    fn test_delete() -> TestResult {
        let host = InMemoryHost::new().with_file("/tmp/knife.rb", "x");
        let mut attrs = AttributeStore::new();
        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };

        let file = File::new("/tmp/knife.rb");
        assert!(file.converge(Action::Delete, &mut ctx)?.changed);
        assert!(!file.converge(Action::Delete, &mut ctx)?.changed);
        Ok(())
    }

    #[test]
    fn test_render_template() -> Result<(), AttributeError> {
        let vars = BTreeMap::from([
            ("user".to_string(), "pivotal".to_string()),
            ("org".to_string(), "acme".to_string()),
        ]);
        let rendered = render_template("knife.rb", "node_name '{{ user }}' # {{org}}", &vars)?;
        assert_eq!(rendered, "node_name 'pivotal' # acme");

        let err = render_template("knife.rb", "{{ missing }}", &vars);
        assert!(matches!(err, Err(AttributeError::Template { .. })));
        Ok(())
    }

    #[test]
    fn test_render_reports_first_unbound_variable() {
        let vars = BTreeMap::from([("user".to_string(), "pivotal".to_string())]);
        for _ in 0..3 {
            let err = render_template("knife.rb", "{{ user }} {{ org }} {{ key }}", &vars);
            assert!(matches!(
                err,
                Err(AttributeError::Template { ref reason, .. }) if reason == "variable 'org' is not bound"
            ));
        }
        assert_eq!(
            render_template("plain", "no placeholders {{ }}", &vars).ok().as_deref(),
            Some("no placeholders {{ }}")
        );
    }

    #[test]
    fn test_template_reads_lazy_variables() -> TestResult {
        let host = InMemoryHost::new();
        let mut attrs = AttributeStore::new();
        attrs.set_normal("fqdn", json!("host.example.com"));

        let template = Template::new("/tmp/knife.rb", "knife.rb", "chef_server_url 'https://{{ fqdn }}'")
            .variable("fqdn", Lazy::deferred(|attrs| attrs.require_str("fqdn")));

        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };
        assert!(template.converge(Action::Create, &mut ctx)?.changed);
        assert_eq!(
            host.file_string("/tmp/knife.rb").as_deref(),
            Some("chef_server_url 'https://host.example.com'")
        );
        Ok(())
    }

    #[test]
    fn test_directory() -> TestResult {
        let host = InMemoryHost::new();
        let mut attrs = AttributeStore::new();
        let mut ctx = ApplyContext {
            host: &host,
            attributes: &mut attrs,
        };

        let dir = Directory::new("/var/opt/opscode/upgrades").recursive().mode(0o755);
        assert!(dir.converge(Action::Create, &mut ctx)?.changed);
        assert!(!dir.converge(Action::Create, &mut ctx)?.changed);
        assert!(host.is_dir(Path::new("/var/opt/opscode")));
        Ok(())
    }
}
