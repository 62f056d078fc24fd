//! Resources: the smallest declarative unit of a convergence run.
//!
//! A [`Resource`] pairs an identity (`kind[name]`) with a [`Provider`] that
//! knows how to move one target into its desired state, plus the guards,
//! action and notifications that decide when that happens.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeStore;
use crate::error::{AttributeError, GuardError, ProviderError};
use crate::graph::{Notification, Timing};
use crate::host::Host;

/// Identity of a resource, unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: String,
    pub name: String,
}

impl ResourceId {
    /// Create a resource identity.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.name)
    }
}

/// What a resource is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Do nothing unless notified.
    Nothing,
    Create,
    Delete,
    Install,
    Upgrade,
    Reconfigure,
    Run,
    Render,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nothing => "nothing",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Reconfigure => "reconfigure",
            Self::Run => "run",
            Self::Render => "render",
        };
        write!(f, "{s}")
    }
}

/// Result of applying one resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outcome {
    /// Whether host state changed.
    pub changed: bool,
    /// Short description of what changed.
    pub summary: Option<String>,
}

impl Outcome {
    /// Host state already matched.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Host state was changed.
    pub fn changed(summary: impl Into<String>) -> Self {
        Self {
            changed: true,
            summary: Some(summary.into()),
        }
    }

    /// Fold another outcome into this one.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        let summary = match (self.summary, other.summary) {
            (Some(a), Some(b)) => Some(format!("{a}; {b}")),
            (a, b) => a.or(b),
        };
        Self {
            changed: self.changed || other.changed,
            summary,
        }
    }
}

type LazyFn<T> = Box<dyn Fn(&AttributeStore) -> Result<T, AttributeError>>;

/// A property value fixed at declaration or computed when the resource runs.
pub enum Lazy<T> {
    Value(T),
    Deferred(LazyFn<T>),
}

impl<T: Clone> Lazy<T> {
    /// Defer computation to the resource's turn in the run.
    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn(&AttributeStore) -> Result<T, AttributeError> + 'static,
    {
        Self::Deferred(Box::new(f))
    }

    /// Resolve against the current attributes.
    ///
    /// # Errors
    ///
    /// Propagates the closure's [`AttributeError`].
    pub fn resolve(&self, attributes: &AttributeStore) -> Result<T, AttributeError> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Deferred(f) => f(attributes),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<String> for Lazy<String> {
    fn from(value: String) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Lazy<String> {
    fn from(value: &str) -> Self {
        Self::Value(value.to_string())
    }
}

impl From<serde_json::Value> for Lazy<serde_json::Value> {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

/// Read-only view handed to guard predicates.
pub struct GuardContext<'a> {
    pub host: &'a dyn Host,
    pub attributes: &'a AttributeStore,
}

type PredicateFn = Box<dyn Fn(&GuardContext<'_>) -> Result<bool, GuardError>>;

/// A condition evaluated against current host state.
pub enum Predicate {
    /// True when the path exists on the host.
    PathExists(PathBuf),
    /// True when the shell command exits zero.
    CommandSucceeds(String),
    /// True when the attribute is set and non-blank.
    AttributePresent(String),
    /// Arbitrary check.
    Check(PredicateFn),
}

impl Predicate {
    /// Build a predicate from a closure.
    pub fn check<F>(f: F) -> Self
    where
        F: Fn(&GuardContext<'_>) -> Result<bool, GuardError> + 'static,
    {
        Self::Check(Box::new(f))
    }

    /// Evaluate the predicate.
    ///
    /// # Errors
    ///
    /// Returns a [`GuardError`] when the check itself fails. A failing
    /// command is `Ok(false)`, not an error.
    pub fn evaluate(&self, ctx: &GuardContext<'_>) -> Result<bool, GuardError> {
        match self {
            Self::PathExists(path) => Ok(ctx.host.exists(path)),
            Self::CommandSucceeds(command) => Ok(ctx.host.run_command(command)?.success()),
            Self::AttributePresent(path) => Ok(!ctx.attributes.is_blank(path.as_str())),
            Self::Check(f) => f(ctx),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathExists(path) => write!(f, "PathExists({})", path.display()),
            Self::CommandSucceeds(command) => write!(f, "CommandSucceeds({command})"),
            Self::AttributePresent(path) => write!(f, "AttributePresent({path})"),
            Self::Check(_) => f.write_str("Check(..)"),
        }
    }
}

/// `only_if` / `not_if` gate on a resource.
#[derive(Debug)]
pub enum Guard {
    /// Run only if the predicate holds.
    OnlyIf(Predicate),
    /// Skip if the predicate holds.
    NotIf(Predicate),
}

impl Guard {
    /// Whether the guard lets the resource run.
    ///
    /// # Errors
    ///
    /// Propagates predicate failures; they are never read as a skip.
    pub fn allows(&self, ctx: &GuardContext<'_>) -> Result<bool, GuardError> {
        match self {
            Self::OnlyIf(predicate) => predicate.evaluate(ctx),
            Self::NotIf(predicate) => predicate.evaluate(ctx).map(|holds| !holds),
        }
    }

    /// Short description for logs and skip reasons.
    pub fn describe(&self) -> String {
        match self {
            Self::OnlyIf(predicate) => format!("only_if {predicate:?}"),
            Self::NotIf(predicate) => format!("not_if {predicate:?}"),
        }
    }
}

/// Mutable view handed to providers when they converge.
pub struct ApplyContext<'a> {
    pub host: &'a dyn Host,
    pub attributes: &'a mut AttributeStore,
}

/// Kind-specific behaviour behind a resource.
///
/// Implementations resolve their lazy properties first, so attribute
/// failures surface before any side effect, then apply. Applying the same
/// desired state twice must report `changed == false` the second time.
pub trait Provider {
    /// Resource kind, the `kind` half of the identity.
    fn kind(&self) -> &'static str;

    /// Resource name, the `name` half of the identity.
    fn name(&self) -> String;

    /// Action used when none is declared.
    fn default_action(&self) -> Action;

    /// Whether the provider can perform `action`.
    fn supports(&self, action: Action) -> bool;

    /// Move the target towards its desired state.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Resolve`] before any side effect,
    /// [`ProviderError::Apply`] when the side effect fails.
    fn converge(&self, action: Action, ctx: &mut ApplyContext<'_>)
        -> Result<Outcome, ProviderError>;
}

/// A declared resource.
pub struct Resource {
    id: ResourceId,
    action: Action,
    guards: Vec<Guard>,
    notifications: Vec<(ResourceId, Action, Timing)>,
    best_effort: bool,
    provider: Box<dyn Provider>,
}

impl Resource {
    /// Declare a resource backed by `provider`, with its default action.
    pub fn new<P: Provider + 'static>(provider: P) -> Self {
        Self {
            id: ResourceId::new(provider.kind(), provider.name()),
            action: provider.default_action(),
            guards: Vec::new(),
            notifications: Vec::new(),
            best_effort: false,
            provider: Box::new(provider),
        }
    }

    /// Set the declared action.
    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// Run only if `predicate` holds.
    #[must_use]
    pub fn only_if(mut self, predicate: Predicate) -> Self {
        self.guards.push(Guard::OnlyIf(predicate));
        self
    }

    /// Skip if `predicate` holds.
    #[must_use]
    pub fn not_if(mut self, predicate: Predicate) -> Self {
        self.guards.push(Guard::NotIf(predicate));
        self
    }

    /// Notify `target` with `action` when this resource changes the host.
    #[must_use]
    pub fn notifies(mut self, target: ResourceId, action: Action, timing: Timing) -> Self {
        self.notifications.push((target, action, timing));
        self
    }

    /// Record apply failures instead of aborting the run.
    #[must_use]
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    /// The resource identity.
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// The declared action.
    pub fn declared_action(&self) -> Action {
        self.action
    }

    /// The declared guards, in order.
    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    /// Whether apply failures are non-fatal.
    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    /// Whether the provider supports `action`.
    pub fn supports(&self, action: Action) -> bool {
        action == Action::Nothing || self.provider.supports(action)
    }

    pub(crate) fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub(crate) fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
            .into_iter()
            .map(|(target, action, timing)| Notification {
                source: self.id.clone(),
                target,
                action,
                timing,
            })
            .collect()
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("action", &self.action)
            .field("guards", &self.guards)
            .field("best_effort", &self.best_effort)
            .finish_non_exhaustive()
    }
}
