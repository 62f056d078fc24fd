//! Error types for the convergence engine.
//!
//! Every run-level error names the resource it concerns. Lower-level errors
//! ([`AttributeError`], [`HostError`], [`GuardError`]) carry no resource
//! identity; the executor attaches it when it turns them into an [`Error`].

use thiserror::Error;

use crate::resource::{Action, ResourceId};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Run-level engine errors. All of them abort a convergence run.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A guard predicate itself failed. Never treated as a skip.
    #[error("guard for {resource} failed: {source}")]
    GuardEvaluation {
        resource: ResourceId,
        #[source]
        source: GuardError,
    },

    /// The side effect of a resource failed on the host.
    #[error("{resource} action '{action}' failed: {source}")]
    Apply {
        resource: ResourceId,
        action: Action,
        #[source]
        source: HostError,
    },

    /// A resource was re-triggered by notifications more often than allowed.
    #[error("{resource} was notified more than {limit} times in one run")]
    NotificationCycle { resource: ResourceId, limit: u32 },

    /// A required attribute resolved to nothing.
    #[error("{resource} requires attribute '{path}' which is not set")]
    MissingAttribute { resource: ResourceId, path: String },

    /// An attribute resolved to a value of the wrong shape.
    #[error("{resource} could not use attribute '{path}': {reason}")]
    AttributeType {
        resource: ResourceId,
        path: String,
        reason: String,
    },

    /// Two resources share the same `kind[name]` identity.
    #[error("{resource} is declared more than once")]
    DuplicateResource { resource: ResourceId },

    /// A notification refers to a resource that is not in the graph.
    #[error("{source_resource} notifies {target} which is not declared")]
    UnknownNotificationTarget {
        source_resource: ResourceId,
        target: ResourceId,
    },

    /// A resource identity that is not in the graph.
    #[error("{resource} is not declared")]
    UnknownResource { resource: ResourceId },

    /// A resource was declared or notified with an action its kind lacks.
    #[error("{resource} does not support action '{action}'")]
    UnsupportedAction { resource: ResourceId, action: Action },
}

impl Error {
    /// Create a guard evaluation error.
    pub fn guard_evaluation(resource: &ResourceId, source: GuardError) -> Self {
        Self::GuardEvaluation {
            resource: resource.clone(),
            source,
        }
    }

    /// Create an apply error from the host failure behind it.
    pub fn apply(resource: &ResourceId, action: Action, source: HostError) -> Self {
        Self::Apply {
            resource: resource.clone(),
            action,
            source,
        }
    }

    /// The host failure behind an apply error.
    pub const fn host_error(&self) -> Option<&HostError> {
        match self {
            Self::Apply { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Create a notification cycle error.
    pub fn notification_cycle(resource: &ResourceId, limit: u32) -> Self {
        Self::NotificationCycle {
            resource: resource.clone(),
            limit,
        }
    }

    /// Attach a resource identity to an attribute error.
    pub fn from_attribute(resource: &ResourceId, err: AttributeError) -> Self {
        match err {
            AttributeError::Missing { path } => Self::MissingAttribute {
                resource: resource.clone(),
                path,
            },
            AttributeError::TypeMismatch {
                path,
                expected,
                found,
            } => Self::AttributeType {
                resource: resource.clone(),
                path,
                reason: format!("expected {expected}, found {found}"),
            },
            AttributeError::Invalid { path, reason } => Self::AttributeType {
                resource: resource.clone(),
                path,
                reason,
            },
            AttributeError::Template { template, reason } => Self::AttributeType {
                resource: resource.clone(),
                path: template,
                reason,
            },
        }
    }

    /// The resource this error concerns.
    pub fn resource(&self) -> &ResourceId {
        match self {
            Self::GuardEvaluation { resource, .. }
            | Self::Apply { resource, .. }
            | Self::NotificationCycle { resource, .. }
            | Self::MissingAttribute { resource, .. }
            | Self::AttributeType { resource, .. }
            | Self::DuplicateResource { resource }
            | Self::UnknownResource { resource }
            | Self::UnsupportedAction { resource, .. } => resource,
            Self::UnknownNotificationTarget {
                source_resource, ..
            } => source_resource,
        }
    }
}

/// Attribute lookup and shaping errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("attribute '{path}' is not set")]
    Missing { path: String },

    #[error("attribute '{path}' should be {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("attribute '{path}' is invalid: {reason}")]
    Invalid { path: String, reason: String },

    #[error("template '{template}' failed to render: {reason}")]
    Template { template: String, reason: String },
}

impl AttributeError {
    /// Create a missing attribute error.
    pub fn missing(path: impl Into<String>) -> Self {
        Self::Missing { path: path.into() }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(
        path: impl Into<String>,
        expected: &'static str,
        found: &'static str,
    ) -> Self {
        Self::TypeMismatch {
            path: path.into(),
            expected,
            found,
        }
    }

    /// Create an invalid attribute error.
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a template render error.
    pub fn template(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of side effects against the host.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("I/O on '{path}' failed: {reason}")]
    Io { path: String, reason: String },

    #[error("command `{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("download of '{url}' failed: {reason}")]
    Download { url: String, reason: String },

    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    Checksum {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("package '{package}' operation failed: {reason}")]
    Package { package: String, reason: String },
}

impl HostError {
    /// Create an I/O error.
    pub fn io(path: impl AsRef<std::path::Path>, reason: impl Into<String>) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    /// Create a command failure error.
    pub fn command(command: impl Into<String>, status: i32, stderr: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            status,
            stderr: stderr.into(),
        }
    }

    /// Create a download error.
    pub fn download(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a package error.
    pub fn package(package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Package {
            package: package.into(),
            reason: reason.into(),
        }
    }
}

/// Failure raised while evaluating a guard predicate.
#[derive(Debug, Clone, Error)]
pub enum GuardError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Attribute(#[from] AttributeError),

    #[error("{0}")]
    Failed(String),
}

/// Failure raised by a provider while converging one resource.
///
/// `Resolve` happens before any side effect; `Apply` may leave partial
/// state behind.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Resolve(#[from] AttributeError),

    #[error(transparent)]
    Apply(#[from] HostError),

    #[error("action '{0}' is not supported")]
    Unsupported(Action),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_resource() {
        let id = ResourceId::new("file", "/etc/motd");
        let err = Error::apply(&id, Action::Create, HostError::io("/etc/motd", "disk full"));
        assert!(err.to_string().contains("file[/etc/motd]"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_apply_error_keeps_host_failure_as_source() {
        let id = ResourceId::new("execute", "reconfigure");
        let err = Error::apply(
            &id,
            Action::Run,
            HostError::command("chef-server-ctl reconfigure", 2, "boom"),
        );

        assert!(matches!(
            err.host_error(),
            Some(HostError::Command { status: 2, .. })
        ));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("command `chef-server-ctl reconfigure` exited with 2: boom")
        );
    }

    #[test]
    fn test_guard_error_keeps_cause_as_source() {
        let id = ResourceId::new("execute", "bootstrap");
        let err = Error::guard_evaluation(&id, GuardError::from(AttributeError::missing("fqdn")));

        assert!(err.host_error().is_none());
        assert!(matches!(
            std::error::Error::source(&err)
                .and_then(|source| source.downcast_ref::<GuardError>()),
            Some(GuardError::Attribute(AttributeError::Missing { .. }))
        ));
    }

    #[test]
    fn test_missing_attribute_conversion() {
        let id = ResourceId::new("template", "/tmp/knife.rb");
        let err = Error::from_attribute(&id, AttributeError::missing("ipaddress"));
        assert!(matches!(
            err,
            Error::MissingAttribute { ref path, .. } if path == "ipaddress"
        ));
        assert_eq!(err.resource(), &id);
    }

    #[test]
    fn test_type_mismatch_conversion() {
        let id = ResourceId::new("ingredient", "chef-server");
        let err = Error::from_attribute(
            &id,
            AttributeError::type_mismatch("chef_server_wrapper.version", "a string", "a map"),
        );
        assert!(err.to_string().contains("expected a string, found a map"));
    }
}
